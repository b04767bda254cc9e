//! MobileNetV3-Large feature extractor.
//!
//! The `features` list keeps the torchvision layout (stem, fifteen inverted residual
//! blocks, final 1x1 conv) so that parameter paths line up with ImageNet checkpoints.

use burn::{
    module::Ignored,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::relu,
};

/// Indices into `features` at which a stage ends.
pub const STAGE_ENDS: [usize; 6] = [0, 2, 4, 7, 13, 16];

/// Activation applied after a conv + norm pair.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Hardswish,
}

impl Activation {
    fn apply<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Relu => relu(x),
            Self::Hardswish => hardswish(x),
        }
    }
}

/// `relu6(x + 3) / 6`.
fn hard_sigmoid<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    x.add_scalar(3.0).clamp(0.0, 6.0).div_scalar(6.0)
}

fn hardswish<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    x.clone() * hard_sigmoid(x)
}

/// Round `value` to the nearest multiple of `divisor` without dropping below 90% of it.
pub fn make_divisible(value: usize, divisor: usize) -> usize {
    let rounded = ((value + divisor / 2) / divisor * divisor).max(divisor);
    if (rounded as f64) < 0.9 * value as f64 {
        rounded + divisor
    } else {
        rounded
    }
}

/// One row of the MobileNetV3 block table.
#[derive(Config, Debug)]
pub struct InvertedResidualConfig {
    pub input_channels: usize,
    pub kernel: usize,
    pub expanded_channels: usize,
    pub out_channels: usize,
    pub use_se: bool,
    pub activation: Activation,
    pub stride: usize,
    #[config(default = "1")]
    pub dilation: usize,
}

impl InvertedResidualConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> InvertedResidual<B> {
        InvertedResidual::new(self, device)
    }
}

/// MobileNetV3-Large block table.
///
/// With `dilated` the last three blocks use dilation 2 and the stride-2 block among them
/// keeps stride 1, so the network output stays at 1/16 resolution.
pub fn large_settings(dilated: bool) -> Vec<InvertedResidualConfig> {
    use Activation::{Hardswish as HS, Relu as RE};

    let dilation = if dilated { 2 } else { 1 };
    let rows: [(usize, usize, usize, usize, bool, Activation, usize, usize); 15] = [
        (16, 3, 16, 16, false, RE, 1, 1),
        (16, 3, 64, 24, false, RE, 2, 1),
        (24, 3, 72, 24, false, RE, 1, 1),
        (24, 5, 72, 40, true, RE, 2, 1),
        (40, 5, 120, 40, true, RE, 1, 1),
        (40, 5, 120, 40, true, RE, 1, 1),
        (40, 3, 240, 80, false, HS, 2, 1),
        (80, 3, 200, 80, false, HS, 1, 1),
        (80, 3, 184, 80, false, HS, 1, 1),
        (80, 3, 184, 80, false, HS, 1, 1),
        (80, 3, 480, 112, true, HS, 1, 1),
        (112, 3, 672, 112, true, HS, 1, 1),
        (112, 5, 672, 160, true, HS, 2, dilation),
        (160, 5, 960, 160, true, HS, 1, dilation),
        (160, 5, 960, 160, true, HS, 1, dilation),
    ];

    rows.into_iter()
        .map(|(cin, kernel, exp, cout, use_se, activation, stride, dilation)| {
            InvertedResidualConfig::new(cin, kernel, exp, cout, use_se, activation, stride)
                .with_dilation(dilation)
        })
        .collect()
}

/// Conv + BatchNorm + optional activation.
#[derive(Module, Debug)]
pub struct ConvNormActivation<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    activation: Ignored<Option<Activation>>,
}

impl<B: Backend> ConvNormActivation<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        dilation: usize,
        groups: usize,
        activation: Option<Activation>,
        device: &Device<B>,
    ) -> Self {
        let padding = (kernel - 1) / 2 * dilation;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
            .with_stride([stride, stride])
            .with_dilation([dilation, dilation])
            .with_groups(groups)
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(out_channels)
            .with_epsilon(1e-3)
            .with_momentum(0.01)
            .init(device);

        Self {
            conv,
            bn,
            activation: Ignored(activation),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.bn.forward(self.conv.forward(x));
        match &self.activation.0 {
            Some(activation) => activation.apply(x),
            None => x,
        }
    }
}

/// Squeeze-and-excitation with a hard-sigmoid gate.
#[derive(Module, Debug)]
pub struct SqueezeExcitation<B: Backend> {
    avgpool: AdaptiveAvgPool2d,
    fc1: Conv2d<B>,
    fc2: Conv2d<B>,
}

impl<B: Backend> SqueezeExcitation<B> {
    pub fn new(channels: usize, squeeze_channels: usize, device: &Device<B>) -> Self {
        Self {
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: Conv2dConfig::new([channels, squeeze_channels], [1, 1]).init(device),
            fc2: Conv2dConfig::new([squeeze_channels, channels], [1, 1]).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.avgpool.forward(x.clone());
        let scale = relu(self.fc1.forward(scale));
        let scale = hard_sigmoid(self.fc2.forward(scale));
        x * scale
    }
}

#[derive(Module, Debug)]
pub enum BlockLayer<B: Backend> {
    ConvNormActivation(ConvNormActivation<B>),
    SqueezeExcitation(SqueezeExcitation<B>),
}

impl<B: Backend> BlockLayer<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::ConvNormActivation(layer) => layer.forward(x),
            Self::SqueezeExcitation(layer) => layer.forward(x),
        }
    }
}

/// Expand, depthwise, optional squeeze-excitation, project.
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    block: Vec<BlockLayer<B>>,
    use_res_connect: bool,
}

impl<B: Backend> InvertedResidual<B> {
    pub fn new(config: &InvertedResidualConfig, device: &Device<B>) -> Self {
        assert!(
            matches!(config.stride, 1 | 2),
            "illegal stride value {}",
            config.stride
        );

        let mut block = Vec::new();
        if config.expanded_channels != config.input_channels {
            block.push(BlockLayer::ConvNormActivation(ConvNormActivation::new(
                config.input_channels,
                config.expanded_channels,
                1,
                1,
                1,
                1,
                Some(config.activation.clone()),
                device,
            )));
        }

        let stride = if config.dilation > 1 { 1 } else { config.stride };
        block.push(BlockLayer::ConvNormActivation(ConvNormActivation::new(
            config.expanded_channels,
            config.expanded_channels,
            config.kernel,
            stride,
            config.dilation,
            config.expanded_channels,
            Some(config.activation.clone()),
            device,
        )));

        if config.use_se {
            let squeeze = make_divisible(config.expanded_channels / 4, 8);
            block.push(BlockLayer::SqueezeExcitation(SqueezeExcitation::new(
                config.expanded_channels,
                squeeze,
                device,
            )));
        }

        block.push(BlockLayer::ConvNormActivation(ConvNormActivation::new(
            config.expanded_channels,
            config.out_channels,
            1,
            1,
            1,
            1,
            None,
            device,
        )));

        Self {
            block,
            use_res_connect: config.stride == 1 && config.input_channels == config.out_channels,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input.clone();
        for layer in &self.block {
            x = layer.forward(x);
        }

        if self.use_res_connect {
            x + input
        } else {
            x
        }
    }
}

#[derive(Module, Debug)]
pub enum FeatureLayer<B: Backend> {
    ConvNormActivation(ConvNormActivation<B>),
    InvertedResidual(InvertedResidual<B>),
}

impl<B: Backend> FeatureLayer<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::ConvNormActivation(layer) => layer.forward(x),
            Self::InvertedResidual(layer) => layer.forward(x),
        }
    }
}

/// MobileNetV3-Large configuration.
#[derive(Config, Debug)]
pub struct MobileNetV3Config {
    /// Dilate the last blocks instead of downsampling to 1/32.
    #[config(default = "false")]
    pub dilated: bool,
}

impl MobileNetV3Config {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MobileNetV3Backbone<B> {
        MobileNetV3Backbone::large(self.dilated, device)
    }
}

/// MobileNetV3 backbone returning the output of every stage in [`STAGE_ENDS`].
#[derive(Module, Debug)]
pub struct MobileNetV3Backbone<B: Backend> {
    features: Vec<FeatureLayer<B>>,
}

impl<B: Backend> MobileNetV3Backbone<B> {
    /// MobileNetV3-Large.
    pub fn large(dilated: bool, device: &Device<B>) -> Self {
        let settings = large_settings(dilated);
        let first = settings[0].input_channels;
        let last = settings[settings.len() - 1].out_channels;

        let mut features = Vec::with_capacity(settings.len() + 2);
        features.push(FeatureLayer::ConvNormActivation(ConvNormActivation::new(
            3,
            first,
            3,
            2,
            1,
            1,
            Some(Activation::Hardswish),
            device,
        )));
        features.extend(
            settings
                .iter()
                .map(|config| FeatureLayer::InvertedResidual(config.init(device))),
        );
        features.push(FeatureLayer::ConvNormActivation(ConvNormActivation::new(
            last,
            6 * last,
            1,
            1,
            1,
            1,
            Some(Activation::Hardswish),
            device,
        )));

        Self { features }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let mut outputs = Vec::with_capacity(STAGE_ENDS.len());
        let mut x = input;
        for (idx, layer) in self.features.iter().enumerate() {
            x = layer.forward(x);
            if STAGE_ENDS.contains(&idx) {
                outputs.push(x.clone());
            }
        }
        outputs
    }

    /// Channels of every stage output.
    pub fn output_channels(&self) -> Vec<usize> {
        vec![16, 24, 40, 80, 160, 960]
    }
}
