//! The original Xception network (Chollet, 2017) as a segmentation backbone.
//!
//! Layer names follow the widely used `pretrainedmodels` port so that its ImageNet
//! checkpoint maps onto this module tree.

use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::{module::conv2d, ops::ConvOptions},
};

/// Number of 728-channel blocks in the middle flow.
const MIDDLE_FLOW_BLOCKS: usize = 8;

/// Xception configuration.
#[derive(Config, Debug)]
pub struct XceptionConfig {
    /// Input image channels.
    #[config(default = "3")]
    pub in_channels: usize,
}

impl XceptionConfig {
    /// Initialize the backbone.
    pub fn init<B: Backend>(&self, device: &B::Device) -> XceptionBackbone<B> {
        XceptionBackbone::new(self.in_channels, device)
    }
}

/// Bias-free 1x1 convolution whose kernel is kept as `[out_channels, in_channels]`.
///
/// The `pretrainedmodels` checkpoint stores pointwise kernels in this flattened layout.
#[derive(Module, Debug)]
pub struct PointwiseConv2d<B: Backend> {
    weight: Param<Tensor<B, 2>>,
}

impl<B: Backend> PointwiseConv2d<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        let initializer = Initializer::KaimingUniform {
            gain: 1.0 / 3.0f64.sqrt(),
            fan_out_only: false,
        };
        let weight = initializer.init_with(
            [out_channels, in_channels],
            Some(in_channels),
            Some(out_channels),
            device,
        );

        Self { weight }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [out_channels, in_channels] = self.weight.dims();
        let kernel = self.weight.val().reshape([out_channels, in_channels, 1, 1]);
        conv2d(x, kernel, None, ConvOptions::new([1, 1], [0, 0], [1, 1], 1))
    }
}

/// Depthwise 3x3 convolution followed by a pointwise 1x1 convolution.
#[derive(Module, Debug)]
pub struct SeparableConv2d<B: Backend> {
    conv1: Conv2d<B>,
    pointwise: PointwiseConv2d<B>,
}

impl<B: Backend> SeparableConv2d<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        let conv1 = Conv2dConfig::new([in_channels, in_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_groups(in_channels)
            .with_bias(false)
            .init(device);
        let pointwise = PointwiseConv2d::new(in_channels, out_channels, device);

        Self { conv1, pointwise }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pointwise.forward(self.conv1.forward(x))
    }
}

/// Layers of a block's residual branch, kept in `nn.Sequential` order.
#[derive(Module, Debug)]
pub enum RepLayer<B: Backend> {
    Relu(Relu),
    SepConv(SeparableConv2d<B>),
    Norm(BatchNorm<B, 2>),
    Pool(MaxPool2d),
}

impl<B: Backend> RepLayer<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Relu(relu) => relu.forward(x),
            Self::SepConv(conv) => conv.forward(x),
            Self::Norm(bn) => bn.forward(x),
            Self::Pool(pool) => pool.forward(x),
        }
    }
}

/// 1x1 strided projection of the residual shortcut.
#[derive(Module, Debug)]
pub struct Skip<B: Backend> {
    skip: Conv2d<B>,
    skipbn: BatchNorm<B, 2>,
}

/// Xception residual block.
#[derive(Module, Debug)]
pub struct XceptionBlock<B: Backend> {
    rep: Vec<RepLayer<B>>,
    skip: Option<Skip<B>>,
}

impl<B: Backend> XceptionBlock<B> {
    /// Create a block of `reps` separable convolutions.
    ///
    /// `grow_first` places the channel change on the first convolution instead of the last;
    /// `start_with_relu` keeps the leading activation.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        reps: usize,
        stride: usize,
        start_with_relu: bool,
        grow_first: bool,
        device: &Device<B>,
    ) -> Self {
        let skip = (out_channels != in_channels || stride != 1).then(|| Skip {
            skip: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            skipbn: BatchNormConfig::new(out_channels).init(device),
        });

        let mut rep = Vec::new();
        let unit = |rep: &mut Vec<RepLayer<B>>, cin: usize, cout: usize| {
            rep.push(RepLayer::Relu(Relu::new()));
            rep.push(RepLayer::SepConv(SeparableConv2d::new(cin, cout, device)));
            rep.push(RepLayer::Norm(BatchNormConfig::new(cout).init(device)));
        };

        let mut filters = in_channels;
        if grow_first {
            unit(&mut rep, in_channels, out_channels);
            filters = out_channels;
        }
        for _ in 1..reps {
            unit(&mut rep, filters, filters);
        }
        if !grow_first {
            unit(&mut rep, in_channels, out_channels);
        }
        if !start_with_relu {
            rep.remove(0);
        }
        if stride != 1 {
            rep.push(RepLayer::Pool(
                MaxPool2dConfig::new([3, 3])
                    .with_strides([stride, stride])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(),
            ));
        }

        Self { rep, skip }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input.clone();
        for layer in &self.rep {
            x = layer.forward(x);
        }

        let shortcut = match &self.skip {
            Some(skip) => skip.skipbn.forward(skip.skip.forward(input)),
            None => input,
        };

        x + shortcut
    }
}

/// Xception backbone.
///
/// Stages: stem (64, /2), block1 (128, /4), block2 (256, /8),
/// block3 + middle flow (728, /16), exit flow (2048, /32).
#[derive(Module, Debug)]
pub struct XceptionBackbone<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    block1: XceptionBlock<B>,
    block2: XceptionBlock<B>,
    block3: XceptionBlock<B>,
    middle: Vec<XceptionBlock<B>>,
    block12: XceptionBlock<B>,
    conv3: SeparableConv2d<B>,
    bn3: BatchNorm<B, 2>,
    conv4: SeparableConv2d<B>,
    bn4: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> XceptionBackbone<B> {
    fn new(in_channels: usize, device: &Device<B>) -> Self {
        let block = |cin, cout, reps, stride, start_with_relu, grow_first| {
            XceptionBlock::new(cin, cout, reps, stride, start_with_relu, grow_first, device)
        };

        Self {
            conv1: Conv2dConfig::new([in_channels, 32], [3, 3])
                .with_stride([2, 2])
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(32).init(device),
            conv2: Conv2dConfig::new([32, 64], [3, 3])
                .with_bias(false)
                .init(device),
            bn2: BatchNormConfig::new(64).init(device),
            block1: block(64, 128, 2, 2, false, true),
            block2: block(128, 256, 2, 2, true, true),
            block3: block(256, 728, 2, 2, true, true),
            middle: (0..MIDDLE_FLOW_BLOCKS)
                .map(|_| block(728, 728, 3, 1, true, true))
                .collect(),
            block12: block(728, 1024, 2, 2, true, false),
            conv3: SeparableConv2d::new(1024, 1536, device),
            bn3: BatchNormConfig::new(1536).init(device),
            conv4: SeparableConv2d::new(1536, 2048, device),
            bn4: BatchNormConfig::new(2048).init(device),
            relu: Relu::new(),
        }
    }

    /// Forward pass returning the five stage outputs.
    pub fn forward(&self, input: Tensor<B, 4>) -> [Tensor<B, 4>; 5] {
        let x = self.relu.forward(self.bn1.forward(self.conv1.forward(input)));
        let stem = self.relu.forward(self.bn2.forward(self.conv2.forward(x)));

        let c1 = self.block1.forward(stem.clone());
        let c2 = self.block2.forward(c1.clone());

        let mut c3 = self.block3.forward(c2.clone());
        for block in &self.middle {
            c3 = block.forward(c3);
        }

        let x = self.block12.forward(c3.clone());
        let x = self.relu.forward(self.bn3.forward(self.conv3.forward(x)));
        let c4 = self.relu.forward(self.bn4.forward(self.conv4.forward(x)));

        [stem, c1, c2, c3, c4]
    }

    /// Output channels of each stage.
    pub const fn output_channels(&self) -> [usize; 5] {
        [64, 128, 256, 728, 2048]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn pointwise_kernel_is_flattened() {
        let device = Default::default();
        let conv = SeparableConv2d::<TestBackend>::new(8, 16, &device);
        assert_eq!(conv.pointwise.weight.dims(), [16, 8]);

        let input = Tensor::<TestBackend, 4>::random([1, 8, 5, 5], Distribution::Default, &device);
        assert_eq!(conv.forward(input).dims(), [1, 16, 5, 5]);
    }

    #[test]
    fn pointwise_matches_channel_mixing() {
        let device = Default::default();
        let conv = PointwiseConv2d::<TestBackend> {
            weight: Param::from_tensor(Tensor::from_floats([[1.0, 2.0], [0.0, -1.0]], &device)),
        };
        // Two channels of one pixel: [3, 4].
        let input = Tensor::<TestBackend, 4>::from_floats([[[[3.0]], [[4.0]]]], &device);

        let expected = TensorData::from([[[[11.0f32]], [[-4.0]]]]);
        conv.forward(input)
            .into_data()
            .assert_approx_eq::<f32>(&expected, Default::default());
    }

    #[test]
    fn block_without_relu_start_drops_leading_activation() {
        let device = Default::default();
        let block = XceptionBlock::<TestBackend>::new(64, 128, 2, 2, false, true, &device);

        assert!(matches!(block.rep[0], RepLayer::SepConv(_)));
        assert!(matches!(block.rep.last(), Some(RepLayer::Pool(_))));
        assert!(block.skip.is_some());
    }

    #[test]
    fn middle_block_is_identity_shortcut() {
        let device = Default::default();
        let block = XceptionBlock::<TestBackend>::new(16, 16, 3, 1, true, true, &device);

        assert_eq!(block.rep.len(), 9);
        assert!(block.skip.is_none());

        let input = Tensor::<TestBackend, 4>::random([1, 16, 9, 9], Distribution::Default, &device);
        assert_eq!(block.forward(input).dims(), [1, 16, 9, 9]);
    }

    #[test]
    fn xception_forward_returns_five_stages() {
        let device = Default::default();
        let model = XceptionConfig::new().init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::random(
            [1, 3, 64, 64],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let output = model.forward(input);

        assert_eq!(output[0].dims(), [1, 64, 29, 29]);
        assert_eq!(output[1].dims(), [1, 128, 15, 15]);
        assert_eq!(output[2].dims(), [1, 256, 8, 8]);
        assert_eq!(output[3].dims(), [1, 728, 4, 4]);
        assert_eq!(output[4].dims(), [1, 2048, 2, 2]);
    }
}
