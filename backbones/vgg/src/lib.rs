//! VGG implementation for segmentation backbones.
//!
//! This module provides VGG-16 adapted for use as a feature extractor.
//! The implementation is based on the torchvision VGG implementation; the feature
//! stack is split after every max-pool, giving five stages at strides 2 to 32.

use core::f64::consts::SQRT_2;

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
};

/// VGG-16 stage layout: conv output channels per stage, each stage ends with a max-pool.
const VGG16_STAGES: [&[usize]; 5] = [
    &[64, 64],
    &[128, 128],
    &[256, 256, 256],
    &[512, 512, 512],
    &[512, 512, 512],
];

/// VGG configuration
#[derive(Config, Debug)]
pub struct VggConfig {
    /// Use batch normalization after every convolution
    #[config(default = "false")]
    pub batch_norm: bool,
}

impl VggConfig {
    /// VGG16 configuration
    pub const fn vgg16() -> Self {
        Self { batch_norm: false }
    }

    /// VGG16 with batch normalization
    pub const fn vgg16_bn() -> Self {
        Self { batch_norm: true }
    }

    /// `(stage, conv, index)` for every convolution, where `index` is the position of the
    /// conv in torchvision's flat `features` sequence.
    pub fn torchvision_feature_indices(&self) -> Vec<(usize, usize, usize)> {
        // conv + (bn) + relu per conv layer, one max-pool per stage
        let layers_per_conv = if self.batch_norm { 3 } else { 2 };
        let mut index = 0;
        let mut indices = Vec::new();
        for (stage, convs) in VGG16_STAGES.iter().enumerate() {
            for conv in 0..convs.len() {
                indices.push((stage, conv, index));
                index += layers_per_conv;
            }
            index += 1;
        }
        indices
    }

    /// Initialize VGG model
    pub fn init<B: Backend>(&self, device: &B::Device) -> VGGBackbone<B> {
        VGGBackbone::new(self.batch_norm, device)
    }
}

/// VGG backbone.
#[derive(Module, Debug)]
pub struct VGGBackbone<B: Backend> {
    stages: Vec<VGGFeatureBlock<B>>,
}

impl<B: Backend> VGGBackbone<B> {
    /// Forward pass that returns the output of each of the five stages.
    pub fn forward(&self, input: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let mut features = Vec::with_capacity(self.stages.len());
        let mut x = input;
        for stage in &self.stages {
            x = stage.forward(x);
            features.push(x.clone());
        }
        features
    }

    /// Output channels of each stage.
    pub fn output_channels(&self) -> Vec<usize> {
        VGG16_STAGES
            .iter()
            .map(|stage| stage.last().copied().unwrap_or_default())
            .collect()
    }

    /// Create VGG16 backbone without batch normalization.
    pub fn vgg16(device: &Device<B>) -> Self {
        Self::new(false, device)
    }

    /// Create VGG16 backbone with batch normalization.
    pub fn vgg16_bn(device: &Device<B>) -> Self {
        Self::new(true, device)
    }

    fn new(batch_norm: bool, device: &Device<B>) -> Self {
        let mut in_channels = 3;
        let stages = VGG16_STAGES
            .iter()
            .map(|convs| {
                let block = VGGFeatureBlock::new(convs, in_channels, batch_norm, device);
                in_channels = convs.last().copied().unwrap_or(in_channels);
                block
            })
            .collect();

        Self { stages }
    }
}

/// One VGG stage: a run of 3x3 convolutions followed by a 2x2 max-pool.
#[derive(Module, Debug)]
pub struct VGGFeatureBlock<B: Backend> {
    convs: Vec<VGGConvLayer<B>>,
    pool: MaxPool2d,
}

impl<B: Backend> VGGFeatureBlock<B> {
    /// Forward pass through the feature block.
    pub fn forward(&self, mut input: Tensor<B, 4>) -> Tensor<B, 4> {
        for conv in &self.convs {
            input = conv.forward(input);
        }
        self.pool.forward(input)
    }

    /// Create a new VGG feature block.
    pub fn new(
        out_channels: &[usize],
        in_channels: usize,
        batch_norm: bool,
        device: &Device<B>,
    ) -> Self {
        let mut current_channels = in_channels;
        let convs = out_channels
            .iter()
            .map(|&out| {
                let conv = VGGConvLayer::new(current_channels, out, batch_norm, device);
                current_channels = out;
                conv
            })
            .collect();
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Self { convs, pool }
    }
}

/// VGG convolution layer with optional batch normalization.
#[derive(Module, Debug)]
pub struct VGGConvLayer<B: Backend> {
    conv: Conv2d<B>,
    batch_norm: Option<BatchNorm<B, 2>>,
    relu: Relu,
}

impl<B: Backend> VGGConvLayer<B> {
    /// Forward pass through the convolution layer.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(input);
        let out = match &self.batch_norm {
            Some(bn) => bn.forward(out),
            None => out,
        };
        self.relu.forward(out)
    }

    /// Create a new VGG convolution layer.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        batch_norm: bool,
        device: &Device<B>,
    ) -> Self {
        let initializer = Initializer::KaimingNormal {
            gain: SQRT_2,
            fan_out_only: true,
        };

        // 3x3 conv, stride=1, padding=1; torchvision keeps the bias even with batch norm
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_stride([1, 1])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_initializer(initializer)
            .init(device);

        let batch_norm = batch_norm.then(|| BatchNormConfig::new(out_channels).init(device));

        Self {
            conv,
            batch_norm,
            relu: Relu::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::{backend::NdArray, tensor::Distribution};

    use super::*;

    type TestBackend = NdArray<f32>;

    #[test]
    fn vgg16_config_disables_batch_norm_by_default() {
        let config = VggConfig::new();
        assert!(!config.batch_norm);
        assert!(VggConfig::vgg16_bn().batch_norm);
    }

    #[test]
    fn torchvision_feature_indices_skip_relu_and_pool() {
        let conv_indices = |config: VggConfig| {
            config
                .torchvision_feature_indices()
                .into_iter()
                .map(|(_, _, index)| index)
                .collect::<Vec<_>>()
        };

        assert_eq!(
            conv_indices(VggConfig::vgg16()),
            vec![0, 2, 5, 7, 10, 12, 14, 17, 19, 21, 24, 26, 28]
        );
        assert_eq!(
            conv_indices(VggConfig::vgg16_bn()),
            vec![0, 3, 7, 10, 14, 17, 20, 24, 27, 30, 34, 37, 40]
        );
        assert_eq!(VggConfig::vgg16().torchvision_feature_indices()[4], (2, 0, 10));
    }

    #[test]
    fn vgg16_forward_returns_five_stages() {
        let device = Default::default();
        let model = VggConfig::vgg16().init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::random(
            [1, 3, 64, 64],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let output = model.forward(input);

        assert_eq!(output.len(), 5);
        assert_eq!(output[0].dims(), [1, 64, 32, 32]);
        assert_eq!(output[1].dims(), [1, 128, 16, 16]);
        assert_eq!(output[2].dims(), [1, 256, 8, 8]);
        assert_eq!(output[3].dims(), [1, 512, 4, 4]);
        assert_eq!(output[4].dims(), [1, 512, 2, 2]);
        assert_eq!(model.output_channels(), vec![64, 128, 256, 512, 512]);
    }

    #[test]
    fn vgg16_bn_handles_odd_input() {
        let device = Default::default();
        let model = VGGBackbone::<TestBackend>::vgg16_bn(&device);

        let input = Tensor::<TestBackend, 4>::random(
            [1, 3, 65, 67],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let output = model.forward(input);

        assert_eq!(output[0].dims(), [1, 64, 32, 33]);
        assert_eq!(output[4].dims(), [1, 512, 2, 2]);
    }
}
