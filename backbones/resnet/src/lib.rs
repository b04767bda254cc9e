//! ResNet implementation for segmentation backbones.
//!
//! This module provides ResNet models adapted for use as feature extractors.
//! The implementation is based on the official torchvision ResNet implementation,
//! including its `replace_stride_with_dilation` option.

use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{MaxPool2d, MaxPool2dConfig},
    BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
};
use burn::prelude::*;
use core::f64::consts::SQRT_2;

mod blocks;
pub use blocks::*;

// ResNet residual layer block configs
const RESNET18_BLOCKS: [usize; 4] = [2, 2, 2, 2];
const RESNET34_BLOCKS: [usize; 4] = [3, 4, 6, 3];
const RESNET50_BLOCKS: [usize; 4] = [3, 4, 6, 3];
const RESNET101_BLOCKS: [usize; 4] = [3, 4, 23, 3];
const RESNET152_BLOCKS: [usize; 4] = [3, 8, 36, 3];

/// ResNet depth variants.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum ResNetDepth {
    /// ResNet-18 (basic blocks)
    ResNet18,
    /// ResNet-34 (basic blocks)
    ResNet34,
    /// ResNet-50 (bottleneck blocks)
    ResNet50,
    /// ResNet-101 (bottleneck blocks)
    ResNet101,
    /// ResNet-152 (bottleneck blocks)
    ResNet152,
}

impl ResNetDepth {
    fn blocks(&self) -> [usize; 4] {
        match self {
            Self::ResNet18 => RESNET18_BLOCKS,
            Self::ResNet34 => RESNET34_BLOCKS,
            Self::ResNet50 => RESNET50_BLOCKS,
            Self::ResNet101 => RESNET101_BLOCKS,
            Self::ResNet152 => RESNET152_BLOCKS,
        }
    }

    fn expansion(&self) -> usize {
        match self {
            Self::ResNet18 | Self::ResNet34 => 1,
            _ => 4,
        }
    }

    /// Output channels of `layer1..=layer4`.
    pub fn stage_channels(&self) -> [usize; 4] {
        let e = self.expansion();
        [64 * e, 128 * e, 256 * e, 512 * e]
    }
}

/// ResNet configuration
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Depth variant.
    pub depth: ResNetDepth,
    /// For `layer2..=layer4`, replace the 2x stride with dilation (torchvision semantics).
    #[config(default = "[false, false, false]")]
    pub replace_stride_with_dilation: [bool; 3],
}

impl ResNetConfig {
    /// Initialize a ResNet backbone.
    ///
    /// # Panics
    ///
    /// Panics if dilation is requested for a basic-block variant (ResNet-18/34).
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNetBackbone<B> {
        ResNetBackbone::new(&self.depth, self.replace_stride_with_dilation, device)
    }
}

/// ResNet backbone.
///
/// Provides the 4 feature levels (`layer1..=layer4`) at strides 4, 8, 16 and 32
/// (smaller when dilation replaces strides).
/// Derived from torchvision.models.resnet.ResNet
#[derive(Module, Debug)]
pub struct ResNetBackbone<B: Backend> {
    // conv1 + bn1 + relu + maxpool
    pub conv1_block: Conv1Block<B>,
    pub layer1: LayerBlock<B>,
    pub layer2: LayerBlock<B>,
    pub layer3: LayerBlock<B>,
    pub layer4: LayerBlock<B>,
    expansion: usize,
}

impl<B: Backend> ResNetBackbone<B> {
    /// Forward pass that returns the 4 feature levels.
    pub fn forward(&self, input: Tensor<B, 4>) -> [Tensor<B, 4>; 4] {
        let x = self.conv1_block.forward(input);
        let c1 = self.layer1.forward(x);
        let c2 = self.layer2.forward(c1.clone());
        let c3 = self.layer3.forward(c2.clone());
        let c4 = self.layer4.forward(c3.clone());

        [c1, c2, c3, c4]
    }

    /// Output channels of each feature level.
    pub const fn output_channels(&self) -> [usize; 4] {
        let e = self.expansion;
        [64 * e, 128 * e, 256 * e, 512 * e]
    }

    /// Create ResNet-18 backbone.
    pub fn resnet18(device: &Device<B>) -> Self {
        Self::new(&ResNetDepth::ResNet18, [false; 3], device)
    }

    /// Create ResNet-34 backbone.
    pub fn resnet34(device: &Device<B>) -> Self {
        Self::new(&ResNetDepth::ResNet34, [false; 3], device)
    }

    /// Create ResNet-50 backbone.
    pub fn resnet50(device: &Device<B>) -> Self {
        Self::new(&ResNetDepth::ResNet50, [false; 3], device)
    }

    /// Create ResNet-101 backbone.
    pub fn resnet101(device: &Device<B>) -> Self {
        Self::new(&ResNetDepth::ResNet101, [false; 3], device)
    }

    /// Create ResNet-152 backbone.
    pub fn resnet152(device: &Device<B>) -> Self {
        Self::new(&ResNetDepth::ResNet152, [false; 3], device)
    }

    fn new(
        depth: &ResNetDepth,
        replace_stride_with_dilation: [bool; 3],
        device: &Device<B>,
    ) -> Self {
        let blocks = depth.blocks();
        let channels = depth.stage_channels();
        let bottleneck = depth.expansion() > 1;

        let conv1_block = Conv1Block::new(3, 64, device);
        let layer1 = LayerBlock::new(blocks[0], 64, channels[0], 1, 1, 1, bottleneck, device);

        let mut dilation = 1;
        let mut make_layer = |index: usize| {
            let previous_dilation = dilation;
            let stride = if replace_stride_with_dilation[index] {
                dilation *= 2;
                1
            } else {
                2
            };
            LayerBlock::new(
                blocks[index + 1],
                channels[index],
                channels[index + 1],
                stride,
                previous_dilation,
                dilation,
                bottleneck,
                device,
            )
        };
        let layer2 = make_layer(0);
        let layer3 = make_layer(1);
        let layer4 = make_layer(2);

        Self {
            conv1_block,
            layer1,
            layer2,
            layer3,
            layer4,
            expansion: depth.expansion(),
        }
    }
}

/// First conv block: conv1 + bn1 + relu + maxpool
#[derive(Module, Debug)]
pub struct Conv1Block<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    maxpool: MaxPool2d,
}

impl<B: Backend> Conv1Block<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv1.forward(input);
        let out = self.bn1.forward(out);
        let out = self.relu.forward(out);
        self.maxpool.forward(out)
    }

    /// Create a new Conv1Block.
    pub fn new(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        let initializer = Initializer::KaimingNormal {
            gain: SQRT_2,
            fan_out_only: true,
        };

        // 7x7 conv, stride=2, padding=3
        let conv1 = Conv2dConfig::new([in_channels, out_channels], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .with_initializer(initializer)
            .init(device);

        let bn1 = BatchNormConfig::new(out_channels).init(device);

        // 3x3 maxpool, stride=2, padding=1
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        Self {
            conv1,
            bn1,
            relu: Relu::new(),
            maxpool,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn random_input(shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        Tensor::<TestBackend, 4>::random(
            shape,
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &Default::default(),
        )
    }

    #[test]
    fn test_resnet_config() {
        let config = ResNetConfig::new(ResNetDepth::ResNet50);
        assert_eq!(config.replace_stride_with_dilation, [false; 3]);
        assert_eq!(config.depth.stage_channels(), [256, 512, 1024, 2048]);
    }

    #[test]
    fn test_resnet18_forward() {
        let device = Default::default();
        let model = ResNetBackbone::<TestBackend>::resnet18(&device);
        let output = model.forward(random_input([1, 3, 64, 64]));

        assert_eq!(output[0].dims(), [1, 64, 16, 16]);
        assert_eq!(output[1].dims(), [1, 128, 8, 8]);
        assert_eq!(output[2].dims(), [1, 256, 4, 4]);
        assert_eq!(output[3].dims(), [1, 512, 2, 2]);
        assert_eq!(model.output_channels(), [64, 128, 256, 512]);
    }

    #[test]
    fn test_resnet50_forward() {
        let device = Default::default();
        let model = ResNetBackbone::<TestBackend>::resnet50(&device);
        let output = model.forward(random_input([1, 3, 64, 64]));

        assert_eq!(output[0].dims(), [1, 256, 16, 16]);
        assert_eq!(output[1].dims(), [1, 512, 8, 8]);
        assert_eq!(output[2].dims(), [1, 1024, 4, 4]);
        assert_eq!(output[3].dims(), [1, 2048, 2, 2]);
    }

    #[test]
    fn test_resnet50_dilated_keeps_stride_eight() {
        let device = Default::default();
        let model = ResNetConfig::new(ResNetDepth::ResNet50)
            .with_replace_stride_with_dilation([false, true, true])
            .init::<TestBackend>(&device);
        let output = model.forward(random_input([1, 3, 64, 64]));

        assert_eq!(output[1].dims(), [1, 512, 8, 8]);
        assert_eq!(output[2].dims(), [1, 1024, 8, 8]);
        assert_eq!(output[3].dims(), [1, 2048, 8, 8]);
    }

    #[test]
    fn test_resnet_odd_input() {
        let device = Default::default();
        let model = ResNetBackbone::<TestBackend>::resnet34(&device);
        let output = model.forward(random_input([1, 3, 61, 63]));

        assert_eq!(output[0].dims(), [1, 64, 16, 16]);
        assert_eq!(output[3].dims(), [1, 512, 2, 2]);
    }

    #[test]
    #[should_panic(expected = "Dilation > 1 not supported")]
    fn test_basic_block_rejects_dilation() {
        let device = Default::default();
        let _ = ResNetConfig::new(ResNetDepth::ResNet18)
            .with_replace_stride_with_dilation([false, true, true])
            .init::<TestBackend>(&device);
    }
}
