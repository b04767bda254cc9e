//! BiSeNet: Bilateral Segmentation Network for real-time semantic segmentation
//! (<https://arxiv.org/abs/1808.00897>).
//!
//! A shallow spatial path keeps 1/8 resolution detail while a context path refines the
//! 1/16 and 1/32 backbone features; a feature fusion module merges both.

use backbones::{Backbone, BackboneConfig, BackboneWrapper, FeatureTaps};
use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::activation::sigmoid,
};
use burn_extra_ops::{resize_bilinear, PixelShuffle, PixelShuffleConfig};

use super::{check_backbone, resolve_taps, SegmentationOutput};
use crate::error::SegmentationResult;

/// Conv (padding `kernel / 2`, no bias), BN and ReLU.
#[derive(Module, Debug)]
pub struct ConvNormAct<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> ConvNormAct<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        device: &Device<B>,
    ) -> Self {
        let padding = kernel_size / 2;
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.relu.forward(self.bn.forward(self.conv.forward(x)))
    }
}

/// Three strided convs down to 1/8 resolution, then a 1x1 projection.
#[derive(Module, Debug)]
pub struct SpatialPath<B: Backend> {
    layers: Vec<ConvNormAct<B>>,
}

impl<B: Backend> SpatialPath<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        let inter = out_channels / 2;
        let layers = vec![
            ConvNormAct::new(in_channels, inter, 7, 2, device),
            ConvNormAct::new(inter, inter, 3, 2, device),
            ConvNormAct::new(inter, inter, 3, 2, device),
            ConvNormAct::new(inter, out_channels, 1, 1, device),
        ];
        Self { layers }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.layers.iter().fold(x, |x, layer| layer.forward(x))
    }
}

/// Reweights the channels of a conv block with a pooled, sigmoid-gated descriptor.
#[derive(Module, Debug)]
pub struct AttentionRefinementModule<B: Backend> {
    conv: ConvNormAct<B>,
    pool: AdaptiveAvgPool2d,
    attention_conv: Conv2d<B>,
    attention_bn: BatchNorm<B, 2>,
}

impl<B: Backend> AttentionRefinementModule<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        Self {
            conv: ConvNormAct::new(in_channels, out_channels, 3, 1, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            attention_conv: Conv2dConfig::new([out_channels, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
            attention_bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let features = self.conv.forward(x);
        let weight = self.pool.forward(features.clone());
        let weight = sigmoid(self.attention_bn.forward(self.attention_conv.forward(weight)));
        features * weight
    }
}

/// Context path on top of the backbone's 1/16 and 1/32 features.
#[derive(Module, Debug)]
pub struct ContextPathStage<B: Backend> {
    global_pool: AdaptiveAvgPool2d,
    arm_16x: AttentionRefinementModule<B>,
    arm_32x: AttentionRefinementModule<B>,
    conv_16x: ConvNormAct<B>,
    conv_32x: ConvNormAct<B>,
    conv_global: ConvNormAct<B>,
}

impl<B: Backend> ContextPathStage<B> {
    pub fn new(
        channels_16x: usize,
        channels_32x: usize,
        out_channels: usize,
        device: &Device<B>,
    ) -> Self {
        Self {
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            arm_16x: AttentionRefinementModule::new(channels_16x, out_channels, device),
            arm_32x: AttentionRefinementModule::new(channels_32x, out_channels, device),
            conv_16x: ConvNormAct::new(out_channels, out_channels, 3, 1, device),
            conv_32x: ConvNormAct::new(out_channels, out_channels, 3, 1, device),
            conv_global: ConvNormAct::new(channels_32x, out_channels, 1, 1, device),
        }
    }

    /// Returns `(out_32x, out_16x)`; `out_32x` has the size of `feature_16x` and
    /// `out_16x` has `output_size`.
    pub fn forward(
        &self,
        feature_16x: Tensor<B, 4>,
        feature_32x: Tensor<B, 4>,
        output_size: [usize; 2],
    ) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let [_, _, height_16x, width_16x] = feature_16x.dims();

        let global = self
            .conv_global
            .forward(self.global_pool.forward(feature_32x.clone()));

        let out_32x = self.arm_32x.forward(feature_32x) + global;
        let out_32x = resize_bilinear(out_32x, [height_16x, width_16x]);
        let out_32x = self.conv_32x.forward(out_32x);

        let out_16x = self.arm_16x.forward(feature_16x) + out_32x.clone();
        let out_16x = resize_bilinear(out_16x, output_size);
        let out_16x = self.conv_16x.forward(out_16x);

        (out_32x, out_16x)
    }
}

/// Fuses spatial and context features with a squeeze-excitation style attention.
#[derive(Module, Debug)]
pub struct FeatureFusionModule<B: Backend> {
    conv: ConvNormAct<B>,
    pool: AdaptiveAvgPool2d,
    attention_reduce: Conv2d<B>,
    relu: Relu,
    attention_expand: Conv2d<B>,
}

impl<B: Backend> FeatureFusionModule<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        let reduced = out_channels / 4;
        Self {
            conv: ConvNormAct::new(in_channels, out_channels, 1, 1, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            attention_reduce: Conv2dConfig::new([out_channels, reduced], [1, 1]).init(device),
            relu: Relu::new(),
            attention_expand: Conv2dConfig::new([reduced, out_channels], [1, 1]).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let features = self.conv.forward(x);
        let weight = self.pool.forward(features.clone());
        let weight = self.relu.forward(self.attention_reduce.forward(weight));
        let weight = sigmoid(self.attention_expand.forward(weight));
        features.clone() + features * weight
    }
}

/// 1x1 conv to `out_channels * factor^2` followed by a pixel shuffle.
#[derive(Module, Debug)]
pub struct Upscale<B: Backend> {
    conv: Conv2d<B>,
    shuffle: PixelShuffle,
}

impl<B: Backend> Upscale<B> {
    pub fn new(in_channels: usize, out_channels: usize, factor: usize, device: &Device<B>) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels * factor * factor], [1, 1])
                .init(device),
            shuffle: PixelShuffleConfig::new().with_upscale_factor(factor).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.shuffle.forward(self.conv.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct BiSeNetHead<B: Backend> {
    conv: ConvNormAct<B>,
    upscale: Upscale<B>,
}

impl<B: Backend> BiSeNetHead<B> {
    pub fn new(
        in_channels: usize,
        inter_channels: usize,
        num_classes: usize,
        up_factor: usize,
        device: &Device<B>,
    ) -> Self {
        Self {
            conv: ConvNormAct::new(in_channels, inter_channels, 3, 1, device),
            upscale: Upscale::new(inter_channels, num_classes, up_factor, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.upscale.forward(self.conv.forward(x))
    }
}

/// Auxiliary heads on the two context path outputs.
#[derive(Module, Debug)]
pub struct BiSeNetAuxHeads<B: Backend> {
    head_16x: BiSeNetHead<B>,
    head_32x: BiSeNetHead<B>,
}

/// BiSeNet configuration.
#[derive(Config, Debug)]
pub struct BiSeNetConfig {
    pub backbone: BackboneConfig,
    pub num_classes: usize,
    /// Output channels of the spatial path and of the context path.
    #[config(default = "128")]
    pub path_channels: usize,
    #[config(default = "false")]
    pub use_aux: bool,
}

impl BiSeNetConfig {
    pub fn taps(&self) -> FeatureTaps {
        FeatureTaps::context_path()
    }

    pub fn init<B: Backend>(&self, device: &Device<B>) -> SegmentationResult<BiSeNet<B>> {
        check_backbone(&self.backbone)?;
        let stage_channels = self.backbone.output_channels();
        let [index_16x, index_32x] = resolve_taps(&self.taps(), &stage_channels)?;

        let path = self.path_channels;
        let aux_heads = self.use_aux.then(|| BiSeNetAuxHeads {
            head_16x: BiSeNetHead::new(path, path, self.num_classes, 8, device),
            head_32x: BiSeNetHead::new(path, path, self.num_classes, 16, device),
        });

        Ok(BiSeNet {
            backbone: self.backbone.init(device),
            context_path_stage: ContextPathStage::new(
                stage_channels[index_16x],
                stage_channels[index_32x],
                path,
                device,
            ),
            spatial_path: SpatialPath::new(3, path, device),
            ffm: FeatureFusionModule::new(path * 2, path * 2, device),
            head: BiSeNetHead::new(path * 2, path * 2, self.num_classes, 8, device),
            aux_heads,
            index_16x,
            index_32x,
        })
    }
}

/// BiSeNet model.
#[derive(Module, Debug)]
pub struct BiSeNet<B: Backend> {
    backbone: BackboneWrapper<B>,
    context_path_stage: ContextPathStage<B>,
    spatial_path: SpatialPath<B>,
    ffm: FeatureFusionModule<B>,
    head: BiSeNetHead<B>,
    aux_heads: Option<BiSeNetAuxHeads<B>>,
    index_16x: usize,
    index_32x: usize,
}

impl<B: Backend> BiSeNet<B> {
    pub fn with_backbone(mut self, backbone: BackboneWrapper<B>) -> Self {
        self.backbone = backbone;
        self
    }

    pub const fn backbone(&self) -> &BackboneWrapper<B> {
        &self.backbone
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> SegmentationOutput<B> {
        let [_, _, height, width] = x.dims();

        let spatial_out = self.spatial_path.forward(x.clone());
        let [_, _, spatial_height, spatial_width] = spatial_out.dims();

        let features = self.backbone.forward(x);
        let (context_32x, context_16x) = self.context_path_stage.forward(
            features[self.index_16x].clone(),
            features[self.index_32x].clone(),
            [spatial_height, spatial_width],
        );

        let combined = Tensor::cat(vec![spatial_out, context_16x.clone()], 1);
        let out = self.head.forward(self.ffm.forward(combined));

        let aux = self.aux_heads.as_ref().map(|heads| {
            let aux_32x = resize_bilinear(heads.head_32x.forward(context_32x), [height, width]);
            let aux_16x = resize_bilinear(heads.head_16x.forward(context_16x), [height, width]);
            aux_32x + aux_16x
        });

        SegmentationOutput {
            out: resize_bilinear(out, [height, width]),
            aux,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backbones::BackboneType;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    fn input(shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        Tensor::random(shape, Distribution::Default, &Default::default())
    }

    #[test]
    fn spatial_path_downsamples_by_eight() {
        let device = Default::default();
        let path = SpatialPath::<TestBackend>::new(3, 16, &device);

        assert_eq!(path.forward(input([1, 3, 64, 64])).dims(), [1, 16, 8, 8]);
        assert_eq!(path.forward(input([1, 3, 61, 63])).dims(), [1, 16, 8, 8]);
    }

    #[test]
    fn context_path_matches_requested_sizes() {
        let device = Default::default();
        let stage = ContextPathStage::<TestBackend>::new(12, 24, 8, &device);

        let (out_32x, out_16x) = stage.forward(input([2, 12, 4, 4]), input([2, 24, 2, 2]), [8, 8]);

        assert_eq!(out_32x.dims(), [2, 8, 4, 4]);
        assert_eq!(out_16x.dims(), [2, 8, 8, 8]);
    }

    #[test]
    fn feature_fusion_keeps_shape() {
        let device = Default::default();
        let ffm = FeatureFusionModule::<TestBackend>::new(16, 16, &device);

        assert_eq!(ffm.forward(input([1, 16, 5, 3])).dims(), [1, 16, 5, 3]);
    }

    #[test]
    fn head_upscales_with_pixel_shuffle() {
        let device = Default::default();
        let head = BiSeNetHead::<TestBackend>::new(8, 8, 3, 4, &device);

        assert_eq!(head.forward(input([1, 8, 2, 3])).dims(), [1, 3, 8, 12]);
    }

    #[test]
    fn bisenet_resnet18_with_aux() {
        let device = Default::default();
        let model = BiSeNetConfig::new(BackboneConfig::new(BackboneType::ResNet18), 19)
            .with_path_channels(32)
            .with_use_aux(true)
            .init::<TestBackend>(&device)
            .unwrap();

        let output = model.forward(input([2, 3, 65, 67]));

        assert_eq!(output.out.dims(), [2, 19, 65, 67]);
        assert_eq!(output.aux.map(|aux| aux.dims()), Some([2, 19, 65, 67]));
    }

    #[test]
    fn bisenet_without_aux_has_no_aux_output() {
        let device = Default::default();
        let model = BiSeNetConfig::new(BackboneConfig::new(BackboneType::ResNet18), 2)
            .with_path_channels(16)
            .init::<TestBackend>(&device)
            .unwrap();

        assert!(model.forward(input([1, 3, 64, 64])).aux.is_none());
    }
}
