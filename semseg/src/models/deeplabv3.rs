//! DeepLabV3 segmentation model.

use backbones::{Backbone, BackboneConfig, BackboneWrapper, FeatureTaps};
use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};
use burn_extra_ops::resize_bilinear;

use super::{
    aspp::{Aspp, AsppConfig},
    fcn::{FcnHead, FcnHeadConfig},
    check_backbone, resolve_taps, SegmentationOutput,
};
use crate::error::SegmentationResult;

/// Configuration for [`DeepLabHead`].
#[derive(Config, Debug)]
pub struct DeepLabHeadConfig {
    pub in_channels: usize,
    pub num_classes: usize,
    #[config(default = "[12, 24, 36]")]
    pub atrous_rates: [usize; 3],
}

impl DeepLabHeadConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> DeepLabHead<B> {
        let aspp = AsppConfig::new(self.in_channels)
            .with_atrous_rates(self.atrous_rates)
            .init(device);
        let channels = 256;

        DeepLabHead {
            aspp,
            conv: Conv2dConfig::new([channels, channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(channels).init(device),
            relu: Relu::new(),
            classifier: Conv2dConfig::new([channels, self.num_classes], [1, 1]).init(device),
        }
    }
}

/// ASPP followed by a 3x3 conv block and a 1x1 classifier.
#[derive(Module, Debug)]
pub struct DeepLabHead<B: Backend> {
    aspp: Aspp<B>,
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    classifier: Conv2d<B>,
}

impl<B: Backend> DeepLabHead<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.aspp.forward(x);
        let x = self.relu.forward(self.bn.forward(self.conv.forward(x)));
        self.classifier.forward(x)
    }
}

/// DeepLabV3 configuration.
#[derive(Config, Debug)]
pub struct DeepLabV3Config {
    pub backbone: BackboneConfig,
    pub num_classes: usize,
    /// Stage feeding the auxiliary classifier, counted from the end.
    #[config(default = "-2")]
    pub aux_stage: isize,
    #[config(default = "false")]
    pub aux_loss: bool,
}

impl DeepLabV3Config {
    pub fn taps(&self) -> FeatureTaps {
        FeatureTaps::out_aux(self.aux_stage)
    }

    pub fn init<B: Backend>(&self, device: &Device<B>) -> SegmentationResult<DeepLabV3<B>> {
        check_backbone(&self.backbone)?;
        let stage_channels = self.backbone.output_channels();
        let [out_index, aux_index] = resolve_taps(&self.taps(), &stage_channels)?;

        let classifier =
            DeepLabHeadConfig::new(stage_channels[out_index], self.num_classes).init(device);
        let aux_classifier = self
            .aux_loss
            .then(|| FcnHeadConfig::new(stage_channels[aux_index], self.num_classes).init(device));

        Ok(DeepLabV3 {
            backbone: self.backbone.init(device),
            classifier,
            aux_classifier,
            out_index,
            aux_index,
        })
    }
}

/// DeepLabV3 model.
///
/// Implements "Rethinking Atrous Convolution for Semantic Image Segmentation"
/// (<https://arxiv.org/abs/1706.05587>).
#[derive(Module, Debug)]
pub struct DeepLabV3<B: Backend> {
    backbone: BackboneWrapper<B>,
    classifier: DeepLabHead<B>,
    aux_classifier: Option<FcnHead<B>>,
    out_index: usize,
    aux_index: usize,
}

impl<B: Backend> DeepLabV3<B> {
    pub fn with_backbone(mut self, backbone: BackboneWrapper<B>) -> Self {
        self.backbone = backbone;
        self
    }

    pub const fn backbone(&self) -> &BackboneWrapper<B> {
        &self.backbone
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> SegmentationOutput<B> {
        let [_, _, height, width] = x.dims();
        let features = self.backbone.forward(x);

        let out = self.classifier.forward(features[self.out_index].clone());
        let aux = self
            .aux_classifier
            .as_ref()
            .map(|head| {
                resize_bilinear(head.forward(features[self.aux_index].clone()), [height, width])
            });

        SegmentationOutput {
            out: resize_bilinear(out, [height, width]),
            aux,
        }
    }
}
