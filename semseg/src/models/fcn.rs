//! Fully convolutional network (FCN) segmentation model.

use backbones::{Backbone, BackboneConfig, BackboneWrapper, FeatureTaps};
use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};
use burn_extra_ops::resize_bilinear;

use super::{check_backbone, resolve_taps, SegmentationOutput};
use crate::error::SegmentationResult;

/// Configuration for [`FcnHead`].
#[derive(Config, Debug)]
pub struct FcnHeadConfig {
    pub in_channels: usize,
    pub num_classes: usize,
    #[config(default = "0.1")]
    pub dropout: f64,
}

impl FcnHeadConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> FcnHead<B> {
        let inter_channels = self.in_channels / 4;
        FcnHead {
            conv: Conv2dConfig::new([self.in_channels, inter_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(inter_channels).init(device),
            relu: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
            classifier: Conv2dConfig::new([inter_channels, self.num_classes], [1, 1]).init(device),
        }
    }
}

/// 3x3 conv (channels / 4), BN, ReLU, dropout and a 1x1 classifier.
///
/// Used as the FCN classifier and as the auxiliary classifier of every model with an
/// `aux` output.
#[derive(Module, Debug)]
pub struct FcnHead<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    dropout: Dropout,
    classifier: Conv2d<B>,
}

impl<B: Backend> FcnHead<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.bn.forward(self.conv.forward(x)));
        self.classifier.forward(self.dropout.forward(x))
    }
}

/// FCN configuration.
#[derive(Config, Debug)]
pub struct FcnConfig {
    pub backbone: BackboneConfig,
    pub num_classes: usize,
    /// Stage feeding the auxiliary classifier, counted from the end.
    #[config(default = "-2")]
    pub aux_stage: isize,
    #[config(default = "false")]
    pub aux_loss: bool,
}

impl FcnConfig {
    pub fn taps(&self) -> FeatureTaps {
        FeatureTaps::out_aux(self.aux_stage)
    }

    pub fn init<B: Backend>(&self, device: &Device<B>) -> SegmentationResult<Fcn<B>> {
        check_backbone(&self.backbone)?;
        let stage_channels = self.backbone.output_channels();
        let [out_index, aux_index] = resolve_taps(&self.taps(), &stage_channels)?;

        let classifier =
            FcnHeadConfig::new(stage_channels[out_index], self.num_classes).init(device);
        let aux_classifier = self
            .aux_loss
            .then(|| FcnHeadConfig::new(stage_channels[aux_index], self.num_classes).init(device));

        Ok(Fcn {
            backbone: self.backbone.init(device),
            classifier,
            aux_classifier,
            out_index,
            aux_index,
        })
    }
}

/// FCN model: backbone plus a [`FcnHead`] on its last stage.
#[derive(Module, Debug)]
pub struct Fcn<B: Backend> {
    backbone: BackboneWrapper<B>,
    classifier: FcnHead<B>,
    aux_classifier: Option<FcnHead<B>>,
    out_index: usize,
    aux_index: usize,
}

impl<B: Backend> Fcn<B> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use backbones::BackboneType;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn fcn_head_shape() {
        let device = Default::default();
        let head = FcnHeadConfig::new(64, 5).init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::random([2, 64, 3, 4], Distribution::Default, &device);
        assert_eq!(head.forward(input).dims(), [2, 5, 3, 4]);
    }

    #[test]
    fn fcn_resnet18_with_aux() {
        let device = Default::default();
        let model = FcnConfig::new(BackboneConfig::new(BackboneType::ResNet18), 3)
            .with_aux_loss(true)
            .init::<TestBackend>(&device)
            .unwrap();

        assert_eq!((model.out_index, model.aux_index), (3, 2));

        let input =
            Tensor::<TestBackend, 4>::random([1, 3, 61, 63], Distribution::Default, &device);
        let output = model.forward(input);

        assert_eq!(output.out.dims(), [1, 3, 61, 63]);
        assert_eq!(output.aux.map(|aux| aux.dims()), Some([1, 3, 61, 63]));
    }
}
