//! Segmentation models, their configurations and the model registry.

pub mod aspp;
pub mod bisenet;
pub mod deeplabv3;
pub mod fcn;
mod registry;
mod weights;

use backbones::{BackboneConfig, BackboneWrapper, FeatureTaps};
use burn::prelude::*;

pub use aspp::{Aspp, AsppConfig};
pub use bisenet::{BiSeNet, BiSeNetConfig};
pub use deeplabv3::{DeepLabHead, DeepLabHeadConfig, DeepLabV3, DeepLabV3Config};
pub use fcn::{Fcn, FcnConfig, FcnHead, FcnHeadConfig};
pub use registry::{build_model, model_weights, model_zoo, resolve_model, ModelEntry};
pub use weights::{
    backbone_weights, cached_weights_path, resolve_backbone_weights, resolve_weights,
    validate_weights_input, BackboneCheckpoint, SegWeights,
};
#[cfg(feature = "pretrained")]
pub use weights::{fetch_weights, load_backbone_weights, load_model_weights};

use crate::error::{SegmentationError, SegmentationResult};

/// Output of a segmentation model: `out` and, when auxiliary heads were built, `aux`.
///
/// Both maps are `[batch_size, num_classes, height, width]` at the input resolution.
#[derive(Debug, Clone)]
pub struct SegmentationOutput<B: Backend> {
    pub out: Tensor<B, 4>,
    pub aux: Option<Tensor<B, 4>>,
}

impl<B: Backend> SegmentationOutput<B> {
    /// Look an output up by key (`"out"` or `"aux"`).
    pub fn get(&self, key: &str) -> Option<&Tensor<B, 4>> {
        match key {
            "out" => Some(&self.out),
            "aux" => self.aux.as_ref(),
            _ => None,
        }
    }

    /// Keys of the outputs present.
    pub fn keys(&self) -> Vec<&'static str> {
        if self.aux.is_some() {
            vec!["out", "aux"]
        } else {
            vec!["out"]
        }
    }
}

/// Resolve the stage indices of `taps` against the backbone's stage channels.
pub(crate) fn resolve_taps<const N: usize>(
    taps: &FeatureTaps,
    stage_channels: &[usize],
) -> SegmentationResult<[usize; N]> {
    taps.resolve(stage_channels.len())
        .and_then(|indices| indices.try_into().ok())
        .ok_or_else(|| SegmentationError::InvalidConfiguration {
            reason: format!(
                "feature taps {:?} do not fit a backbone with {} stages",
                taps.taps,
                stage_channels.len()
            ),
        })
}

/// Reject backbone settings the backbone cannot build.
pub(crate) fn check_backbone(config: &BackboneConfig) -> SegmentationResult<()> {
    let dilated = config.replace_stride_with_dilation.contains(&true);
    if dilated && !config.backbone.supports_dilation() {
        return Err(SegmentationError::InvalidConfiguration {
            reason: format!(
                "{} uses basic blocks and cannot replace stride with dilation",
                config.backbone.name()
            ),
        });
    }
    Ok(())
}

/// Configuration of any model in the zoo.
#[derive(Config, Debug)]
pub enum SegmentationModelConfig {
    BiSeNet(BiSeNetConfig),
    Fcn(FcnConfig),
    DeepLabV3(DeepLabV3Config),
}

impl SegmentationModelConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SegmentationResult<SegmentationModel<B>> {
        Ok(match self {
            Self::BiSeNet(config) => SegmentationModel::BiSeNet(config.init(device)?),
            Self::Fcn(config) => SegmentationModel::Fcn(config.init(device)?),
            Self::DeepLabV3(config) => SegmentationModel::DeepLabV3(config.init(device)?),
        })
    }

    pub const fn num_classes(&self) -> usize {
        match self {
            Self::BiSeNet(config) => config.num_classes,
            Self::Fcn(config) => config.num_classes,
            Self::DeepLabV3(config) => config.num_classes,
        }
    }

    pub const fn backbone(&self) -> &BackboneConfig {
        match self {
            Self::BiSeNet(config) => &config.backbone,
            Self::Fcn(config) => &config.backbone,
            Self::DeepLabV3(config) => &config.backbone,
        }
    }

    /// Whether the model produces an `aux` output.
    pub const fn has_aux(&self) -> bool {
        match self {
            Self::BiSeNet(config) => config.use_aux,
            Self::Fcn(config) => config.aux_loss,
            Self::DeepLabV3(config) => config.aux_loss,
        }
    }
}

/// Any model in the zoo.
#[derive(Module, Debug)]
pub enum SegmentationModel<B: Backend> {
    BiSeNet(BiSeNet<B>),
    Fcn(Fcn<B>),
    DeepLabV3(DeepLabV3<B>),
}

impl<B: Backend> SegmentationModel<B> {
    /// # Shapes
    ///   - input: `[batch_size, 3, height, width]`
    ///   - output: `[batch_size, num_classes, height, width]` for `out` and `aux`
    pub fn forward(&self, x: Tensor<B, 4>) -> SegmentationOutput<B> {
        match self {
            Self::BiSeNet(model) => model.forward(x),
            Self::Fcn(model) => model.forward(x),
            Self::DeepLabV3(model) => model.forward(x),
        }
    }

    /// Replace the backbone, e.g. with one carrying ImageNet weights.
    pub fn with_backbone(self, backbone: BackboneWrapper<B>) -> Self {
        match self {
            Self::BiSeNet(model) => Self::BiSeNet(model.with_backbone(backbone)),
            Self::Fcn(model) => Self::Fcn(model.with_backbone(backbone)),
            Self::DeepLabV3(model) => Self::DeepLabV3(model.with_backbone(backbone)),
        }
    }

    pub fn backbone(&self) -> &BackboneWrapper<B> {
        match self {
            Self::BiSeNet(model) => model.backbone(),
            Self::Fcn(model) => model.backbone(),
            Self::DeepLabV3(model) => model.backbone(),
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
    fn output_keys() {
        let device = Default::default();
        let tensor = Tensor::<TestBackend, 4>::zeros([1, 2, 3, 3], &device);

        let output = SegmentationOutput {
            out: tensor.clone(),
            aux: None,
        };
        assert_eq!(output.keys(), vec!["out"]);
        assert!(output.get("aux").is_none());
        assert!(output.get("logits").is_none());

        let output = SegmentationOutput {
            out: tensor.clone(),
            aux: Some(tensor),
        };
        assert_eq!(output.keys(), vec!["out", "aux"]);
        assert_eq!(output.get("aux").map(|aux| aux.dims()), Some([1, 2, 3, 3]));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = SegmentationModelConfig::Fcn(
            FcnConfig::new(BackboneConfig::new(BackboneType::Vgg16), 21).with_aux_loss(true),
        );
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SegmentationModelConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.num_classes(), 21);
        assert!(parsed.has_aux());
        assert_eq!(parsed.backbone().backbone, BackboneType::Vgg16);
    }

    #[test]
    fn model_enum_dispatches_forward() {
        let device = Default::default();
        let config = SegmentationModelConfig::Fcn(FcnConfig::new(
            BackboneConfig::new(BackboneType::ResNet18),
            4,
        ));
        let model = config.init::<TestBackend>(&device).unwrap();

        let input =
            Tensor::<TestBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device);
        let output = model.forward(input);
        assert_eq!(output.out.dims(), [1, 4, 32, 32]);
        assert_eq!(output.keys(), vec!["out"]);
    }

    #[test]
    fn resolve_taps_rejects_short_backbones() {
        let taps = FeatureTaps::out_aux(-4);
        assert_eq!(resolve_taps::<2>(&taps, &[16, 24, 40, 80]).unwrap(), [3, 0]);
        assert!(resolve_taps::<2>(&taps, &[16, 24, 40]).is_err());
        assert!(resolve_taps::<3>(&taps, &[16, 24, 40, 80]).is_err());
    }

    #[test]
    fn dilated_basic_block_resnet_is_an_error() {
        let device = Default::default();
        let backbone = BackboneConfig::new(BackboneType::ResNet18)
            .with_replace_stride_with_dilation([false, true, true]);

        let fcn = SegmentationModelConfig::Fcn(FcnConfig::new(backbone.clone(), 21));
        assert!(matches!(
            fcn.init::<TestBackend>(&device),
            Err(SegmentationError::InvalidConfiguration { .. })
        ));

        let bisenet = SegmentationModelConfig::BiSeNet(BiSeNetConfig::new(backbone, 19));
        assert!(bisenet.init::<TestBackend>(&device).is_err());

        let backbone = BackboneConfig::new(BackboneType::ResNet34)
            .with_replace_stride_with_dilation([false, false, true]);
        let deeplab = DeepLabV3Config::new(backbone, 21);
        assert!(deeplab.init::<TestBackend>(&device).is_err());
    }
}
