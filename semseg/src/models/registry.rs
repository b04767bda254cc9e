use std::{collections::BTreeMap, sync::LazyLock};

use backbones::{BackboneConfig, BackboneType};
use burn::prelude::*;
use tracing::info;

use super::{
    weights::{
        resolve_backbone_weights, resolve_weights, torchvision_aux_loss, validate_weights_input,
        BackboneCheckpoint, SegWeights, BISENET_RESNET18_WEIGHTS,
        DEEPLABV3_MOBILENET_V3_LARGE_WEIGHTS, DEEPLABV3_RESNET101_WEIGHTS,
        DEEPLABV3_RESNET50_WEIGHTS, FCN_RESNET101_WEIGHTS, FCN_RESNET34_WEIGHTS,
        FCN_RESNET50_WEIGHTS,
    },
    BiSeNetConfig, DeepLabV3Config, FcnConfig, SegmentationModel, SegmentationModelConfig,
};
use crate::{
    config::{BackboneWeights, ModelOptions, WeightsConfig},
    error::{SegmentationError, SegmentationResult},
};

/// A registered model: its pretrained weights and how to configure it.
#[derive(Clone)]
pub struct ModelEntry {
    pub name: &'static str,
    /// Model weights, `DEFAULT` first. Empty when none are published.
    pub weights: &'static [SegWeights],
    /// Backbone checkpoint picked by [`BackboneWeights::Default`].
    pub default_backbone_weights: &'static str,
    pub config_builder: fn(&ModelOptions) -> SegmentationResult<SegmentationModelConfig>,
}

impl core::fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModelEntry")
            .field("name", &self.name)
            .field("weights", &self.weights)
            .field("default_backbone_weights", &self.default_backbone_weights)
            .finish_non_exhaustive()
    }
}

impl ModelEntry {
    /// Build the model configuration for `options`.
    pub fn config(&self, options: &ModelOptions) -> SegmentationResult<SegmentationModelConfig> {
        (self.config_builder)(options)
    }

    /// Resolve the backbone weights of this model, `None` for random initialization.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentationError::UnsupportedWeights`] when `backbone` has no checkpoint
    /// with the requested name.
    pub fn resolve_backbone_weights(
        &self,
        backbone: &BackboneType,
        requested: &BackboneWeights,
    ) -> SegmentationResult<Option<&'static BackboneCheckpoint>> {
        match requested {
            BackboneWeights::Default => resolve_backbone_weights(
                backbone,
                &BackboneWeights::Named(self.default_backbone_weights.to_owned()),
            ),
            requested => resolve_backbone_weights(backbone, requested),
        }
    }
}

/// torchvision builds its segmentation models on the first ImageNet release of the backbone.
const TORCHVISION_BACKBONE_WEIGHTS: &str = "IMAGENET1K_V1";

fn dilated_resnet(backbone: BackboneType) -> BackboneConfig {
    BackboneConfig::new(backbone).with_replace_stride_with_dilation([false, true, true])
}

/// Resolve weights and class count for a model whose weights come from this project.
fn resolve_options(
    name: &str,
    weights: &'static [SegWeights],
    options: &ModelOptions,
) -> SegmentationResult<(usize, bool)> {
    let model_weights = resolve_weights(name, weights, options.weights.as_deref())?;
    let (_, num_classes) =
        validate_weights_input(model_weights, &options.weights_backbone, options.num_classes)?;
    Ok((num_classes, options.aux_loss.unwrap_or(false)))
}

/// Like [`resolve_options`], for models whose weights come from torchvision.
fn resolve_torchvision_options(
    name: &str,
    weights: &'static [SegWeights],
    options: &ModelOptions,
) -> SegmentationResult<(usize, bool)> {
    let model_weights = resolve_weights(name, weights, options.weights.as_deref())?;
    let (_, num_classes) =
        validate_weights_input(model_weights, &options.weights_backbone, options.num_classes)?;
    let aux_loss = torchvision_aux_loss(model_weights, options.aux_loss)?;
    Ok((num_classes, aux_loss))
}

fn bisenet(
    name: &str,
    weights: &'static [SegWeights],
    backbone: BackboneConfig,
    options: &ModelOptions,
) -> SegmentationResult<SegmentationModelConfig> {
    let (num_classes, aux_loss) = resolve_options(name, weights, options)?;
    Ok(SegmentationModelConfig::BiSeNet(
        BiSeNetConfig::new(backbone, num_classes).with_use_aux(aux_loss),
    ))
}

fn fcn(
    (num_classes, aux_loss): (usize, bool),
    backbone: BackboneConfig,
    aux_stage: isize,
) -> SegmentationModelConfig {
    SegmentationModelConfig::Fcn(
        FcnConfig::new(backbone, num_classes)
            .with_aux_stage(aux_stage)
            .with_aux_loss(aux_loss),
    )
}

fn deeplabv3(
    (num_classes, aux_loss): (usize, bool),
    backbone: BackboneConfig,
    aux_stage: isize,
) -> SegmentationModelConfig {
    SegmentationModelConfig::DeepLabV3(
        DeepLabV3Config::new(backbone, num_classes)
            .with_aux_stage(aux_stage)
            .with_aux_loss(aux_loss),
    )
}

static MODEL_ZOO: LazyLock<BTreeMap<&'static str, ModelEntry>> = LazyLock::new(|| {
    let models = [
        ModelEntry {
            name: "bisenet_resnet18",
            weights: BISENET_RESNET18_WEIGHTS,
            default_backbone_weights: "DEFAULT",
            config_builder: |options| {
                bisenet(
                    "bisenet_resnet18",
                    BISENET_RESNET18_WEIGHTS,
                    BackboneConfig::new(BackboneType::ResNet18),
                    options,
                )
            },
        },
        ModelEntry {
            name: "bisenet_resnet50",
            weights: &[],
            default_backbone_weights: "DEFAULT",
            config_builder: |options| {
                bisenet(
                    "bisenet_resnet50",
                    &[],
                    dilated_resnet(BackboneType::ResNet50),
                    options,
                )
            },
        },
        ModelEntry {
            name: "bisenet_xception",
            weights: &[],
            default_backbone_weights: "DEFAULT",
            config_builder: |options| {
                bisenet(
                    "bisenet_xception",
                    &[],
                    BackboneConfig::new(BackboneType::Xception),
                    options,
                )
            },
        },
        ModelEntry {
            name: "deeplabv3_mobilenet_v3_large",
            weights: DEEPLABV3_MOBILENET_V3_LARGE_WEIGHTS,
            default_backbone_weights: TORCHVISION_BACKBONE_WEIGHTS,
            config_builder: |options| {
                let resolved = resolve_torchvision_options(
                    "deeplabv3_mobilenet_v3_large",
                    DEEPLABV3_MOBILENET_V3_LARGE_WEIGHTS,
                    options,
                )?;
                let backbone =
                    BackboneConfig::new(BackboneType::MobileNetV3Large).with_dilated(true);
                Ok(deeplabv3(resolved, backbone, -4))
            },
        },
        ModelEntry {
            name: "deeplabv3_resnet34",
            weights: &[],
            default_backbone_weights: "DEFAULT",
            config_builder: |options| {
                let resolved = resolve_options("deeplabv3_resnet34", &[], options)?;
                Ok(deeplabv3(resolved, BackboneConfig::new(BackboneType::ResNet34), -2))
            },
        },
        ModelEntry {
            name: "deeplabv3_resnet50",
            weights: DEEPLABV3_RESNET50_WEIGHTS,
            default_backbone_weights: TORCHVISION_BACKBONE_WEIGHTS,
            config_builder: |options| {
                let resolved = resolve_torchvision_options(
                    "deeplabv3_resnet50",
                    DEEPLABV3_RESNET50_WEIGHTS,
                    options,
                )?;
                Ok(deeplabv3(resolved, dilated_resnet(BackboneType::ResNet50), -2))
            },
        },
        ModelEntry {
            name: "deeplabv3_resnet101",
            weights: DEEPLABV3_RESNET101_WEIGHTS,
            default_backbone_weights: TORCHVISION_BACKBONE_WEIGHTS,
            config_builder: |options| {
                let resolved = resolve_torchvision_options(
                    "deeplabv3_resnet101",
                    DEEPLABV3_RESNET101_WEIGHTS,
                    options,
                )?;
                Ok(deeplabv3(resolved, dilated_resnet(BackboneType::ResNet101), -2))
            },
        },
        ModelEntry {
            name: "fcn_mobilenet_v3_large",
            weights: &[],
            default_backbone_weights: "DEFAULT",
            config_builder: |options| {
                let resolved = resolve_options("fcn_mobilenet_v3_large", &[], options)?;
                Ok(fcn(resolved, BackboneConfig::new(BackboneType::MobileNetV3Large), -4))
            },
        },
        ModelEntry {
            name: "fcn_resnet34",
            weights: FCN_RESNET34_WEIGHTS,
            default_backbone_weights: "DEFAULT",
            config_builder: |options| {
                let resolved = resolve_options("fcn_resnet34", FCN_RESNET34_WEIGHTS, options)?;
                Ok(fcn(resolved, BackboneConfig::new(BackboneType::ResNet34), -2))
            },
        },
        ModelEntry {
            name: "fcn_resnet50",
            weights: FCN_RESNET50_WEIGHTS,
            default_backbone_weights: TORCHVISION_BACKBONE_WEIGHTS,
            config_builder: |options| {
                let resolved =
                    resolve_torchvision_options("fcn_resnet50", FCN_RESNET50_WEIGHTS, options)?;
                Ok(fcn(resolved, dilated_resnet(BackboneType::ResNet50), -2))
            },
        },
        ModelEntry {
            name: "fcn_resnet101",
            weights: FCN_RESNET101_WEIGHTS,
            default_backbone_weights: TORCHVISION_BACKBONE_WEIGHTS,
            config_builder: |options| {
                let resolved =
                    resolve_torchvision_options("fcn_resnet101", FCN_RESNET101_WEIGHTS, options)?;
                Ok(fcn(resolved, dilated_resnet(BackboneType::ResNet101), -2))
            },
        },
        ModelEntry {
            name: "fcn_vgg16",
            weights: &[],
            default_backbone_weights: "DEFAULT",
            config_builder: |options| {
                let resolved = resolve_options("fcn_vgg16", &[], options)?;
                Ok(fcn(resolved, BackboneConfig::new(BackboneType::Vgg16), -2))
            },
        },
    ];

    models.into_iter().map(|entry| (entry.name, entry)).collect()
});

static MODEL_WEIGHTS: LazyLock<BTreeMap<&'static str, &'static [SegWeights]>> =
    LazyLock::new(|| {
        MODEL_ZOO
            .values()
            .filter(|entry| !entry.weights.is_empty())
            .map(|entry| (entry.name, entry.weights))
            .collect()
    });

/// Every registered model, by name.
pub fn model_zoo() -> &'static BTreeMap<&'static str, ModelEntry> {
    &MODEL_ZOO
}

/// Models with published weights, by name.
pub fn model_weights() -> &'static BTreeMap<&'static str, &'static [SegWeights]> {
    &MODEL_WEIGHTS
}

/// Look a model up by name.
pub fn resolve_model(name: &str) -> SegmentationResult<&'static ModelEntry> {
    MODEL_ZOO
        .get(name)
        .ok_or_else(|| SegmentationError::UnknownModel {
            name: name.to_owned(),
            available: MODEL_ZOO.keys().copied().collect::<Vec<_>>().join(", "),
        })
}

/// Build the model registered under `name`, loading its pretrained weights.
///
/// Model weights take precedence over backbone weights. Loading requires the
/// `pretrained` feature; without it, explicitly requested weights are an error and
/// `BackboneWeights::Default` falls back to random initialization.
pub fn build_model<B: Backend>(
    name: &str,
    options: &ModelOptions,
    weights_config: &WeightsConfig,
    device: &B::Device,
) -> SegmentationResult<SegmentationModel<B>> {
    let entry = resolve_model(name)?;
    let model_weights = resolve_weights(entry.name, entry.weights, options.weights.as_deref())?;
    let (backbone_weights, _) =
        validate_weights_input(model_weights, &options.weights_backbone, options.num_classes)?;

    let config = entry.config(options)?;
    let model = config.init(device)?;
    info!(
        model = name,
        num_classes = config.num_classes(),
        aux = config.has_aux(),
        "Built model"
    );

    if let Some(weights) = model_weights {
        return load_pretrained_model(model, &config, weights, weights_config, device);
    }

    let backbone = &config.backbone().backbone;
    let Some(checkpoint) = entry.resolve_backbone_weights(backbone, &backbone_weights)? else {
        return Ok(model);
    };

    #[cfg(feature = "pretrained")]
    let model = load_pretrained_backbone(model, &config, checkpoint, weights_config, device)?;
    #[cfg(not(feature = "pretrained"))]
    let model = skip_pretrained_backbone(
        model,
        &config,
        checkpoint,
        matches!(backbone_weights, BackboneWeights::Named(_)),
    )?;
    Ok(model)
}

#[cfg(feature = "pretrained")]
fn load_pretrained_model<B: Backend>(
    model: SegmentationModel<B>,
    config: &SegmentationModelConfig,
    weights: &SegWeights,
    weights_config: &WeightsConfig,
    device: &B::Device,
) -> SegmentationResult<SegmentationModel<B>> {
    let path = super::fetch_weights(weights.url, weights_config)?;
    super::load_model_weights(model, config, &path, device)
}

#[cfg(not(feature = "pretrained"))]
fn load_pretrained_model<B: Backend>(
    _model: SegmentationModel<B>,
    _config: &SegmentationModelConfig,
    weights: &SegWeights,
    _weights_config: &WeightsConfig,
    _device: &B::Device,
) -> SegmentationResult<SegmentationModel<B>> {
    Err(SegmentationError::WeightLoadingFailed {
        reason: format!(
            "cannot load the {} weights, semseg-burn was built without the `pretrained` feature",
            weights.name
        ),
    })
}

#[cfg(feature = "pretrained")]
fn load_pretrained_backbone<B: Backend>(
    model: SegmentationModel<B>,
    config: &SegmentationModelConfig,
    checkpoint: &BackboneCheckpoint,
    weights_config: &WeightsConfig,
    device: &B::Device,
) -> SegmentationResult<SegmentationModel<B>> {
    let path = super::fetch_weights(checkpoint.url, weights_config)?;
    let backbone =
        super::load_backbone_weights(model.backbone().clone(), config.backbone(), &path, device)?;
    Ok(model.with_backbone(backbone))
}

/// Without the `pretrained` feature only explicitly named backbone weights are an error.
#[cfg(not(feature = "pretrained"))]
fn skip_pretrained_backbone<B: Backend>(
    model: SegmentationModel<B>,
    config: &SegmentationModelConfig,
    checkpoint: &BackboneCheckpoint,
    explicit: bool,
) -> SegmentationResult<SegmentationModel<B>> {
    let backbone = config.backbone().backbone.name();
    if explicit {
        return Err(SegmentationError::WeightLoadingFailed {
            reason: format!(
                "cannot load the {backbone} {} weights, semseg-burn was built without the \
                 `pretrained` feature",
                checkpoint.name
            ),
        });
    }
    tracing::warn!(
        backbone,
        "Built without the `pretrained` feature, the backbone is randomly initialized"
    );
    Ok(model)
}
