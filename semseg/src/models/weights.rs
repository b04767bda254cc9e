//! Pretrained weights: the weights tables, option validation, download cache and
//! PyTorch checkpoint loading.

use std::path::PathBuf;

use backbones::{BackboneConfig, BackboneType, VggConfig};
use serde::Serialize;

use super::SegmentationModelConfig;
use crate::{
    config::{BackboneWeights, WeightsConfig},
    datasets::{CITYSCAPES_LABELS, VOC_LABELS},
    error::{SegmentationError, SegmentationResult},
};

/// Named pretrained weights of a segmentation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegWeights {
    pub name: &'static str,
    /// Absolute URL, or a path relative to [`WeightsConfig::base_url`].
    pub url: &'static str,
    /// Class labels the weights were trained on.
    pub labels: &'static [&'static str],
    pub description: &'static str,
}

impl SegWeights {
    pub const fn num_classes(&self) -> usize {
        self.labels.len()
    }

    /// Weights hosted by torchvision carry an auxiliary classifier.
    pub fn is_torchvision(&self) -> bool {
        self.url.starts_with(TORCHVISION_URL)
    }
}

/// ImageNet checkpoint of a backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackboneCheckpoint {
    pub name: &'static str,
    pub url: &'static str,
}

const TORCHVISION_URL: &str = "https://download.pytorch.org/models/";

const COCO_WITH_VOC_LABELS: &str =
    "Trained on a subset of COCO, using only the 20 categories that are present in the Pascal VOC dataset";

// The first entry of every table is the `DEFAULT` weights.

pub(crate) const BISENET_RESNET18_WEIGHTS: &[SegWeights] = &[SegWeights {
    name: "CITYSCAPES_FINE",
    url: "bisenet/bisenet_resnet18-cityscapes-512x1024-20250305.pth",
    labels: CITYSCAPES_LABELS,
    description: "Trained on Cityscapes (fine) dataset",
}];

pub(crate) const FCN_RESNET34_WEIGHTS: &[SegWeights] = &[SegWeights {
    name: "VOC2012",
    url: "fcn/fcn_resnet34-voc2012-500x500-20250221.pth",
    labels: VOC_LABELS,
    description: "Trained on PASCAL VOC 2012 dataset",
}];

pub(crate) const FCN_RESNET50_WEIGHTS: &[SegWeights] = &[SegWeights {
    name: "COCO_WITH_VOC_LABELS_V1",
    url: "https://download.pytorch.org/models/fcn_resnet50_coco-1167a1af.pth",
    labels: VOC_LABELS,
    description: COCO_WITH_VOC_LABELS,
}];

pub(crate) const FCN_RESNET101_WEIGHTS: &[SegWeights] = &[SegWeights {
    name: "COCO_WITH_VOC_LABELS_V1",
    url: "https://download.pytorch.org/models/fcn_resnet101_coco-7ecb50ca.pth",
    labels: VOC_LABELS,
    description: COCO_WITH_VOC_LABELS,
}];

pub(crate) const DEEPLABV3_RESNET50_WEIGHTS: &[SegWeights] = &[SegWeights {
    name: "COCO_WITH_VOC_LABELS_V1",
    url: "https://download.pytorch.org/models/deeplabv3_resnet50_coco-cd0a2569.pth",
    labels: VOC_LABELS,
    description: COCO_WITH_VOC_LABELS,
}];

pub(crate) const DEEPLABV3_RESNET101_WEIGHTS: &[SegWeights] = &[SegWeights {
    name: "COCO_WITH_VOC_LABELS_V1",
    url: "https://download.pytorch.org/models/deeplabv3_resnet101_coco-586e9e4e.pth",
    labels: VOC_LABELS,
    description: COCO_WITH_VOC_LABELS,
}];

pub(crate) const DEEPLABV3_MOBILENET_V3_LARGE_WEIGHTS: &[SegWeights] = &[SegWeights {
    name: "COCO_WITH_VOC_LABELS_V1",
    url: "https://download.pytorch.org/models/deeplabv3_mobilenet_v3_large-fc3c493d.pth",
    labels: VOC_LABELS,
    description: COCO_WITH_VOC_LABELS,
}];

const fn checkpoint(name: &'static str, url: &'static str) -> BackboneCheckpoint {
    BackboneCheckpoint { name, url }
}

const RESNET18_CHECKPOINTS: &[BackboneCheckpoint] = &[checkpoint(
    "IMAGENET1K_V1",
    "https://download.pytorch.org/models/resnet18-f37072fd.pth",
)];

const RESNET34_CHECKPOINTS: &[BackboneCheckpoint] = &[checkpoint(
    "IMAGENET1K_V1",
    "https://download.pytorch.org/models/resnet34-b627a593.pth",
)];

const RESNET50_CHECKPOINTS: &[BackboneCheckpoint] = &[
    checkpoint(
        "IMAGENET1K_V2",
        "https://download.pytorch.org/models/resnet50-11ad3fa6.pth",
    ),
    checkpoint(
        "IMAGENET1K_V1",
        "https://download.pytorch.org/models/resnet50-0676ba61.pth",
    ),
];

const RESNET101_CHECKPOINTS: &[BackboneCheckpoint] = &[
    checkpoint(
        "IMAGENET1K_V2",
        "https://download.pytorch.org/models/resnet101-cd907fc2.pth",
    ),
    checkpoint(
        "IMAGENET1K_V1",
        "https://download.pytorch.org/models/resnet101-63fe2227.pth",
    ),
];

const RESNET152_CHECKPOINTS: &[BackboneCheckpoint] = &[
    checkpoint(
        "IMAGENET1K_V2",
        "https://download.pytorch.org/models/resnet152-f82ba261.pth",
    ),
    checkpoint(
        "IMAGENET1K_V1",
        "https://download.pytorch.org/models/resnet152-394f9c45.pth",
    ),
];

const VGG16_CHECKPOINTS: &[BackboneCheckpoint] = &[checkpoint(
    "IMAGENET1K_V1",
    "https://download.pytorch.org/models/vgg16-397923af.pth",
)];

const VGG16_BN_CHECKPOINTS: &[BackboneCheckpoint] = &[checkpoint(
    "IMAGENET1K_V1",
    "https://download.pytorch.org/models/vgg16_bn-6c64b313.pth",
)];

// Cadene's pretrainedmodels release, the original Keras port. Its pointwise kernels are
// stored as `[out, in]`, the layout of `PointwiseConv2d`.
const XCEPTION_CHECKPOINTS: &[BackboneCheckpoint] = &[checkpoint(
    "IMAGENET1K_V1",
    "http://data.lip6.fr/cadene/pretrainedmodels/xception-43020ad28.pth",
)];

const MOBILENET_V3_LARGE_CHECKPOINTS: &[BackboneCheckpoint] = &[
    checkpoint(
        "IMAGENET1K_V2",
        "https://download.pytorch.org/models/mobilenet_v3_large-5c1a4163.pth",
    ),
    checkpoint(
        "IMAGENET1K_V1",
        "https://download.pytorch.org/models/mobilenet_v3_large-8738ca79.pth",
    ),
];

/// ImageNet checkpoints of `backbone`, `DEFAULT` first.
pub const fn backbone_weights(backbone: &BackboneType) -> &'static [BackboneCheckpoint] {
    match backbone {
        BackboneType::ResNet18 => RESNET18_CHECKPOINTS,
        BackboneType::ResNet34 => RESNET34_CHECKPOINTS,
        BackboneType::ResNet50 => RESNET50_CHECKPOINTS,
        BackboneType::ResNet101 => RESNET101_CHECKPOINTS,
        BackboneType::ResNet152 => RESNET152_CHECKPOINTS,
        BackboneType::Vgg16 => VGG16_CHECKPOINTS,
        BackboneType::Vgg16Bn => VGG16_BN_CHECKPOINTS,
        BackboneType::Xception => XCEPTION_CHECKPOINTS,
        BackboneType::MobileNetV3Large => MOBILENET_V3_LARGE_CHECKPOINTS,
    }
}

/// Resolve the requested model weights name (`DEFAULT` or an entry name).
///
/// # Errors
///
/// Returns [`SegmentationError::UnsupportedWeights`] when `model` has no weights at all or
/// none with the requested name.
pub fn resolve_weights(
    model: &str,
    weights: &'static [SegWeights],
    requested: Option<&str>,
) -> SegmentationResult<Option<&'static SegWeights>> {
    let Some(requested) = requested else {
        return Ok(None);
    };
    if weights.is_empty() {
        return Err(SegmentationError::UnsupportedWeights {
            model: model.to_owned(),
            reason: "weights are not supported yet".to_owned(),
        });
    }
    if requested == "DEFAULT" {
        return Ok(weights.first());
    }
    weights
        .iter()
        .find(|w| w.name == requested)
        .map(Some)
        .ok_or_else(|| SegmentationError::UnsupportedWeights {
            model: model.to_owned(),
            reason: format!(
                "no weights named '{requested}', expected one of: DEFAULT, {}",
                weights.iter().map(|w| w.name).collect::<Vec<_>>().join(", ")
            ),
        })
}

/// Resolve the requested backbone weights to a checkpoint, `None` for random init.
pub fn resolve_backbone_weights(
    backbone: &BackboneType,
    requested: &BackboneWeights,
) -> SegmentationResult<Option<&'static BackboneCheckpoint>> {
    let checkpoints = backbone_weights(backbone);
    match requested {
        BackboneWeights::None => Ok(None),
        BackboneWeights::Default => Ok(checkpoints.first()),
        BackboneWeights::Named(name) if name == "DEFAULT" => Ok(checkpoints.first()),
        BackboneWeights::Named(name) => checkpoints
            .iter()
            .find(|c| c.name == name)
            .map(Some)
            .ok_or_else(|| SegmentationError::UnsupportedWeights {
                model: backbone.name().to_owned(),
                reason: format!("no backbone weights named '{name}'"),
            }),
    }
}

/// Reconcile model weights with the backbone weights and class count.
///
/// With model weights the backbone weights are dropped and `num_classes` must match the
/// weights' labels. Without them `num_classes` defaults to 21.
pub fn validate_weights_input(
    weights: Option<&SegWeights>,
    weights_backbone: &BackboneWeights,
    num_classes: Option<usize>,
) -> SegmentationResult<(BackboneWeights, usize)> {
    match weights {
        Some(weights) => {
            let expected = weights.num_classes();
            match num_classes {
                Some(n) if n != expected => Err(SegmentationError::InvalidConfiguration {
                    reason: format!(
                        "num_classes is {n} but the {} weights have {expected} classes",
                        weights.name
                    ),
                }),
                _ => Ok((BackboneWeights::None, expected)),
            }
        }
        None => Ok((weights_backbone.clone(), num_classes.unwrap_or(21))),
    }
}

/// `aux_loss` for models whose weights are hosted by torchvision.
pub(crate) fn torchvision_aux_loss(
    weights: Option<&SegWeights>,
    aux_loss: Option<bool>,
) -> SegmentationResult<bool> {
    match (weights, aux_loss) {
        (Some(w), Some(false)) if w.is_torchvision() => {
            Err(SegmentationError::InvalidConfiguration {
                reason: format!(
                    "aux_loss=false conflicts with the {} weights, which include an auxiliary \
                     classifier",
                    w.name
                ),
            })
        }
        (Some(w), _) if w.is_torchvision() => Ok(true),
        (_, aux_loss) => Ok(aux_loss.unwrap_or(false)),
    }
}

/// Absolute URL of `url` and the cache file it is stored in (named after the URL basename).
pub fn cached_weights_path(
    url: &str,
    config: &WeightsConfig,
) -> SegmentationResult<(String, PathBuf)> {
    let url = config.resolve_url(url)?;
    let file_name = url
        .rsplit_once('/')
        .map(|(_, name)| name)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| SegmentationError::WeightLoadingFailed {
            reason: format!("'{url}' does not name a file"),
        })?;
    let path = config.resolve_cache_dir()?.join(file_name);
    Ok((url, path))
}

/// Download `url` into the cache directory unless it is already there.
#[cfg(feature = "pretrained")]
pub fn fetch_weights(url: &str, config: &WeightsConfig) -> SegmentationResult<PathBuf> {
    use burn::data::network::downloader;

    let (url, path) = cached_weights_path(url, config)?;
    if path.exists() {
        tracing::debug!(path = %path.display(), "Using cached weights");
        return Ok(path);
    }

    let io_error = |e: std::io::Error| SegmentationError::WeightLoadingFailed {
        reason: format!("{}: {e}", path.display()),
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(io_error)?;
    }

    tracing::info!(url = %url, path = %path.display(), "Downloading weights");
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = downloader::download_file_as_bytes(&url, &file_name);

    let partial = path.with_extension("part");
    std::fs::write(&partial, &bytes).map_err(io_error)?;
    std::fs::rename(&partial, &path).map_err(io_error)?;
    Ok(path)
}

fn escape(prefix: &str) -> String {
    prefix.replace('.', "\\.")
}

fn remap(pattern: String, replacement: String) -> (String, String) {
    (pattern, replacement)
}

/// Where the backbone layers sit in an ImageNet classification checkpoint.
pub(crate) const fn imagenet_prefix(backbone: &BackboneType) -> &'static str {
    match backbone {
        BackboneType::Vgg16 | BackboneType::Vgg16Bn | BackboneType::MobileNetV3Large => {
            "features."
        }
        _ => "",
    }
}

/// Key remaps from PyTorch parameter names under `torch_prefix` to this crate's
/// backbone module tree under `prefix`.
pub(crate) fn backbone_key_remaps(
    config: &BackboneConfig,
    torch_prefix: &str,
    prefix: &str,
) -> Vec<(String, String)> {
    let t = escape(torch_prefix);
    let p = prefix;

    match config.backbone {
        BackboneType::Vgg16 | BackboneType::Vgg16Bn => {
            let vgg = VggConfig::new().with_batch_norm(config.backbone == BackboneType::Vgg16Bn);
            let mut remaps = Vec::new();
            for (stage, conv, index) in vgg.torchvision_feature_indices() {
                remaps.push(remap(
                    format!(r"^{t}{index}\.(.+)"),
                    format!("{p}stages.{stage}.convs.{conv}.conv.$1"),
                ));
                if vgg.batch_norm {
                    remaps.push(remap(
                        format!(r"^{t}{}\.(.+)", index + 1),
                        format!("{p}stages.{stage}.convs.{conv}.batch_norm.$1"),
                    ));
                }
            }
            remaps
        }
        BackboneType::MobileNetV3Large => vec![
            remap(
                format!(r"^{t}(\d+)\.block\.(\d+)\.0\.(.+)"),
                format!("{p}features.$1.block.$2.conv.$3"),
            ),
            remap(
                format!(r"^{t}(\d+)\.block\.(\d+)\.1\.(.+)"),
                format!("{p}features.$1.block.$2.bn.$3"),
            ),
            remap(
                format!(r"^{t}(\d+)\.block\.(\d+)\.(fc[12])\.(.+)"),
                format!("{p}features.$1.block.$2.$3.$4"),
            ),
            remap(format!(r"^{t}(\d+)\.0\.(.+)"), format!("{p}features.$1.conv.$2")),
            remap(format!(r"^{t}(\d+)\.1\.(.+)"), format!("{p}features.$1.bn.$2")),
        ],
        BackboneType::Xception => {
            let mut remaps: Vec<_> = (4..=11)
                .map(|block| {
                    remap(
                        format!(r"^{t}block{block}\.(.+)"),
                        format!("{p}middle.{}.$1", block - 4),
                    )
                })
                .collect();
            remaps.push(remap(
                format!(r"^{t}(conv[1-4]|bn[1-4]|block1|block2|block3|block12)\.(.+)"),
                format!("{p}$1.$2"),
            ));
            remaps
        }
        // ResNet
        _ => vec![
            remap(format!(r"^{t}conv1\.(.+)"), format!("{p}conv1_block.conv1.$1")),
            remap(format!(r"^{t}bn1\.(.+)"), format!("{p}conv1_block.bn1.$1")),
            remap(
                format!(r"^{t}layer([1-4])\.(\d+)\.downsample\.0\.(.+)"),
                format!("{p}layer$1.blocks.$2.downsample.conv.$3"),
            ),
            remap(
                format!(r"^{t}layer([1-4])\.(\d+)\.downsample\.1\.(.+)"),
                format!("{p}layer$1.blocks.$2.downsample.bn.$3"),
            ),
            remap(
                format!(r"^{t}layer([1-4])\.(\d+)\.(.+)"),
                format!("{p}layer$1.blocks.$2.$3"),
            ),
        ],
    }
}

/// Remaps of an `FcnHead` stored as a torch `Sequential` under `name`.
fn fcn_head_remaps(name: &str) -> Vec<(String, String)> {
    [("0", "conv"), ("1", "bn"), ("4", "classifier")]
        .into_iter()
        .map(|(index, field)| {
            remap(
                format!(r"^{name}\.{index}\.(.+)"),
                format!("{name}.{field}.$1"),
            )
        })
        .collect()
}

/// Key remaps from a full PyTorch segmentation checkpoint to `config`'s module tree.
pub(crate) fn model_key_remaps(config: &SegmentationModelConfig) -> Vec<(String, String)> {
    let mut remaps = backbone_key_remaps(config.backbone(), "backbone.", "backbone.");

    match config {
        SegmentationModelConfig::Fcn(_) => {
            remaps.extend(fcn_head_remaps("classifier"));
            remaps.extend(fcn_head_remaps("aux_classifier"));
        }
        SegmentationModelConfig::DeepLabV3(_) => {
            let head = [
                (r"0\.convs\.([0-3])\.0\.(.+)", "aspp.convs.$1.conv.$2"),
                (r"0\.convs\.([0-3])\.1\.(.+)", "aspp.convs.$1.bn.$2"),
                (r"0\.convs\.4\.1\.(.+)", "aspp.pooling.conv.$1"),
                (r"0\.convs\.4\.2\.(.+)", "aspp.pooling.bn.$1"),
                (r"0\.project\.0\.(.+)", "aspp.project.conv.$1"),
                (r"0\.project\.1\.(.+)", "aspp.project.bn.$1"),
                (r"1\.(.+)", "conv.$1"),
                (r"2\.(.+)", "bn.$1"),
                (r"4\.(.+)", "classifier.$1"),
            ];
            remaps.extend(head.into_iter().map(|(torch, ours)| {
                remap(format!(r"^classifier\.{torch}"), format!("classifier.{ours}"))
            }));
            remaps.extend(fcn_head_remaps("aux_classifier"));
        }
        SegmentationModelConfig::BiSeNet(_) => {
            // ConvNormAct is a torch Sequential (conv, bn, relu)
            let conv_norm_act = [
                r"spatial_path\.(\d)",
                r"context_path_stage\.(arm_16x|arm_32x)\.conv",
                r"context_path_stage\.(conv_16x|conv_32x|conv_global)",
                r"(ffm)\.conv",
                r"(head|aux_heads\.head_16x|aux_heads\.head_32x)\.0",
            ];
            let ours = [
                "spatial_path.layers.$1",
                "context_path_stage.$1.conv",
                "context_path_stage.$1",
                "$1.conv",
                "$1.conv",
            ];
            remaps.push(remap(
                r"^aux_heads\.(16x|32x)\.(.+)".to_owned(),
                "aux_heads.head_$1.$2".to_owned(),
            ));
            for (torch, ours) in conv_norm_act.iter().zip(ours) {
                remaps.push(remap(format!(r"^{torch}\.0\.(.+)"), format!("{ours}.conv.$2")));
                remaps.push(remap(format!(r"^{torch}\.1\.(.+)"), format!("{ours}.bn.$2")));
            }
            remaps.extend([
                remap(
                    r"^context_path_stage\.(arm_16x|arm_32x)\.attention\.1\.(.+)".to_owned(),
                    "context_path_stage.$1.attention_conv.$2".to_owned(),
                ),
                remap(
                    r"^context_path_stage\.(arm_16x|arm_32x)\.attention\.2\.(.+)".to_owned(),
                    "context_path_stage.$1.attention_bn.$2".to_owned(),
                ),
                remap(r"^ffm\.attention\.1\.(.+)".to_owned(), "ffm.attention_reduce.$1".to_owned()),
                remap(r"^ffm\.attention\.3\.(.+)".to_owned(), "ffm.attention_expand.$1".to_owned()),
                remap(
                    r"^(head|aux_heads\.head_16x|aux_heads\.head_32x)\.1\.0\.(.+)".to_owned(),
                    "$1.upscale.conv.$2".to_owned(),
                ),
            ]);
        }
    }
    remaps
}

#[cfg(feature = "pretrained")]
mod loading {
    use std::path::Path;

    use backbones::{BackboneConfig, BackboneWrapper};
    use burn::{
        prelude::*,
        record::{FullPrecisionSettings, Recorder},
    };
    use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

    use super::{backbone_key_remaps, imagenet_prefix, model_key_remaps};
    use crate::{
        error::{SegmentationError, SegmentationResult},
        models::{SegmentationModel, SegmentationModelConfig},
    };

    fn load_pytorch<B: Backend, M: Module<B>>(
        module: M,
        path: &Path,
        remaps: &[(String, String)],
        device: &B::Device,
    ) -> SegmentationResult<M> {
        let load_args = remaps
            .iter()
            .fold(LoadArgs::new(path.to_path_buf()), |args, (pattern, replacement)| {
                args.with_key_remap(pattern, replacement)
            });
        let recorder = PyTorchFileRecorder::<FullPrecisionSettings>::default();
        let record: M::Record =
            recorder
                .load(load_args, device)
                .map_err(|e| SegmentationError::WeightLoadingFailed {
                    reason: format!("{}: {e}", path.display()),
                })?;

        tracing::info!(path = %path.display(), "Loaded PyTorch weights");
        Ok(module.load_record(record))
    }

    /// Load a full segmentation checkpoint into `model`.
    pub fn load_model_weights<B: Backend>(
        model: SegmentationModel<B>,
        config: &SegmentationModelConfig,
        path: &Path,
        device: &B::Device,
    ) -> SegmentationResult<SegmentationModel<B>> {
        let remaps = model_key_remaps(config);
        Ok(match model {
            SegmentationModel::BiSeNet(m) => {
                SegmentationModel::BiSeNet(load_pytorch(m, path, &remaps, device)?)
            }
            SegmentationModel::Fcn(m) => {
                SegmentationModel::Fcn(load_pytorch(m, path, &remaps, device)?)
            }
            SegmentationModel::DeepLabV3(m) => {
                SegmentationModel::DeepLabV3(load_pytorch(m, path, &remaps, device)?)
            }
        })
    }

    /// Load an ImageNet classification checkpoint into `backbone`; the classifier is ignored.
    pub fn load_backbone_weights<B: Backend>(
        backbone: BackboneWrapper<B>,
        config: &BackboneConfig,
        path: &Path,
        device: &B::Device,
    ) -> SegmentationResult<BackboneWrapper<B>> {
        let remaps = backbone_key_remaps(config, imagenet_prefix(&config.backbone), "");
        Ok(match backbone {
            BackboneWrapper::ResNet(b) => {
                BackboneWrapper::ResNet(load_pytorch(b, path, &remaps, device)?)
            }
            BackboneWrapper::VGG(b) => {
                BackboneWrapper::VGG(load_pytorch(b, path, &remaps, device)?)
            }
            BackboneWrapper::Xception(b) => {
                BackboneWrapper::Xception(load_pytorch(b, path, &remaps, device)?)
            }
            BackboneWrapper::MobileNetV3(b) => {
                BackboneWrapper::MobileNetV3(load_pytorch(b, path, &remaps, device)?)
            }
        })
    }
}

#[cfg(feature = "pretrained")]
pub use loading::{load_backbone_weights, load_model_weights};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BiSeNetConfig, DeepLabV3Config, FcnConfig};

    #[test]
    fn resolve_default_and_named_weights() {
        let default =
            resolve_weights("fcn_resnet34", FCN_RESNET34_WEIGHTS, Some("DEFAULT")).unwrap();
        assert_eq!(default.map(|w| w.name), Some("VOC2012"));

        let named = resolve_weights("fcn_resnet34", FCN_RESNET34_WEIGHTS, Some("VOC2012")).unwrap();
        assert_eq!(named, default);

        assert_eq!(resolve_weights("fcn_resnet34", FCN_RESNET34_WEIGHTS, None).unwrap(), None);
    }

    #[test]
    fn unknown_or_unsupported_weights_are_rejected() {
        let err =
            resolve_weights("fcn_resnet34", FCN_RESNET34_WEIGHTS, Some("ADE20K")).unwrap_err();
        assert!(matches!(err, SegmentationError::UnsupportedWeights { .. }));

        let err = resolve_weights("fcn_vgg16", &[], Some("DEFAULT")).unwrap_err();
        assert!(err.to_string().contains("not supported yet"));
    }

    #[test]
    fn validate_weights_input_uses_weights_labels() {
        let weights = &BISENET_RESNET18_WEIGHTS[0];

        let (backbone, num_classes) =
            validate_weights_input(Some(weights), &BackboneWeights::Default, None).unwrap();
        assert_eq!(backbone, BackboneWeights::None);
        assert_eq!(num_classes, 19);

        assert!(validate_weights_input(Some(weights), &BackboneWeights::Default, Some(19)).is_ok());
        assert!(matches!(
            validate_weights_input(Some(weights), &BackboneWeights::Default, Some(21)),
            Err(SegmentationError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn validate_weights_input_defaults_to_21_classes() {
        let (backbone, num_classes) =
            validate_weights_input(None, &BackboneWeights::Default, None).unwrap();
        assert_eq!(backbone, BackboneWeights::Default);
        assert_eq!(num_classes, 21);

        let (_, num_classes) =
            validate_weights_input(None, &BackboneWeights::None, Some(3)).unwrap();
        assert_eq!(num_classes, 3);
    }

    #[test]
    fn torchvision_weights_force_aux_loss() {
        let torchvision = &FCN_RESNET50_WEIGHTS[0];
        let repo = &FCN_RESNET34_WEIGHTS[0];

        assert!(torchvision.is_torchvision());
        assert!(!repo.is_torchvision());

        assert!(torchvision_aux_loss(Some(torchvision), None).unwrap());
        assert!(torchvision_aux_loss(Some(torchvision), Some(true)).unwrap());
        assert!(torchvision_aux_loss(Some(torchvision), Some(false)).is_err());
        assert!(!torchvision_aux_loss(Some(repo), None).unwrap());
        assert!(!torchvision_aux_loss(None, None).unwrap());
        assert!(torchvision_aux_loss(None, Some(true)).unwrap());
    }

    #[test]
    fn backbone_weights_resolution() {
        let default =
            resolve_backbone_weights(&BackboneType::ResNet50, &BackboneWeights::Default).unwrap();
        assert_eq!(default.map(|c| c.name), Some("IMAGENET1K_V2"));

        let v1 = resolve_backbone_weights(
            &BackboneType::ResNet50,
            &BackboneWeights::Named("IMAGENET1K_V1".to_string()),
        )
        .unwrap();
        assert_eq!(
            v1.map(|c| c.url),
            Some("https://download.pytorch.org/models/resnet50-0676ba61.pth")
        );

        assert_eq!(
            resolve_backbone_weights(&BackboneType::Vgg16, &BackboneWeights::None).unwrap(),
            None
        );
        assert!(resolve_backbone_weights(
            &BackboneType::Vgg16,
            &BackboneWeights::Named("IMAGENET1K_V2".to_string())
        )
        .is_err());
    }

    #[test]
    fn cache_path_uses_url_basename() {
        let config = WeightsConfig::new()
            .with_cache_dir(Some(PathBuf::from("/tmp/semseg")))
            .with_base_url(Some("https://example.com/weights".to_string()));

        let (url, path) = cached_weights_path(FCN_RESNET34_WEIGHTS[0].url, &config).unwrap();
        assert_eq!(
            url,
            "https://example.com/weights/fcn/fcn_resnet34-voc2012-500x500-20250221.pth"
        );
        assert_eq!(
            path,
            PathBuf::from("/tmp/semseg/fcn_resnet34-voc2012-500x500-20250221.pth")
        );

        assert!(cached_weights_path("https://example.com/", &config).is_err());
    }

    #[cfg(feature = "pretrained")]
    #[test]
    fn fetch_weights_reuses_cached_file() {
        let dir = tempfile::tempdir().unwrap();
        let cached = dir.path().join("fcn_resnet34-voc2012-500x500-20250221.pth");
        std::fs::write(&cached, b"cached").unwrap();

        // Nothing listens on the discard port, so a download attempt would fail.
        let config = WeightsConfig::new()
            .with_cache_dir(Some(dir.path().to_path_buf()))
            .with_base_url(Some("http://127.0.0.1:9/weights".to_string()));

        let path = fetch_weights(FCN_RESNET34_WEIGHTS[0].url, &config).unwrap();
        assert_eq!(path, cached);
        assert_eq!(std::fs::read(&path).unwrap(), b"cached");
    }

    #[cfg(feature = "pretrained")]
    #[test]
    fn fetch_weights_rejects_url_without_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let config = WeightsConfig::new().with_cache_dir(Some(dir.path().to_path_buf()));

        let err = fetch_weights("http://127.0.0.1:9/weights/", &config).unwrap_err();
        assert!(matches!(err, SegmentationError::WeightLoadingFailed { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn vgg_remaps_follow_torchvision_feature_indices() {
        let remaps =
            backbone_key_remaps(&BackboneConfig::new(BackboneType::Vgg16Bn), "features.", "");

        assert_eq!(remaps.len(), 26);
        assert!(remaps.contains(&(
            r"^features\.14\.(.+)".to_string(),
            "stages.2.convs.0.conv.$1".to_string()
        )));
        assert!(remaps.contains(&(
            r"^features\.15\.(.+)".to_string(),
            "stages.2.convs.0.batch_norm.$1".to_string()
        )));
    }

    #[test]
    fn resnet_remaps_handle_prefixes() {
        let remaps = backbone_key_remaps(
            &BackboneConfig::new(BackboneType::ResNet50),
            "backbone.",
            "backbone.",
        );
        assert_eq!(
            remaps[0],
            (
                r"^backbone\.conv1\.(.+)".to_string(),
                "backbone.conv1_block.conv1.$1".to_string()
            )
        );
    }

    #[test]
    fn model_remaps_cover_heads() {
        let backbone = BackboneConfig::new(BackboneType::ResNet50);
        let has_target = |remaps: &[(String, String)], target: &str| {
            remaps.iter().any(|(_, replacement)| replacement == target)
        };

        let fcn = model_key_remaps(&SegmentationModelConfig::Fcn(FcnConfig::new(
            backbone.clone(),
            21,
        )));
        assert!(has_target(&fcn, "classifier.classifier.$1"));
        assert!(has_target(&fcn, "aux_classifier.bn.$1"));

        let deeplab = model_key_remaps(&SegmentationModelConfig::DeepLabV3(DeepLabV3Config::new(
            backbone.clone(),
            21,
        )));
        assert!(has_target(&deeplab, "classifier.aspp.pooling.conv.$1"));
        assert!(has_target(&deeplab, "classifier.aspp.convs.$1.bn.$2"));

        let bisenet = model_key_remaps(&SegmentationModelConfig::BiSeNet(BiSeNetConfig::new(
            BackboneConfig::new(BackboneType::ResNet18),
            19,
        )));
        assert!(has_target(&bisenet, "spatial_path.layers.$1.conv.$2"));
        assert!(has_target(&bisenet, "ffm.attention_expand.$1"));
    }
}
