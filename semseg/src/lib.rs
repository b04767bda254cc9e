//! # semseg-burn
//!
//! Semantic segmentation datasets, models and pretrained weights for the Burn deep
//! learning framework.
//!
//! ## Modules
//!
//! - `datasets`: ADE20K, Cityscapes, BDD100K and PASCAL VOC loaders, paired transforms,
//!   a batcher and the dataset registry.
//! - `models`: BiSeNet, FCN and DeepLabV3 on ResNet, VGG, Xception and MobileNetV3
//!   backbones, the model registry and pretrained weights.
//! - `config`: options shared by every model builder and the weights cache settings.
//! - `error`: the error types used throughout the crate.
//!
//! ## Example
//!
//! ```no_run
//! use burn::backend::NdArray;
//! use semseg_burn::{build_model, BackboneWeights, ModelOptions, WeightsConfig};
//!
//! let device = Default::default();
//! let options = ModelOptions::new()
//!     .with_num_classes(Some(19))
//!     .with_weights_backbone(BackboneWeights::None);
//! let model =
//!     build_model::<NdArray>("bisenet_resnet18", &options, &WeightsConfig::from_env(), &device)?;
//! # Ok::<(), semseg_burn::SegmentationError>(())
//! ```

pub mod config;
pub mod datasets;
mod error;
pub mod models;

#[doc(inline)]
pub use backbones;
#[doc(inline)]
pub use config::{BackboneWeights, ModelOptions, WeightsConfig};
#[doc(inline)]
pub use error::{DatasetError, DatasetResult, SegmentationError, SegmentationResult};
#[doc(inline)]
pub use models::{
    build_model, model_weights, model_zoo, resolve_model, ModelEntry, SegWeights,
    SegmentationModel, SegmentationModelConfig, SegmentationOutput,
};
