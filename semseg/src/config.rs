//! User facing options for building models and locating pretrained weights.

use std::path::PathBuf;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{SegmentationError, SegmentationResult};

/// Environment variable overriding [`WeightsConfig::base_url`].
pub const WEIGHTS_URL_ENV: &str = "SEMSEG_WEIGHTS_URL";
/// Environment variable overriding [`WeightsConfig::cache_dir`].
pub const CACHE_DIR_ENV: &str = "SEMSEG_CACHE_DIR";

/// Which ImageNet weights to initialize the backbone with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackboneWeights {
    /// The backbone family's recommended weights.
    Default,
    /// Random initialization.
    None,
    /// A named weights entry, e.g. `IMAGENET1K_V2`.
    Named(String),
}

/// Options accepted by every model builder.
#[derive(Config, Debug)]
pub struct ModelOptions {
    /// Number of output classes. Defaults to the label count of the model weights, or 21.
    #[config(default = "None")]
    pub num_classes: Option<usize>,
    /// Name of the model weights to load (`DEFAULT` or a weights name).
    #[config(default = "None")]
    pub weights: Option<String>,
    /// Whether to build the auxiliary classifier. Unset means off unless the weights need it.
    #[config(default = "None")]
    pub aux_loss: Option<bool>,
    /// Backbone weights, ignored when model weights are given.
    #[config(default = "BackboneWeights::Default")]
    pub weights_backbone: BackboneWeights,
}

/// Where pretrained weights come from and where they are cached.
#[derive(Config, Debug)]
pub struct WeightsConfig {
    /// Cache directory; defaults to `~/.cache/semseg-burn`.
    #[config(default = "None")]
    pub cache_dir: Option<PathBuf>,
    /// Base URL that relative weight paths are resolved against.
    #[config(default = "None")]
    pub base_url: Option<String>,
}

impl WeightsConfig {
    /// Defaults, overridden by `SEMSEG_WEIGHTS_URL` and `SEMSEG_CACHE_DIR` when set.
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v: &String| !v.is_empty());
        Self::new()
            .with_base_url(non_empty(WEIGHTS_URL_ENV))
            .with_cache_dir(non_empty(CACHE_DIR_ENV).map(PathBuf::from))
    }

    /// The cache directory, falling back to the user cache location.
    pub fn resolve_cache_dir(&self) -> SegmentationResult<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        dirs::cache_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
            .map(|dir| dir.join("semseg-burn"))
            .ok_or_else(|| SegmentationError::WeightLoadingFailed {
                reason: "cannot determine a cache directory, set SEMSEG_CACHE_DIR".to_owned(),
            })
    }

    /// Resolve a weight location to an absolute URL.
    pub fn resolve_url(&self, url: &str) -> SegmentationResult<String> {
        if url.contains("://") {
            return Ok(url.to_owned());
        }
        match &self.base_url {
            Some(base) => Ok(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            )),
            None => Err(SegmentationError::WeightLoadingFailed {
                reason: format!(
                    "'{url}' is relative and no base URL is configured, set {WEIGHTS_URL_ENV}"
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_options_defaults() {
        let options = ModelOptions::new();

        assert_eq!(options.num_classes, None);
        assert_eq!(options.weights, None);
        assert_eq!(options.aux_loss, None);
        assert_eq!(options.weights_backbone, BackboneWeights::Default);

        let options = options
            .with_num_classes(Some(19))
            .with_weights_backbone(BackboneWeights::None);
        assert_eq!(options.num_classes, Some(19));
        assert_eq!(options.weights_backbone, BackboneWeights::None);
    }

    #[test]
    fn model_options_json() {
        let options = ModelOptions::new()
            .with_weights(Some("DEFAULT".to_string()))
            .with_weights_backbone(BackboneWeights::Named("IMAGENET1K_V1".to_string()));
        let json = serde_json::to_string(&options).unwrap();
        let parsed: ModelOptions = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.weights.as_deref(), Some("DEFAULT"));
        assert_eq!(
            parsed.weights_backbone,
            BackboneWeights::Named("IMAGENET1K_V1".to_string())
        );
    }

    #[test]
    fn resolve_url() {
        let config = WeightsConfig::new();
        assert_eq!(
            config.resolve_url("https://example.com/a.pth").unwrap(),
            "https://example.com/a.pth"
        );
        assert!(config.resolve_url("fcn/a.pth").is_err());

        let config = config.with_base_url(Some("https://example.com/releases/".to_string()));
        assert_eq!(
            config.resolve_url("fcn/a.pth").unwrap(),
            "https://example.com/releases/fcn/a.pth"
        );
    }

    #[test]
    fn explicit_cache_dir_wins() {
        let config = WeightsConfig::new().with_cache_dir(Some(PathBuf::from("/tmp/weights")));
        assert_eq!(
            config.resolve_cache_dir().unwrap(),
            PathBuf::from("/tmp/weights")
        );
    }
}
