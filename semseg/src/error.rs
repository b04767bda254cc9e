//! Error types for datasets, model construction and weight management.

use std::path::PathBuf;

use thiserror::Error;

/// The error type for `semseg-burn` operations.
#[derive(Error, Debug)]
pub enum SegmentationError {
    /// No model is registered under the requested name.
    #[error("unknown model '{name}' - available models: {available}")]
    UnknownModel {
        /// The requested model name.
        name: String,
        /// Comma separated list of registered models.
        available: String,
    },

    /// No dataset is registered under the requested name.
    #[error("unknown dataset '{name}' - available datasets: {available}")]
    UnknownDataset {
        /// The requested dataset name.
        name: String,
        /// Comma separated list of registered datasets.
        available: String,
    },

    /// Options are logically inconsistent.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// The requested pretrained weights do not exist for this model.
    #[error("Unsupported weights for {model}: {reason}")]
    UnsupportedWeights {
        /// The model the weights were requested for.
        model: String,
        /// Why the weights cannot be used.
        reason: String,
    },

    /// Downloading or loading a weight file failed.
    #[error("Failed to load weights: {reason}")]
    WeightLoadingFailed {
        /// The reason for the weight loading failure.
        reason: String,
    },

    /// Error raised by a dataset loader.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// A specialized `Result` type for `semseg-burn` operations.
pub type SegmentationResult<T> = Result<T, SegmentationError>;

/// Error type for dataset loading.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// An expected dataset directory does not exist.
    #[error("Dataset directory not found: {path}")]
    DirectoryNotFound {
        /// The expected directory path.
        path: PathBuf,
    },

    /// Reading a directory failed.
    #[error("Failed to read directory: {path}")]
    DirectoryReadFailed {
        /// The directory path that failed to read.
        path: PathBuf,
        /// The underlying walk error.
        #[source]
        source: walkdir::Error,
    },

    /// No image/target pairs were found.
    #[error("No samples found in: {path}")]
    NoSamples {
        /// The directory where no samples were found.
        path: PathBuf,
    },

    /// An image has no matching target file.
    #[error("No target found for image: {image}")]
    MissingTarget {
        /// The image without a target.
        image: PathBuf,
    },

    /// Opening or decoding an image failed.
    #[error("Failed to open image: {path}")]
    ImageOpenFailed {
        /// The image file path that failed to open.
        path: PathBuf,
        /// The underlying image error.
        #[source]
        source: image::ImageError,
    },

    /// The split is not known to the dataset.
    #[error("Invalid split '{split}' for {dataset}, expected one of: {expected}")]
    InvalidSplit {
        /// Dataset name.
        dataset: String,
        /// The requested split.
        split: String,
        /// Accepted split names.
        expected: String,
    },

    /// A split list file could not be read.
    #[error("Failed to read split list: {path}")]
    InvalidListFile {
        /// The list file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// A specialized `Result` type for dataset operations.
pub type DatasetResult<T> = Result<T, DatasetError>;
