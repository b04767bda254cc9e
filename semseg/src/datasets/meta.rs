use image::{GrayImage, RgbImage};
use serde::Serialize;

/// Target value of pixels excluded from the loss and the metrics.
pub const IGNORE_INDEX: u8 = 255;

/// A raw dataset sample.
///
/// Target pixels hold class indices, with [`IGNORE_INDEX`] marking unlabeled pixels.
/// Tensor conversion is left to [`SegmentationBatcher`](super::SegmentationBatcher).
#[derive(Debug, Clone)]
pub struct SegmentationItem {
    pub image: RgbImage,
    pub target: GrayImage,
}

/// Static description of a dataset's label space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetMeta {
    /// Number of classes predicted by a model trained on the dataset.
    pub num_classes: usize,
    /// Target value ignored during training and evaluation.
    pub ignore_index: u8,
    /// Human readable class names, indexed by class id.
    pub labels: &'static [&'static str],
    /// Display color of every class, if the dataset defines one.
    pub colors: Option<&'static [[u8; 3]]>,
}

impl DatasetMeta {
    /// Metadata with the default ignore index and no colors.
    pub const fn new(num_classes: usize, labels: &'static [&'static str]) -> Self {
        Self {
            num_classes,
            ignore_index: IGNORE_INDEX,
            labels,
            colors: None,
        }
    }

    pub const fn with_colors(mut self, colors: &'static [[u8; 3]]) -> Self {
        self.colors = Some(colors);
        self
    }

    pub const fn with_ignore_index(mut self, ignore_index: u8) -> Self {
        self.ignore_index = ignore_index;
        self
    }

    /// Label of `class`, if it exists.
    pub fn label(&self, class: usize) -> Option<&'static str> {
        self.labels.get(class).copied()
    }
}
