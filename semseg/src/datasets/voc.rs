//! [PASCAL VOC 2012](http://host.robots.ox.ac.uk/pascal/VOC/voc2012/) segmentation.

use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::data::dataset::Dataset;
use image::{GrayImage, Luma};

use super::{
    check_split, load_sample, non_empty, open_rgb, require_dir, BoxedTransform, DatasetMeta,
    SegmentationItem, IGNORE_INDEX,
};
use crate::error::{DatasetError, DatasetResult};

pub const VOC_LABELS: &[&str] = &[
    "background",
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedplant",
    "sheep",
    "sofa",
    "train",
    "tvmonitor",
];

pub const VOC_COLORS: &[[u8; 3]] = &[
    [0, 0, 0],
    [128, 0, 0],
    [0, 128, 0],
    [128, 128, 0],
    [0, 0, 128],
    [128, 0, 128],
    [0, 128, 128],
    [128, 128, 128],
    [64, 0, 0],
    [192, 0, 0],
    [64, 128, 0],
    [192, 128, 0],
    [64, 0, 128],
    [192, 0, 128],
    [64, 128, 128],
    [192, 128, 128],
    [0, 64, 0],
    [128, 64, 0],
    [0, 192, 0],
    [128, 192, 0],
    [0, 64, 128],
];

/// PASCAL VOC 2012 dataset.
///
/// Expects `root/VOCdevkit/VOC2012/` with `JPEGImages/`, `SegmentationClass/` and the
/// split lists in `ImageSets/Segmentation/{split}.txt`.
pub struct Voc {
    samples: Vec<(PathBuf, PathBuf)>,
    transform: Option<BoxedTransform>,
}

impl Voc {
    pub const NAME: &'static str = "VOC";
    pub const SPLITS: [&'static str; 3] = ["train", "val", "trainval"];

    pub const fn meta() -> DatasetMeta {
        DatasetMeta::new(VOC_LABELS.len(), VOC_LABELS).with_colors(VOC_COLORS)
    }

    pub fn new(root: impl AsRef<Path>, split: &str) -> DatasetResult<Self> {
        check_split(Self::NAME, split, &Self::SPLITS)?;

        let base = root.as_ref().join("VOCdevkit").join("VOC2012");
        require_dir(&base)?;
        let list = base
            .join("ImageSets")
            .join("Segmentation")
            .join(format!("{split}.txt"));
        let contents = fs::read_to_string(&list).map_err(|source| DatasetError::InvalidListFile {
            path: list.clone(),
            source,
        })?;

        let mut ids: Vec<&str> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let samples = ids
            .into_iter()
            .map(|id| {
                let image = base.join("JPEGImages").join(format!("{id}.jpg"));
                let target = base.join("SegmentationClass").join(format!("{id}.png"));
                if target.is_file() {
                    Ok((image, target))
                } else {
                    Err(DatasetError::MissingTarget { image })
                }
            })
            .collect::<DatasetResult<Vec<_>>>()?;
        let samples = non_empty(samples, &base)?;
        tracing::info!(split, count = samples.len(), "loaded VOC 2012");

        Ok(Self {
            samples,
            transform: None,
        })
    }

    pub fn with_transform(mut self, transform: BoxedTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn samples(&self) -> &[(PathBuf, PathBuf)] {
        &self.samples
    }
}

/// Map a decoded palette mask back to class indices.
///
/// Colors outside [`VOC_COLORS`], including the white object border, become the ignore index.
pub fn decode_voc_target(path: &Path) -> DatasetResult<GrayImage> {
    let mask = open_rgb(path)?;
    Ok(GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let color = mask.get_pixel(x, y).0;
        let class = VOC_COLORS
            .iter()
            .position(|c| *c == color)
            .and_then(|class| u8::try_from(class).ok())
            .unwrap_or(IGNORE_INDEX);
        Luma([class])
    }))
}

impl Dataset<SegmentationItem> for Voc {
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        let (image, target) = self.samples.get(index)?;
        load_sample(image, target, decode_voc_target, self.transform.as_ref())
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
