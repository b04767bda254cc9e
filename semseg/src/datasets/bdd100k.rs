//! [BDD100K](https://www.bdd100k.com/) semantic segmentation (10K images).

use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;

use super::{
    check_split, list_files, load_sample, non_empty, open_gray, pair_by_stem, BoxedTransform,
    DatasetMeta, SegmentationItem, CITYSCAPES_COLORS, CITYSCAPES_LABELS,
};
use crate::error::DatasetResult;

/// BDD100K dataset.
///
/// Expects `root/images/10k/{split}/*.jpg` and `root/labels/sem_seg/masks/{split}/*.png`.
/// Masks already hold Cityscapes train ids with 255 as ignore.
pub struct Bdd100k {
    samples: Vec<(PathBuf, PathBuf)>,
    transform: Option<BoxedTransform>,
}

impl Bdd100k {
    pub const NAME: &'static str = "BDD100K";
    pub const SPLITS: [&'static str; 2] = ["train", "val"];

    pub const fn meta() -> DatasetMeta {
        DatasetMeta::new(CITYSCAPES_LABELS.len(), CITYSCAPES_LABELS).with_colors(CITYSCAPES_COLORS)
    }

    pub fn new(root: impl AsRef<Path>, split: &str) -> DatasetResult<Self> {
        check_split(Self::NAME, split, &Self::SPLITS)?;

        let root = root.as_ref();
        let image_dir = root.join("images").join("10k").join(split);
        let target_dir = root.join("labels").join("sem_seg").join("masks").join(split);

        let images = list_files(&image_dir, ".jpg")?;
        let samples = non_empty(pair_by_stem(images, &target_dir, ".png", ".jpg")?, &image_dir)?;
        tracing::info!(split, count = samples.len(), "loaded BDD100K");

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

impl Dataset<SegmentationItem> for Bdd100k {
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        let (image, target) = self.samples.get(index)?;
        load_sample(image, target, open_gray, self.transform.as_ref())
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::test_utils::*;

    #[test]
    fn loads_masks_as_train_ids() {
        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("images/10k/val/7d2f7975-e0c1c5a7.jpg"), 6, 4);
        write_target(
            &dir.path().join("labels/sem_seg/masks/val/7d2f7975-e0c1c5a7.png"),
            6,
            4,
            255,
        );

        let dataset = Bdd100k::new(dir.path(), "val").unwrap();
        let item = dataset.get(0).unwrap();

        assert_eq!(dataset.len(), 1);
        assert_eq!(item.target.dimensions(), (6, 4));
        assert!(item.target.pixels().all(|p| p.0[0] == 255));
        assert_eq!(Bdd100k::meta().num_classes, 19);
    }
}
