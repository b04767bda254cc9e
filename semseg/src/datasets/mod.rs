//! Segmentation datasets.
//!
//! Loaders return raw [`SegmentationItem`]s following Burn's convention; tensor
//! creation and normalization happen in [`SegmentationBatcher`].

mod ade20k;
mod batcher;
mod bdd100k;
mod cityscapes;
mod meta;
mod palette;
mod registry;
mod transforms;
mod voc;

use std::path::{Path, PathBuf};

use image::{GrayImage, RgbImage};
use walkdir::WalkDir;

pub use ade20k::{Ade20k, ADE20K_LABELS};
pub use batcher::{
    image_to_tensor, normalize, SegmentationBatch, SegmentationBatcher, IMAGENET_MEAN, IMAGENET_STD,
};
pub use bdd100k::Bdd100k;
pub use cityscapes::{
    Cityscapes, CityscapesCategory, CityscapesClass, CityscapesTarget, CITYSCAPES_CATEGORY_COLORS,
    CITYSCAPES_CATEGORY_LABELS, CITYSCAPES_CLASSES, CITYSCAPES_COLORS, CITYSCAPES_FULL_COLORS,
    CITYSCAPES_FULL_LABELS, CITYSCAPES_LABELS,
};
pub use meta::{DatasetMeta, SegmentationItem, IGNORE_INDEX};
pub use palette::{colorize, palette_color};
pub use registry::{
    dataset_metadata, dataset_zoo, resolve_dataset, resolve_metadata, BoxedDataset, DatasetBuilder,
    DatasetEntry,
};
pub use transforms::{Compose, RandomCrop, RandomHorizontalFlip, Resize, SegmentationTransform};
pub use voc::{decode_voc_target, Voc, VOC_COLORS, VOC_LABELS};

use crate::error::{DatasetError, DatasetResult};

/// Optional transform owned by a dataset.
pub type BoxedTransform = Box<dyn SegmentationTransform>;

/// Check that `split` is one of `expected`.
fn check_split(dataset: &str, split: &str, expected: &[&str]) -> DatasetResult<()> {
    if expected.contains(&split) {
        Ok(())
    } else {
        Err(DatasetError::InvalidSplit {
            dataset: dataset.to_owned(),
            split: split.to_owned(),
            expected: expected.join(", "),
        })
    }
}

fn require_dir(path: &Path) -> DatasetResult<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(DatasetError::DirectoryNotFound {
            path: path.to_path_buf(),
        })
    }
}

/// Files under `dir` whose name ends with `suffix`, sorted by path.
fn list_files(dir: &Path, suffix: &str) -> DatasetResult<Vec<PathBuf>> {
    require_dir(dir)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|source| DatasetError::DirectoryReadFailed {
            path: dir.to_path_buf(),
            source,
        })?;
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(suffix));
        if entry.file_type().is_file() && matches {
            files.push(entry.into_path());
        }
    }
    files.sort();

    tracing::debug!(dir = %dir.display(), suffix, count = files.len(), "scanned dataset directory");
    Ok(files)
}

/// Pair every file in `images` with the file in `targets` sharing its stem.
fn pair_by_stem(
    images: Vec<PathBuf>,
    target_dir: &Path,
    target_suffix: &str,
    image_suffix: &str,
) -> DatasetResult<Vec<(PathBuf, PathBuf)>> {
    images
        .into_iter()
        .map(|image| {
            let name = image
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_suffix(image_suffix))
                .map(|stem| format!("{stem}{target_suffix}"));
            match name.map(|name| target_dir.join(name)) {
                Some(target) if target.is_file() => Ok((image, target)),
                _ => Err(DatasetError::MissingTarget { image }),
            }
        })
        .collect()
}

fn non_empty(
    samples: Vec<(PathBuf, PathBuf)>,
    dir: &Path,
) -> DatasetResult<Vec<(PathBuf, PathBuf)>> {
    if samples.is_empty() {
        Err(DatasetError::NoSamples {
            path: dir.to_path_buf(),
        })
    } else {
        Ok(samples)
    }
}

fn open_rgb(path: &Path) -> DatasetResult<RgbImage> {
    image::open(path)
        .map(|image| image.to_rgb8())
        .map_err(|source| DatasetError::ImageOpenFailed {
            path: path.to_path_buf(),
            source,
        })
}

fn open_gray(path: &Path) -> DatasetResult<GrayImage> {
    image::open(path)
        .map(|image| image.to_luma8())
        .map_err(|source| DatasetError::ImageOpenFailed {
            path: path.to_path_buf(),
            source,
        })
}

/// Load a sample, map its target and apply the transform.
///
/// Failures are logged and turned into `None`, as `Dataset::get` cannot return errors.
fn load_sample(
    image: &Path,
    target: &Path,
    decode_target: impl FnOnce(&Path) -> DatasetResult<GrayImage>,
    transform: Option<&BoxedTransform>,
) -> Option<SegmentationItem> {
    let loaded = open_rgb(image).and_then(|image| Ok((image, decode_target(target)?)));
    let (image, target) = match loaded {
        Ok(pair) => pair,
        Err(err) => {
            tracing::warn!(error = %err, "skipping unreadable sample");
            return None;
        }
    };

    let (image, target) = match transform {
        Some(transform) => transform.apply(image, target, &mut rand::rng()),
        None => (image, target),
    };
    Some(SegmentationItem { image, target })
}


#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::*;

    #[test]
    fn list_files_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write_target(&dir.path().join("b.png"), 1, 1, 0);
        write_target(&dir.path().join("nested/a.png"), 1, 1, 0);
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = list_files(dir.path(), ".png").unwrap();

        assert_eq!(
            files,
            vec![dir.path().join("b.png"), dir.path().join("nested/a.png")]
        );
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_files(&dir.path().join("absent"), ".png").unwrap_err();

        assert!(matches!(err, DatasetError::DirectoryNotFound { .. }));
    }

    #[test]
    fn pairing_requires_target() {
        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("img/x.jpg"), 2, 2);

        let images = list_files(&dir.path().join("img"), ".jpg").unwrap();
        let err = pair_by_stem(images, &dir.path().join("ann"), ".png", ".jpg").unwrap_err();

        assert!(matches!(err, DatasetError::MissingTarget { .. }));
    }

    #[test]
    fn invalid_split_lists_expected() {
        let err = check_split("VOC", "test", &["train", "val"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid split 'test' for VOC, expected one of: train, val"
        );
    }
}
