//! Name to dataset lookup.

use std::{collections::BTreeMap, path::Path, sync::LazyLock};

use burn::data::dataset::Dataset;

use super::{
    Ade20k, Bdd100k, BoxedTransform, Cityscapes, CityscapesTarget, DatasetMeta, SegmentationItem,
    Voc,
};
use crate::error::{DatasetResult, SegmentationError, SegmentationResult};

/// Type-erased dataset returned by the registry.
pub type BoxedDataset = Box<dyn Dataset<SegmentationItem>>;

/// Constructor shared by every registered dataset: `(root, split, transform)`.
pub type DatasetBuilder = fn(&Path, &str, Option<BoxedTransform>) -> DatasetResult<BoxedDataset>;

/// A registered dataset.
#[derive(Clone)]
pub struct DatasetEntry {
    pub name: &'static str,
    pub meta: DatasetMeta,
    /// Split used for training.
    pub train_split: &'static str,
    /// Split used for validation.
    pub val_split: &'static str,
    builder: DatasetBuilder,
}

impl core::fmt::Debug for DatasetEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DatasetEntry")
            .field("name", &self.name)
            .field("meta", &self.meta)
            .field("train_split", &self.train_split)
            .field("val_split", &self.val_split)
            .finish_non_exhaustive()
    }
}

impl DatasetEntry {
    /// Load `split` from `root`.
    pub fn build(
        &self,
        root: impl AsRef<Path>,
        split: &str,
        transform: Option<BoxedTransform>,
    ) -> DatasetResult<BoxedDataset> {
        (self.builder)(root.as_ref(), split, transform)
    }

    pub fn build_train(
        &self,
        root: impl AsRef<Path>,
        transform: Option<BoxedTransform>,
    ) -> DatasetResult<BoxedDataset> {
        self.build(root, self.train_split, transform)
    }

    pub fn build_val(
        &self,
        root: impl AsRef<Path>,
        transform: Option<BoxedTransform>,
    ) -> DatasetResult<BoxedDataset> {
        self.build(root, self.val_split, transform)
    }
}

fn boxed<D: Dataset<SegmentationItem> + 'static>(dataset: D) -> BoxedDataset {
    Box::new(dataset)
}

static DATASET_ZOO: LazyLock<BTreeMap<&'static str, DatasetEntry>> = LazyLock::new(|| {
    let entries = [
        DatasetEntry {
            name: Ade20k::NAME,
            meta: Ade20k::meta(),
            train_split: "training",
            val_split: "validation",
            builder: |root, split, transform| {
                let dataset = Ade20k::new(root, split)?;
                Ok(match transform {
                    Some(t) => boxed(dataset.with_transform(t)),
                    None => boxed(dataset),
                })
            },
        },
        DatasetEntry {
            name: Cityscapes::NAME,
            meta: CityscapesTarget::TrainId.meta(),
            train_split: "train",
            val_split: "val",
            builder: |root, split, transform| {
                let dataset = Cityscapes::new(root, split, CityscapesTarget::TrainId)?;
                Ok(match transform {
                    Some(t) => boxed(dataset.with_transform(t)),
                    None => boxed(dataset),
                })
            },
        },
        DatasetEntry {
            name: "Cityscapes-category",
            meta: CityscapesTarget::Category.meta(),
            train_split: "train",
            val_split: "val",
            builder: |root, split, transform| {
                let dataset = Cityscapes::new(root, split, CityscapesTarget::Category)?;
                Ok(match transform {
                    Some(t) => boxed(dataset.with_transform(t)),
                    None => boxed(dataset),
                })
            },
        },
        DatasetEntry {
            name: Bdd100k::NAME,
            meta: Bdd100k::meta(),
            train_split: "train",
            val_split: "val",
            builder: |root, split, transform| {
                let dataset = Bdd100k::new(root, split)?;
                Ok(match transform {
                    Some(t) => boxed(dataset.with_transform(t)),
                    None => boxed(dataset),
                })
            },
        },
        DatasetEntry {
            name: Voc::NAME,
            meta: Voc::meta(),
            train_split: "train",
            val_split: "val",
            builder: |root, split, transform| {
                let dataset = Voc::new(root, split)?;
                Ok(match transform {
                    Some(t) => boxed(dataset.with_transform(t)),
                    None => boxed(dataset),
                })
            },
        },
    ];

    entries.into_iter().map(|entry| (entry.name, entry)).collect()
});

static DATASET_METADATA: LazyLock<BTreeMap<&'static str, DatasetMeta>> = LazyLock::new(|| {
    let mut metadata: BTreeMap<_, _> = DATASET_ZOO
        .values()
        .map(|entry| (entry.name, entry.meta.clone()))
        .collect();
    // Label space of raw `labelIds` masks, used for visualization.
    metadata.insert("Cityscapes-full", CityscapesTarget::Full.meta());
    metadata
});

/// All registered datasets, keyed by name.
pub fn dataset_zoo() -> &'static BTreeMap<&'static str, DatasetEntry> {
    &DATASET_ZOO
}

/// Metadata of every known label space, keyed by name.
///
/// Contains every entry of [`dataset_zoo`].
pub fn dataset_metadata() -> &'static BTreeMap<&'static str, DatasetMeta> {
    &DATASET_METADATA
}

/// Look up a registered dataset.
pub fn resolve_dataset(name: &str) -> SegmentationResult<&'static DatasetEntry> {
    DATASET_ZOO
        .get(name)
        .ok_or_else(|| SegmentationError::UnknownDataset {
            name: name.to_owned(),
            available: DATASET_ZOO.keys().copied().collect::<Vec<_>>().join(", "),
        })
}

/// Look up the metadata of a dataset.
pub fn resolve_metadata(name: &str) -> SegmentationResult<&'static DatasetMeta> {
    DATASET_METADATA
        .get(name)
        .ok_or_else(|| SegmentationError::UnknownDataset {
            name: name.to_owned(),
            available: DATASET_METADATA.keys().copied().collect::<Vec<_>>().join(", "),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::{test_utils::*, Resize};

    #[test]
    fn registry_contents() {
        let names: Vec<_> = dataset_zoo().keys().copied().collect();
        assert_eq!(
            names,
            vec!["ADE20K", "BDD100K", "Cityscapes", "Cityscapes-category", "VOC"]
        );

        for (name, entry) in dataset_zoo() {
            assert_eq!(dataset_metadata().get(name), Some(&entry.meta));
            assert_eq!(entry.meta.labels.len(), entry.meta.num_classes);
        }
    }

    #[test]
    fn metadata_lookup() {
        assert_eq!(resolve_metadata("Cityscapes").unwrap().num_classes, 19);
        assert_eq!(resolve_metadata("Cityscapes-category").unwrap().num_classes, 7);
        assert_eq!(resolve_metadata("Cityscapes-full").unwrap().num_classes, 34);
        assert_eq!(resolve_metadata("ADE20K").unwrap().num_classes, 151);

        let err = resolve_metadata("COCO").unwrap_err();
        assert!(matches!(err, SegmentationError::UnknownDataset { .. }));
        assert!(err.to_string().contains("VOC"));
    }

    #[test]
    fn entry_builds_datasets() {
        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("images/10k/train/a.jpg"), 5, 5);
        write_target(&dir.path().join("labels/sem_seg/masks/train/a.png"), 5, 5, 2);

        let entry = resolve_dataset("BDD100K").unwrap();
        let dataset = entry
            .build_train(dir.path(), Some(Box::new(Resize::new(2, 2))))
            .unwrap();

        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.get(0).unwrap().image.dimensions(), (2, 2));
        assert!(entry.build_val(dir.path(), None).is_err());
    }
}
