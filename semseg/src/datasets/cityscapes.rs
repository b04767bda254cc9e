//! [Cityscapes](https://www.cityscapes-dataset.com/) fine annotations.

use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use image::GrayImage;
use serde::Serialize;

use super::{
    check_split, list_files, load_sample, non_empty, open_gray, pair_by_stem, BoxedTransform,
    DatasetMeta, SegmentationItem, IGNORE_INDEX,
};
use crate::error::DatasetResult;

/// Coarse Cityscapes category a class belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CityscapesCategory {
    Void,
    Flat,
    Construction,
    Object,
    Nature,
    Sky,
    Human,
    Vehicle,
}

impl CityscapesCategory {
    pub const ALL: [Self; 8] = [
        Self::Void,
        Self::Flat,
        Self::Construction,
        Self::Object,
        Self::Nature,
        Self::Sky,
        Self::Human,
        Self::Vehicle,
    ];

    pub const fn id(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Flat => "flat",
            Self::Construction => "construction",
            Self::Object => "object",
            Self::Nature => "nature",
            Self::Sky => "sky",
            Self::Human => "human",
            Self::Vehicle => "vehicle",
        }
    }
}

/// One row of the official Cityscapes label table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CityscapesClass {
    pub name: &'static str,
    /// Value stored in `*_gtFine_labelIds.png`.
    pub id: i16,
    /// Training id, 255 when the class is not evaluated.
    pub train_id: u8,
    pub category: CityscapesCategory,
    pub has_instances: bool,
    pub ignore_in_eval: bool,
    pub color: [u8; 3],
}

impl CityscapesClass {
    const fn new(
        name: &'static str,
        id: i16,
        train_id: u8,
        category: CityscapesCategory,
        has_instances: bool,
        ignore_in_eval: bool,
        color: [u8; 3],
    ) -> Self {
        Self {
            name,
            id,
            train_id,
            category,
            has_instances,
            ignore_in_eval,
            color,
        }
    }

    pub const fn category_id(&self) -> u8 {
        self.category.id()
    }
}

use CityscapesCategory::{Construction, Flat, Human, Nature, Object, Sky, Vehicle, Void};

/// The complete label table, including classes excluded from evaluation.
pub const CITYSCAPES_CLASSES: [CityscapesClass; 35] = [
    CityscapesClass::new("unlabeled", 0, 255, Void, false, true, [0, 0, 0]),
    CityscapesClass::new("ego vehicle", 1, 255, Void, false, true, [0, 0, 0]),
    CityscapesClass::new("rectification border", 2, 255, Void, false, true, [0, 0, 0]),
    CityscapesClass::new("out of roi", 3, 255, Void, false, true, [0, 0, 0]),
    CityscapesClass::new("static", 4, 255, Void, false, true, [0, 0, 0]),
    CityscapesClass::new("dynamic", 5, 255, Void, false, true, [111, 74, 0]),
    CityscapesClass::new("ground", 6, 255, Void, false, true, [81, 0, 81]),
    CityscapesClass::new("road", 7, 0, Flat, false, false, [128, 64, 128]),
    CityscapesClass::new("sidewalk", 8, 1, Flat, false, false, [244, 35, 232]),
    CityscapesClass::new("parking", 9, 255, Flat, false, true, [250, 170, 160]),
    CityscapesClass::new("rail track", 10, 255, Flat, false, true, [230, 150, 140]),
    CityscapesClass::new("building", 11, 2, Construction, false, false, [70, 70, 70]),
    CityscapesClass::new("wall", 12, 3, Construction, false, false, [102, 102, 156]),
    CityscapesClass::new("fence", 13, 4, Construction, false, false, [190, 153, 153]),
    CityscapesClass::new("guard rail", 14, 255, Construction, false, true, [180, 165, 180]),
    CityscapesClass::new("bridge", 15, 255, Construction, false, true, [150, 100, 100]),
    CityscapesClass::new("tunnel", 16, 255, Construction, false, true, [150, 120, 90]),
    CityscapesClass::new("pole", 17, 5, Object, false, false, [153, 153, 153]),
    CityscapesClass::new("polegroup", 18, 255, Object, false, true, [153, 153, 153]),
    CityscapesClass::new("traffic light", 19, 6, Object, false, false, [250, 170, 30]),
    CityscapesClass::new("traffic sign", 20, 7, Object, false, false, [220, 220, 0]),
    CityscapesClass::new("vegetation", 21, 8, Nature, false, false, [107, 142, 35]),
    CityscapesClass::new("terrain", 22, 9, Nature, false, false, [152, 251, 152]),
    CityscapesClass::new("sky", 23, 10, Sky, false, false, [70, 130, 180]),
    CityscapesClass::new("person", 24, 11, Human, true, false, [220, 20, 60]),
    CityscapesClass::new("rider", 25, 12, Human, true, false, [255, 0, 0]),
    CityscapesClass::new("car", 26, 13, Vehicle, true, false, [0, 0, 142]),
    CityscapesClass::new("truck", 27, 14, Vehicle, true, false, [0, 0, 70]),
    CityscapesClass::new("bus", 28, 15, Vehicle, true, false, [0, 60, 100]),
    CityscapesClass::new("caravan", 29, 255, Vehicle, true, true, [0, 0, 90]),
    CityscapesClass::new("trailer", 30, 255, Vehicle, true, true, [0, 0, 110]),
    CityscapesClass::new("train", 31, 16, Vehicle, true, false, [0, 80, 100]),
    CityscapesClass::new("motorcycle", 32, 17, Vehicle, true, false, [0, 0, 230]),
    CityscapesClass::new("bicycle", 33, 18, Vehicle, true, false, [119, 11, 32]),
    CityscapesClass::new("license plate", -1, 255, Vehicle, false, true, [0, 0, 142]),
];

/// The 19 evaluated classes, indexed by train id.
pub const CITYSCAPES_LABELS: &[&str] = &[
    "road",
    "sidewalk",
    "building",
    "wall",
    "fence",
    "pole",
    "traffic light",
    "traffic sign",
    "vegetation",
    "terrain",
    "sky",
    "person",
    "rider",
    "car",
    "truck",
    "bus",
    "train",
    "motorcycle",
    "bicycle",
];

pub const CITYSCAPES_COLORS: &[[u8; 3]] = &[
    [128, 64, 128],
    [244, 35, 232],
    [70, 70, 70],
    [102, 102, 156],
    [190, 153, 153],
    [153, 153, 153],
    [250, 170, 30],
    [220, 220, 0],
    [107, 142, 35],
    [152, 251, 152],
    [70, 130, 180],
    [220, 20, 60],
    [255, 0, 0],
    [0, 0, 142],
    [0, 0, 70],
    [0, 60, 100],
    [0, 80, 100],
    [0, 0, 230],
    [119, 11, 32],
];

/// All classes stored in label-id PNGs, indexed by id.
pub const CITYSCAPES_FULL_LABELS: &[&str] = &{
    let mut labels = [""; 34];
    let mut i = 0;
    while i < 34 {
        labels[i] = CITYSCAPES_CLASSES[i].name;
        i += 1;
    }
    labels
};

pub const CITYSCAPES_FULL_COLORS: &[[u8; 3]] = &{
    let mut colors = [[0u8; 3]; 34];
    let mut i = 0;
    while i < 34 {
        colors[i] = CITYSCAPES_CLASSES[i].color;
        i += 1;
    }
    colors
};

/// Evaluated categories, indexed by `category_id - 1`.
pub const CITYSCAPES_CATEGORY_LABELS: &[&str] = &[
    "flat",
    "construction",
    "object",
    "nature",
    "sky",
    "human",
    "vehicle",
];

pub const CITYSCAPES_CATEGORY_COLORS: &[[u8; 3]] = &[
    [128, 64, 128],
    [70, 70, 70],
    [153, 153, 153],
    [107, 142, 35],
    [70, 130, 180],
    [220, 20, 60],
    [0, 0, 142],
];

/// How label ids are turned into class indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CityscapesTarget {
    /// The 19 evaluated classes; everything else is ignored.
    TrainId,
    /// The 7 non-void categories; void is ignored.
    Category,
    /// Raw label ids.
    Full,
}

impl CityscapesTarget {
    /// Lookup table from label id to class index.
    pub fn lookup(self) -> [u8; 256] {
        let mut table = [IGNORE_INDEX; 256];
        for class in &CITYSCAPES_CLASSES {
            let Ok(id) = usize::try_from(class.id) else {
                continue;
            };
            table[id] = match self {
                Self::TrainId => class.train_id,
                Self::Category if class.category == Void => IGNORE_INDEX,
                Self::Category => class.category_id() - 1,
                Self::Full => class.id as u8,
            };
        }
        table
    }

    pub const fn meta(self) -> DatasetMeta {
        let (labels, colors) = match self {
            Self::TrainId => (CITYSCAPES_LABELS, CITYSCAPES_COLORS),
            Self::Category => (CITYSCAPES_CATEGORY_LABELS, CITYSCAPES_CATEGORY_COLORS),
            Self::Full => (CITYSCAPES_FULL_LABELS, CITYSCAPES_FULL_COLORS),
        };
        DatasetMeta::new(labels.len(), labels).with_colors(colors)
    }
}

/// Cityscapes dataset.
///
/// Expects `root/leftImg8bit/{split}/<city>/*_leftImg8bit.png` and
/// `root/gtFine/{split}/<city>/*_gtFine_labelIds.png`.
pub struct Cityscapes {
    samples: Vec<(PathBuf, PathBuf)>,
    target: CityscapesTarget,
    lookup: [u8; 256],
    transform: Option<BoxedTransform>,
}

impl Cityscapes {
    pub const NAME: &'static str = "Cityscapes";
    pub const SPLITS: [&'static str; 3] = ["train", "val", "test"];

    const IMAGE_SUFFIX: &'static str = "_leftImg8bit.png";
    const TARGET_SUFFIX: &'static str = "_gtFine_labelIds.png";

    pub fn new(
        root: impl AsRef<Path>,
        split: &str,
        target: CityscapesTarget,
    ) -> DatasetResult<Self> {
        check_split(Self::NAME, split, &Self::SPLITS)?;

        let root = root.as_ref();
        let image_dir = root.join("leftImg8bit").join(split);
        let target_dir = root.join("gtFine").join(split);

        let mut samples = Vec::new();
        for image in list_files(&image_dir, Self::IMAGE_SUFFIX)? {
            // Targets mirror the `<city>/` directory of the image.
            let city_dir = image
                .parent()
                .and_then(|dir| dir.strip_prefix(&image_dir).ok())
                .map(|city| target_dir.join(city))
                .unwrap_or_else(|| target_dir.clone());
            samples.extend(pair_by_stem(
                vec![image],
                &city_dir,
                Self::TARGET_SUFFIX,
                Self::IMAGE_SUFFIX,
            )?);
        }
        let samples = non_empty(samples, &image_dir)?;
        tracing::info!(split, ?target, count = samples.len(), "loaded Cityscapes");

        Ok(Self {
            samples,
            target,
            lookup: target.lookup(),
            transform: None,
        })
    }

    pub fn with_transform(mut self, transform: BoxedTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub const fn target_type(&self) -> CityscapesTarget {
        self.target
    }

    pub fn samples(&self) -> &[(PathBuf, PathBuf)] {
        &self.samples
    }

    fn decode_target(&self, path: &Path) -> DatasetResult<GrayImage> {
        let mut target = open_gray(path)?;
        for pixel in target.pixels_mut() {
            pixel.0[0] = self.lookup[pixel.0[0] as usize];
        }
        Ok(target)
    }
}

impl Dataset<SegmentationItem> for Cityscapes {
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        let (image, target) = self.samples.get(index)?;
        load_sample(
            image,
            target,
            |path| self.decode_target(path),
            self.transform.as_ref(),
        )
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::test_utils::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (city, frame, label_id) in [("bonn", "000001", 26), ("aachen", "000000", 7)] {
            let stem = format!("{city}_{frame}_000019");
            write_image(
                &dir.path()
                    .join(format!("leftImg8bit/train/{city}/{stem}_leftImg8bit.png")),
                4,
                2,
            );
            write_target(
                &dir.path()
                    .join(format!("gtFine/train/{city}/{stem}_gtFine_labelIds.png")),
                4,
                2,
                label_id,
            );
        }
        dir
    }

    #[test]
    fn tables_are_consistent() {
        assert_eq!(CITYSCAPES_LABELS.len(), 19);
        assert_eq!(CITYSCAPES_COLORS.len(), 19);
        for class in CITYSCAPES_CLASSES.iter().filter(|c| c.train_id != 255) {
            assert_eq!(CITYSCAPES_LABELS[class.train_id as usize], class.name);
            assert_eq!(CITYSCAPES_COLORS[class.train_id as usize], class.color);
        }
        assert_eq!(CITYSCAPES_FULL_LABELS[33], "bicycle");
        assert_eq!(CITYSCAPES_FULL_COLORS[7], [128, 64, 128]);
        assert_eq!(CITYSCAPES_CATEGORY_LABELS.len(), CityscapesCategory::ALL.len() - 1);
        for category in &CityscapesCategory::ALL[1..] {
            assert_eq!(
                CITYSCAPES_CATEGORY_LABELS[category.id() as usize - 1],
                category.name()
            );
        }
    }

    #[test]
    fn lookup_tables() {
        let train = CityscapesTarget::TrainId.lookup();
        assert_eq!(train[7], 0);
        assert_eq!(train[33], 18);
        assert_eq!(train[0], IGNORE_INDEX);
        assert_eq!(train[200], IGNORE_INDEX);

        let category = CityscapesTarget::Category.lookup();
        assert_eq!(category[7], 0);
        assert_eq!(category[26], 6);
        assert_eq!(category[5], IGNORE_INDEX);

        let full = CityscapesTarget::Full.lookup();
        assert_eq!(full[23], 23);
    }

    #[test]
    fn loads_sorted_and_maps_targets() {
        let dir = fixture();
        let dataset = Cityscapes::new(dir.path(), "train", CityscapesTarget::TrainId).unwrap();

        assert_eq!(dataset.len(), 2);
        assert!(dataset.samples()[0].0.to_string_lossy().contains("aachen"));
        assert!(dataset.samples()[0]
            .1
            .ends_with("gtFine/train/aachen/aachen_000000_000019_gtFine_labelIds.png"));

        let road = dataset.get(0).unwrap();
        assert!(road.target.pixels().all(|p| p.0[0] == 0));
        let car = dataset.get(1).unwrap();
        assert!(car.target.pixels().all(|p| p.0[0] == 13));
    }

    #[test]
    fn category_targets() {
        let dir = fixture();
        let dataset = Cityscapes::new(dir.path(), "train", CityscapesTarget::Category).unwrap();

        assert_eq!(dataset.target_type(), CityscapesTarget::Category);
        let car = dataset.get(1).unwrap();
        assert!(car.target.pixels().all(|p| p.0[0] == 6));
    }
}
