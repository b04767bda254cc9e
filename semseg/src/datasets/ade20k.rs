//! [ADE20K](https://ade20k.csail.mit.edu/) scene parsing dataset (SceneParsing release).

use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;

use super::{
    check_split, list_files, load_sample, non_empty, open_gray, pair_by_stem, BoxedTransform,
    DatasetMeta, SegmentationItem,
};
use crate::error::DatasetResult;

/// Class names; index 0 is the unlabeled background.
pub const ADE20K_LABELS: &[&str] = &[
    "background",
    "wall",
    "building, edifice",
    "sky",
    "floor, flooring",
    "tree",
    "ceiling",
    "road, route",
    "bed ",
    "windowpane, window ",
    "grass",
    "cabinet",
    "sidewalk, pavement",
    "person, individual, someone, somebody, mortal, soul",
    "earth, ground",
    "door, double door",
    "table",
    "mountain, mount",
    "plant, flora, plant life",
    "curtain, drape, drapery, mantle, pall",
    "chair",
    "car, auto, automobile, machine, motorcar",
    "water",
    "painting, picture",
    "sofa, couch, lounge",
    "shelf",
    "house",
    "sea",
    "mirror",
    "rug, carpet, carpeting",
    "field",
    "armchair",
    "seat",
    "fence, fencing",
    "desk",
    "rock, stone",
    "wardrobe, closet, press",
    "lamp",
    "bathtub, bathing tub, bath, tub",
    "railing, rail",
    "cushion",
    "base, pedestal, stand",
    "box",
    "column, pillar",
    "signboard, sign",
    "chest of drawers, chest, bureau, dresser",
    "counter",
    "sand",
    "sink",
    "skyscraper",
    "fireplace, hearth, open fireplace",
    "refrigerator, icebox",
    "grandstand, covered stand",
    "path",
    "stairs, steps",
    "runway",
    "case, display case, showcase, vitrine",
    "pool table, billiard table, snooker table",
    "pillow",
    "screen door, screen",
    "stairway, staircase",
    "river",
    "bridge, span",
    "bookcase",
    "blind, screen",
    "coffee table, cocktail table",
    "toilet, can, commode, crapper, pot, potty, stool, throne",
    "flower",
    "book",
    "hill",
    "bench",
    "countertop",
    "stove, kitchen stove, range, kitchen range, cooking stove",
    "palm, palm tree",
    "kitchen island",
    "computer, computing machine, computing device, data processor, electronic computer, information processing system",
    "swivel chair",
    "boat",
    "bar",
    "arcade machine",
    "hovel, hut, hutch, shack, shanty",
    "bus, autobus, coach, charabanc, double-decker, jitney, motorbus, motorcoach, omnibus, passenger vehicle",
    "towel",
    "light, light source",
    "truck, motortruck",
    "tower",
    "chandelier, pendant, pendent",
    "awning, sunshade, sunblind",
    "streetlight, street lamp",
    "booth, cubicle, stall, kiosk",
    "television receiver, television, television set, tv, tv set, idiot box, boob tube, telly, goggle box",
    "airplane, aeroplane, plane",
    "dirt track",
    "apparel, wearing apparel, dress, clothes",
    "pole",
    "land, ground, soil",
    "bannister, banister, balustrade, balusters, handrail",
    "escalator, moving staircase, moving stairway",
    "ottoman, pouf, pouffe, puff, hassock",
    "bottle",
    "buffet, counter, sideboard",
    "poster, posting, placard, notice, bill, card",
    "stage",
    "van",
    "ship",
    "fountain",
    "conveyer belt, conveyor belt, conveyer, conveyor, transporter",
    "canopy",
    "washer, automatic washer, washing machine",
    "plaything, toy",
    "swimming pool, swimming bath, natatorium",
    "stool",
    "barrel, cask",
    "basket, handbasket",
    "waterfall, falls",
    "tent, collapsible shelter",
    "bag",
    "minibike, motorbike",
    "cradle",
    "oven",
    "ball",
    "food, solid food",
    "step, stair",
    "tank, storage tank",
    "trade name, brand name, brand, marque",
    "microwave, microwave oven",
    "pot, flowerpot",
    "animal, animate being, beast, brute, creature, fauna",
    "bicycle, bike, wheel, cycle ",
    "lake",
    "dishwasher, dish washer, dishwashing machine",
    "screen, silver screen, projection screen",
    "blanket, cover",
    "sculpture",
    "hood, exhaust hood",
    "sconce",
    "vase",
    "traffic light, traffic signal, stoplight",
    "tray",
    "ashcan, trash can, garbage can, wastebin, ash bin, ash-bin, ashbin, dustbin, trash barrel, trash bin",
    "fan",
    "pier, wharf, wharfage, dock",
    "crt screen",
    "plate",
    "monitor, monitoring device",
    "bulletin board, notice board",
    "shower",
    "radiator",
    "glass, drinking glass",
    "clock",
    "flag",
];

/// ADE20K dataset.
///
/// Expects `root/images/{split}/*.jpg` and `root/annotations/{split}/*.png`, where
/// annotation pixel values are class indices.
pub struct Ade20k {
    samples: Vec<(PathBuf, PathBuf)>,
    transform: Option<BoxedTransform>,
}

impl Ade20k {
    pub const NAME: &'static str = "ADE20K";
    pub const SPLITS: [&'static str; 2] = ["training", "validation"];

    pub const fn meta() -> DatasetMeta {
        DatasetMeta::new(151, ADE20K_LABELS)
    }

    /// Scan `root` for the samples of `split`.
    ///
    /// Images and annotations are paired by file stem.
    pub fn new(root: impl AsRef<Path>, split: &str) -> DatasetResult<Self> {
        check_split(Self::NAME, split, &Self::SPLITS)?;

        let root = root.as_ref();
        let image_dir = root.join("images").join(split);
        let target_dir = root.join("annotations").join(split);

        let images = list_files(&image_dir, ".jpg")?;
        let samples = non_empty(pair_by_stem(images, &target_dir, ".png", ".jpg")?, &image_dir)?;
        tracing::info!(split, count = samples.len(), "loaded ADE20K");

        Ok(Self {
            samples,
            transform: None,
        })
    }

    pub fn with_transform(mut self, transform: BoxedTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// `(image, annotation)` paths in load order.
    pub fn samples(&self) -> &[(PathBuf, PathBuf)] {
        &self.samples
    }
}

impl Dataset<SegmentationItem> for Ade20k {
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
    use crate::datasets::{test_utils::*, Resize};
    use crate::error::DatasetError;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in [("ADE_train_2", 5), ("ADE_train_1", 3)] {
            write_image(
                &dir.path().join(format!("images/training/{name}.jpg")),
                8,
                6,
            );
            write_target(
                &dir.path().join(format!("annotations/training/{name}.png")),
                8,
                6,
                value,
            );
        }
        dir
    }

    #[test]
    fn label_table_matches_class_count() {
        assert_eq!(ADE20K_LABELS.len(), Ade20k::meta().num_classes);
        assert_eq!(ADE20K_LABELS[0], "background");
    }

    #[test]
    fn samples_are_paired_and_sorted() {
        let dir = fixture();
        let dataset = Ade20k::new(dir.path(), "training").unwrap();

        assert_eq!(dataset.len(), 2);
        assert!(dataset.samples()[0].0.ends_with("ADE_train_1.jpg"));
        assert!(dataset.samples()[0].1.ends_with("ADE_train_1.png"));

        let item = dataset.get(0).unwrap();
        assert_eq!(item.image.dimensions(), (8, 6));
        assert!(item.target.pixels().all(|p| p.0[0] == 3));
        assert!(dataset.get(2).is_none());
    }

    #[test]
    fn transform_is_applied() {
        let dir = fixture();
        let dataset = Ade20k::new(dir.path(), "training")
            .unwrap()
            .with_transform(Box::new(Resize::new(4, 4)));

        let item = dataset.get(1).unwrap();
        assert_eq!(item.image.dimensions(), (4, 4));
        assert!(item.target.pixels().all(|p| p.0[0] == 5));
    }

    #[test]
    fn rejects_unknown_split_and_empty_dirs() {
        let dir = fixture();
        assert!(matches!(
            Ade20k::new(dir.path(), "train"),
            Err(DatasetError::InvalidSplit { .. })
        ));

        std::fs::create_dir_all(dir.path().join("images/validation")).unwrap();
        assert!(matches!(
            Ade20k::new(dir.path(), "validation"),
            Err(DatasetError::NoSamples { .. })
        ));
    }
}
