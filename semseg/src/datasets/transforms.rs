//! Joint image/target transforms.
//!
//! Every transform receives the image and its target together so that geometric
//! operations stay aligned. Targets are always resampled with nearest-neighbour
//! filtering to keep class indices intact.

use image::{
    imageops::{self, FilterType},
    GrayImage, Luma, Rgb, RgbImage,
};
use rand::{Rng, RngCore};

use super::IGNORE_INDEX;

/// A transform applied to a sample before batching.
pub trait SegmentationTransform: Send + Sync {
    fn apply(
        &self,
        image: RgbImage,
        target: GrayImage,
        rng: &mut dyn RngCore,
    ) -> (RgbImage, GrayImage);
}

/// Resize image and target to a fixed `[height, width]`.
#[derive(Debug, Clone)]
pub struct Resize {
    pub height: u32,
    pub width: u32,
}

impl Resize {
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }
}

impl SegmentationTransform for Resize {
    fn apply(
        &self,
        image: RgbImage,
        target: GrayImage,
        _rng: &mut dyn RngCore,
    ) -> (RgbImage, GrayImage) {
        if image.dimensions() == (self.width, self.height)
            && target.dimensions() == (self.width, self.height)
        {
            return (image, target);
        }
        (
            imageops::resize(&image, self.width, self.height, FilterType::Triangle),
            imageops::resize(&target, self.width, self.height, FilterType::Nearest),
        )
    }
}

/// Mirror image and target horizontally with the given probability.
#[derive(Debug, Clone)]
pub struct RandomHorizontalFlip {
    pub probability: f64,
}

impl RandomHorizontalFlip {
    pub const fn new(probability: f64) -> Self {
        Self { probability }
    }
}

impl Default for RandomHorizontalFlip {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl SegmentationTransform for RandomHorizontalFlip {
    fn apply(
        &self,
        image: RgbImage,
        target: GrayImage,
        rng: &mut dyn RngCore,
    ) -> (RgbImage, GrayImage) {
        if rng.random_bool(self.probability.clamp(0.0, 1.0)) {
            (imageops::flip_horizontal(&image), imageops::flip_horizontal(&target))
        } else {
            (image, target)
        }
    }
}

/// Crop a random `[height, width]` window.
///
/// Samples smaller than the window are padded first: the image with black, the target
/// with the ignore index.
#[derive(Debug, Clone)]
pub struct RandomCrop {
    pub height: u32,
    pub width: u32,
}

impl RandomCrop {
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }
}

impl SegmentationTransform for RandomCrop {
    fn apply(
        &self,
        image: RgbImage,
        target: GrayImage,
        rng: &mut dyn RngCore,
    ) -> (RgbImage, GrayImage) {
        let (width, height) = image.dimensions();
        let padded_width = width.max(self.width);
        let padded_height = height.max(self.height);

        let (image, target) = if (padded_width, padded_height) == (width, height) {
            (image, target)
        } else {
            let mut padded_image = RgbImage::from_pixel(padded_width, padded_height, Rgb([0; 3]));
            let mut padded_target =
                GrayImage::from_pixel(padded_width, padded_height, Luma([IGNORE_INDEX]));
            imageops::replace(&mut padded_image, &image, 0, 0);
            imageops::replace(&mut padded_target, &target, 0, 0);
            (padded_image, padded_target)
        };

        let x = rng.random_range(0..=padded_width - self.width);
        let y = rng.random_range(0..=padded_height - self.height);

        (
            imageops::crop_imm(&image, x, y, self.width, self.height).to_image(),
            imageops::crop_imm(&target, x, y, self.width, self.height).to_image(),
        )
    }
}

/// Apply transforms in sequence.
#[derive(Default)]
pub struct Compose {
    transforms: Vec<Box<dyn SegmentationTransform>>,
}

impl Compose {
    pub fn new(transforms: Vec<Box<dyn SegmentationTransform>>) -> Self {
        Self { transforms }
    }

    /// Append a transform.
    pub fn then<T: SegmentationTransform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }
}

impl SegmentationTransform for Compose {
    fn apply(
        &self,
        mut image: RgbImage,
        mut target: GrayImage,
        rng: &mut dyn RngCore,
    ) -> (RgbImage, GrayImage) {
        for transform in &self.transforms {
            (image, target) = transform.apply(image, target, rng);
        }
        (image, target)
    }
}
