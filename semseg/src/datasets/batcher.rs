use std::marker::PhantomData;

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::{Int, TensorData},
};

use super::SegmentationItem;

/// ImageNet channel means, used by every pretrained backbone.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// A batch of normalized images and their class-index targets.
#[derive(Clone, Debug)]
pub struct SegmentationBatch<B: Backend> {
    /// `[batch_size, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch_size, height, width]`
    pub targets: Tensor<B, 3, Int>,
}

/// Batcher turning [`SegmentationItem`]s into a [`SegmentationBatch`].
#[derive(Clone, Default)]
pub struct SegmentationBatcher<B: Backend> {
    _phantom: PhantomData<B>,
}

impl<B: Backend> SegmentationBatcher<B> {
    pub const fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

/// Convert an RGB image into a normalized `[1, 3, H, W]` tensor.
pub fn image_to_tensor<B: Backend>(image: &image::RgbImage, device: &B::Device) -> Tensor<B, 4> {
    let (width, height) = image.dimensions();
    let data: Vec<f32> = image.as_raw().iter().map(|&v| f32::from(v) / 255.0).collect();

    let tensor = Tensor::<B, 3>::from_data(
        TensorData::new(data, [height as usize, width as usize, 3]),
        device,
    )
    .permute([2, 0, 1])
    .unsqueeze::<4>();

    normalize(tensor, device)
}

/// Apply ImageNet normalization to a `[N, 3, H, W]` tensor in `[0, 1]`.
pub fn normalize<B: Backend>(images: Tensor<B, 4>, device: &B::Device) -> Tensor<B, 4> {
    let mean = Tensor::<B, 1>::from_floats(IMAGENET_MEAN, device).reshape([1, 3, 1, 1]);
    let std = Tensor::<B, 1>::from_floats(IMAGENET_STD, device).reshape([1, 3, 1, 1]);
    (images - mean) / std
}

impl<B: Backend> Batcher<B, SegmentationItem, SegmentationBatch<B>> for SegmentationBatcher<B> {
    /// # Panics
    ///
    /// Panics if the items do not share the same size; use a `Resize` or `RandomCrop`
    /// transform on the dataset.
    fn batch(&self, items: Vec<SegmentationItem>, device: &B::Device) -> SegmentationBatch<B> {
        let mut images = Vec::with_capacity(items.len());
        let mut targets = Vec::with_capacity(items.len());

        for item in items {
            let (width, height) = item.target.dimensions();
            images.push(image_to_tensor::<B>(&item.image, device));

            let target: Vec<i64> = item.target.into_raw().into_iter().map(i64::from).collect();
            targets.push(
                Tensor::<B, 2, Int>::from_data(
                    TensorData::new(target, [height as usize, width as usize]),
                    device,
                )
                .unsqueeze::<3>(),
            );
        }

        SegmentationBatch {
            images: Tensor::cat(images, 0),
            targets: Tensor::cat(targets, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    fn item(value: u8, class: u8) -> SegmentationItem {
        SegmentationItem {
            image: RgbImage::from_pixel(3, 2, Rgb([value; 3])),
            target: GrayImage::from_pixel(3, 2, Luma([class])),
        }
    }

    #[test]
    fn batch_shapes() {
        let device = Default::default();
        let batcher = SegmentationBatcher::<TestBackend>::new();

        let batch = batcher.batch(vec![item(0, 1), item(255, 255)], &device);

        assert_eq!(batch.images.dims(), [2, 3, 2, 3]);
        assert_eq!(batch.targets.dims(), [2, 2, 3]);
    }

    #[test]
    fn images_are_normalized_and_targets_preserved() {
        let device = Default::default();
        let batcher = SegmentationBatcher::<TestBackend>::new();

        let batch = batcher.batch(vec![item(255, 7)], &device);

        let expected: Vec<f32> = (0..3)
            .map(|c| (1.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c])
            .collect();
        let pixel = batch.images.slice([0..1, 0..3, 0..1, 0..1]).reshape([3]);
        pixel
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::new(expected, [3]), Default::default());

        let targets = batch.targets.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert!(targets.iter().all(|&t| t == 7));
    }
}
