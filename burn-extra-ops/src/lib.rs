//! Additional operations for the Burn deep learning framework
//!
//! This crate provides operations that are commonly used in segmentation networks but are
//! not yet available in the core Burn framework.

use burn::prelude::*;

mod pixel_shuffle;
mod resize;

// Convenient re-exports
pub use pixel_shuffle::{pixel_shuffle, PixelShuffle, PixelShuffleConfig};
pub use resize::resize_bilinear;

/// Additional operations for 4D (NCHW) Burn tensors
pub trait TensorExtraOps<B: Backend> {
    /// Rearrange `[N, C * r * r, H, W]` into `[N, C, H * r, W * r]`.
    fn pixel_shuffle(self, factor: usize) -> Self;

    /// Bilinearly resize the spatial dimensions to `size` (`[height, width]`).
    fn resize_to(self, size: [usize; 2]) -> Self;
}

impl<B: Backend> TensorExtraOps<B> for Tensor<B, 4> {
    fn pixel_shuffle(self, factor: usize) -> Self {
        pixel_shuffle(self, factor)
    }

    fn resize_to(self, size: [usize; 2]) -> Self {
        resize_bilinear(self, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::ndarray::NdArray, tensor::Tensor};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_tensor_extra_ops() {
        let device = Default::default();
        let tensor = Tensor::<TestBackend, 4>::random(
            [2, 12, 4, 5],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );

        assert_eq!(tensor.clone().pixel_shuffle(2).dims(), [2, 3, 8, 10]);
        assert_eq!(tensor.resize_to([7, 9]).dims(), [2, 12, 7, 9]);
    }
}
