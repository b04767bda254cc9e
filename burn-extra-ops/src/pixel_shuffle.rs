//! Sub-pixel convolution rearrangement (`torch.nn.PixelShuffle`).

use burn::prelude::*;

/// Rearranges a tensor of shape `[N, C * r * r, H, W]` into `[N, C, H * r, W * r]`.
///
/// # Panics
///
/// Panics if the channel dimension is not divisible by `factor * factor`.
pub fn pixel_shuffle<B: Backend>(input: Tensor<B, 4>, factor: usize) -> Tensor<B, 4> {
    let [batch, channels, height, width] = input.dims();
    let factor_sq = factor * factor;
    assert!(
        factor > 0 && channels % factor_sq == 0,
        "pixel_shuffle: {channels} channels are not divisible by {factor}^2"
    );
    let out_channels = channels / factor_sq;

    input
        .reshape([batch, out_channels, factor, factor, height, width])
        // [N, C, H, r, W, r]
        .permute([0, 1, 4, 2, 5, 3])
        .reshape([batch, out_channels, height * factor, width * factor])
}

/// Configuration for [`PixelShuffle`].
#[derive(Config, Debug)]
pub struct PixelShuffleConfig {
    /// Upscale factor applied to both spatial dimensions.
    #[config(default = "2")]
    pub upscale_factor: usize,
}

impl PixelShuffleConfig {
    /// Initialize a new [`PixelShuffle`] module.
    pub const fn init(&self) -> PixelShuffle {
        PixelShuffle {
            upscale_factor: self.upscale_factor,
        }
    }
}

/// Module form of [`pixel_shuffle`].
#[derive(Module, Clone, Debug)]
pub struct PixelShuffle {
    upscale_factor: usize,
}

impl PixelShuffle {
    /// Forward pass.
    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        pixel_shuffle(input, self.upscale_factor)
    }

    /// The configured upscale factor.
    pub const fn upscale_factor(&self) -> usize {
        self.upscale_factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::ndarray::NdArray, tensor::TensorData};

    type TestBackend = NdArray<f32>;

    #[test]
    fn pixel_shuffle_output_shape() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::zeros([2, 36, 5, 7], &device);
        let module = PixelShuffleConfig::new().with_upscale_factor(3).init();

        assert_eq!(module.forward(input).dims(), [2, 4, 15, 21]);
    }

    #[test]
    fn pixel_shuffle_interleaves_channels() {
        let device = Default::default();
        // Four 1x1 channels become a single 2x2 block in row-major order.
        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [1, 4, 1, 1]),
            &device,
        );
        let output = pixel_shuffle(input, 2);

        assert_eq!(output.dims(), [1, 1, 2, 2]);
        output.into_data().assert_eq(
            &TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [1, 1, 2, 2]),
            false,
        );
    }

    #[test]
    fn pixel_shuffle_keeps_spatial_layout_per_channel() {
        let device = Default::default();
        // Channel k holds value k at every position of a 2x1 map.
        let values: Vec<f32> = (0..4).flat_map(|c| [c as f32, c as f32]).collect();
        let input =
            Tensor::<TestBackend, 4>::from_data(TensorData::new(values, [1, 4, 2, 1]), &device);
        let output = pixel_shuffle(input, 2);

        output.into_data().assert_eq(
            &TensorData::new(
                vec![0.0f32, 1.0, 2.0, 3.0, 0.0, 1.0, 2.0, 3.0],
                [1, 1, 4, 2],
            ),
            false,
        );
    }

    #[test]
    #[should_panic(expected = "not divisible")]
    fn pixel_shuffle_rejects_bad_channel_count() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::zeros([1, 6, 2, 2], &device);
        let _ = pixel_shuffle(input, 2);
    }
}
