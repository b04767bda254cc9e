//! Spatial resizing helper.

use burn::{prelude::*, tensor::TensorData};

/// Bilinear resize of an NCHW tensor to `[height, width]`.
///
/// Samples at pixel centers like PyTorch's `align_corners=False`, clamping source
/// coordinates at the border. Returns the input unchanged when it already has the
/// requested size.
pub fn resize_bilinear<B: Backend>(input: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [_, _, height, width] = input.dims();
    if [height, width] == size {
        return input;
    }
    let x = resize_axis(input, 2, size[0]);
    resize_axis(x, 3, size[1])
}

/// Linear resize of dimension `dim` to `output` samples.
fn resize_axis<B: Backend>(input: Tensor<B, 4>, dim: usize, output: usize) -> Tensor<B, 4> {
    let size = input.dims()[dim];
    if size == output {
        return input;
    }
    let device = input.device();
    let samples = AxisSamples::new(size, output);

    let lower = Tensor::<B, 1, Int>::from_data(TensorData::new(samples.lower, [output]), &device);
    let upper = Tensor::<B, 1, Int>::from_data(TensorData::new(samples.upper, [output]), &device);
    let mut shape = [1; 4];
    shape[dim] = output;
    let weight = Tensor::<B, 1>::from_data(TensorData::new(samples.weight, [output]), &device)
        .reshape(shape);

    let low = input.clone().select(dim, lower);
    let high = input.select(dim, upper);
    low.clone() + (high - low) * weight
}

/// Neighbouring source indices and interpolation weights of every output sample.
#[derive(Debug, PartialEq)]
struct AxisSamples {
    lower: Vec<i64>,
    upper: Vec<i64>,
    weight: Vec<f32>,
}

impl AxisSamples {
    fn new(input: usize, output: usize) -> Self {
        let scale = input as f64 / output as f64;
        let last = input.saturating_sub(1);

        let mut samples = Self {
            lower: Vec::with_capacity(output),
            upper: Vec::with_capacity(output),
            weight: Vec::with_capacity(output),
        };
        for index in 0..output {
            let source = ((index as f64 + 0.5) * scale - 0.5).max(0.0);
            let lower = (source.floor() as usize).min(last);
            samples.lower.push(lower as i64);
            samples.upper.push((lower + 1).min(last) as i64);
            samples.weight.push((source - lower as f64) as f32);
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn resize_changes_spatial_dims_only() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::ones([2, 3, 8, 8], &device);
        let output = resize_bilinear(input, [61, 63]);

        assert_eq!(output.dims(), [2, 3, 61, 63]);
    }

    #[test]
    fn resize_of_constant_map_stays_constant() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::ones([1, 1, 4, 4], &device).mul_scalar(3.0);
        let output = resize_bilinear(input, [7, 5]);

        let expected = TensorData::new(vec![3.0f32; 35], [1, 1, 7, 5]);
        output
            .into_data()
            .assert_approx_eq::<f32>(&expected, Default::default());
    }

    #[test]
    fn upsampling_a_ramp_samples_pixel_centers() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::from_floats([[[[0.0, 1.0]]]], &device);
        let output = resize_bilinear(input, [1, 4]);

        let expected = TensorData::from([[[[0.0f32, 0.25, 0.75, 1.0]]]]);
        output
            .into_data()
            .assert_approx_eq::<f32>(&expected, Default::default());
    }

    #[test]
    fn downsampling_averages_neighbours() {
        let device = Default::default();
        let input =
            Tensor::<TestBackend, 4>::from_floats([[[[0.0], [1.0], [2.0], [3.0]]]], &device);
        let output = resize_bilinear(input, [2, 1]);

        let expected = TensorData::from([[[[0.5f32], [2.5]]]]);
        output
            .into_data()
            .assert_approx_eq::<f32>(&expected, Default::default());
    }

    #[test]
    fn border_samples_are_clamped() {
        let samples = AxisSamples::new(2, 4);

        assert_eq!(samples.lower, vec![0, 0, 0, 1]);
        assert_eq!(samples.upper, vec![1, 1, 1, 1]);
        assert_eq!(samples.weight, vec![0.0, 0.25, 0.75, 0.25]);
    }
}
