//! # Atrous Spatial Pyramid Pooling (ASPP)
//!
//! The DeepLabV3 context module: parallel atrous convolutions at several rates plus an
//! image-level pooling branch, concatenated and projected.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};
use burn_extra_ops::resize_bilinear;

/// A convolution followed by batch norm and ReLU: the 1x1 branch or a 3x3 atrous branch.
#[derive(Module, Debug)]
pub struct AsppConv<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> AsppConv<B> {
    /// The 1x1 branch.
    fn pointwise(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        let config = Conv2dConfig::new([in_channels, out_channels], [1, 1]);
        Self::from_conv(config, out_channels, device)
    }

    /// A padded 3x3 branch with the given dilation rate.
    ///
    /// # Panics
    ///
    /// Panics if `rate` is zero.
    fn atrous(in_channels: usize, out_channels: usize, rate: usize, device: &Device<B>) -> Self {
        assert!(rate > 0, "ASPP atrous rates must be positive, got {rate}");
        let config = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(rate, rate))
            .with_dilation([rate, rate]);
        Self::from_conv(config, out_channels, device)
    }

    fn from_conv(config: Conv2dConfig, out_channels: usize, device: &Device<B>) -> Self {
        Self {
            conv: config.with_bias(false).init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.relu.forward(self.bn.forward(self.conv.forward(x)))
    }
}

/// Image-level pooling branch, broadcast back to the input size.
#[derive(Module, Debug)]
pub struct AsppPooling<B: Backend> {
    pool: AdaptiveAvgPool2d,
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> AsppPooling<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = x.dims();
        let x = self.pool.forward(x);
        let x = self.relu.forward(self.bn.forward(self.conv.forward(x)));
        resize_bilinear(x, [height, width])
    }
}

/// 1x1 projection of the concatenated branches.
#[derive(Module, Debug)]
pub struct AsppProjection<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    dropout: Dropout,
}

/// Configuration for the [`Aspp`] module.
#[derive(Config, Debug)]
pub struct AsppConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Dilation rates of the atrous branches.
    #[config(default = "[12, 24, 36]")]
    pub atrous_rates: [usize; 3],
    /// Channels of every branch and of the output.
    #[config(default = "256")]
    pub out_channels: usize,
    #[config(default = "0.5")]
    pub dropout: f64,
}

impl AsppConfig {
    /// # Panics
    ///
    /// Panics if an atrous rate is zero.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Aspp<B> {
        let out = self.out_channels;

        let convs = core::iter::once(AsppConv::pointwise(self.in_channels, out, device))
            .chain(
                self.atrous_rates
                    .iter()
                    .map(|&rate| AsppConv::atrous(self.in_channels, out, rate, device)),
            )
            .collect::<Vec<_>>();

        let pooling = AsppPooling {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            conv: Conv2dConfig::new([self.in_channels, out], [1, 1])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out).init(device),
            relu: Relu::new(),
        };

        let project = AsppProjection {
            conv: Conv2dConfig::new([(convs.len() + 1) * out, out], [1, 1])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out).init(device),
            relu: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
        };

        Aspp {
            convs,
            pooling,
            project,
        }
    }
}

/// Atrous Spatial Pyramid Pooling (ASPP) module.
///
/// # Shapes
///   - input: `[batch_size, in_channels, height, width]`
///   - output: `[batch_size, out_channels, height, width]`
#[derive(Module, Debug)]
pub struct Aspp<B: Backend> {
    convs: Vec<AsppConv<B>>,
    pooling: AsppPooling<B>,
    project: AsppProjection<B>,
}

impl<B: Backend> Aspp<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut branches: Vec<_> = self
            .convs
            .iter()
            .map(|conv| conv.forward(x.clone()))
            .collect();
        branches.push(self.pooling.forward(x));

        let x = Tensor::cat(branches, 1);
        let project = &self.project;
        let x = project.relu.forward(project.bn.forward(project.conv.forward(x)));
        project.dropout.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn aspp_keeps_spatial_size() {
        let device = Default::default();
        let aspp = AsppConfig::new(32)
            .with_out_channels(16)
            .init::<TestBackend>(&device);

        assert_eq!(aspp.convs.len(), 4);

        let input = Tensor::<TestBackend, 4>::random([2, 32, 5, 7], Distribution::Default, &device);
        assert_eq!(aspp.forward(input).dims(), [2, 16, 5, 7]);
    }

    #[test]
    fn rate_one_builds_a_3x3_branch() {
        let device = Default::default();
        let aspp = AsppConfig::new(8)
            .with_out_channels(4)
            .with_atrous_rates([1, 2, 3])
            .init::<TestBackend>(&device);

        assert_eq!(aspp.convs[0].conv.weight.dims(), [4, 8, 1, 1]);
        for conv in &aspp.convs[1..] {
            assert_eq!(conv.conv.weight.dims(), [4, 8, 3, 3]);
        }
    }

    #[test]
    #[should_panic(expected = "atrous rates must be positive")]
    fn zero_rate_is_rejected() {
        let device = Default::default();
        let _ = AsppConfig::new(8)
            .with_atrous_rates([0, 12, 24])
            .init::<TestBackend>(&device);
    }

    #[test]
    fn pooling_branch_is_constant_over_space() {
        let device = Default::default();
        let aspp = AsppConfig::new(4).with_out_channels(3).init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::random([1, 4, 3, 3], Distribution::Default, &device);
        let pooled = aspp.pooling.forward(input);
        let corner = pooled.clone().slice([0..1, 0..3, 0..1, 0..1]);
        let center = pooled.slice([0..1, 0..3, 1..2, 1..2]);

        corner
            .into_data()
            .assert_approx_eq::<f32>(&center.into_data(), Default::default());
    }
}
