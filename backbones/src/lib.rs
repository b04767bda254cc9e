//! Backbone implementations for segmentation models
//!
//! This crate provides a unified interface over the feature extractors used by the
//! segmentation heads: ResNet, VGG-16, Xception and MobileNetV3-Large. Every backbone
//! returns one feature map per stage, coarsest last, and segmentation models pick the
//! stages they need through [`FeatureTaps`].

use burn::prelude::*;

pub use mobilenet_v3::{MobileNetV3Backbone, MobileNetV3Config};
pub use resnet::{ResNetBackbone, ResNetConfig, ResNetDepth};
pub use vgg::{VGGBackbone, VggConfig};
pub use xception::{XceptionBackbone, XceptionConfig};

/// Unified backbone trait
pub trait Backbone<B: Backend> {
    /// Forward pass through the backbone
    ///
    /// # Arguments
    /// * `input` - Input tensor of shape `[batch_size, channels, height, width]`
    ///
    /// # Returns
    /// One feature map per stage, ordered from finest to coarsest
    fn forward(&self, input: Tensor<B, 4>) -> Vec<Tensor<B, 4>>;

    /// Get output channels for each stage
    fn output_channels(&self) -> Vec<usize>;
}

impl<B: Backend> Backbone<B> for ResNetBackbone<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        self.forward(input).into()
    }

    fn output_channels(&self) -> Vec<usize> {
        self.output_channels().into()
    }
}

impl<B: Backend> Backbone<B> for VGGBackbone<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        self.forward(input)
    }

    fn output_channels(&self) -> Vec<usize> {
        self.output_channels()
    }
}

impl<B: Backend> Backbone<B> for XceptionBackbone<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        self.forward(input).into()
    }

    fn output_channels(&self) -> Vec<usize> {
        self.output_channels().into()
    }
}

impl<B: Backend> Backbone<B> for MobileNetV3Backbone<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        self.forward(input)
    }

    fn output_channels(&self) -> Vec<usize> {
        self.output_channels()
    }
}

/// Enumeration of supported backbone types
#[derive(Config, Debug, PartialEq, Eq)]
pub enum BackboneType {
    /// ResNet-18
    ResNet18,
    /// ResNet-34
    ResNet34,
    /// ResNet-50
    ResNet50,
    /// ResNet-101
    ResNet101,
    /// ResNet-152
    ResNet152,
    /// VGG-16
    Vgg16,
    /// VGG-16 with batch normalization
    Vgg16Bn,
    /// Xception
    Xception,
    /// MobileNetV3-Large
    MobileNetV3Large,
}

impl BackboneType {
    fn resnet_depth(&self) -> Option<ResNetDepth> {
        match self {
            Self::ResNet18 => Some(ResNetDepth::ResNet18),
            Self::ResNet34 => Some(ResNetDepth::ResNet34),
            Self::ResNet50 => Some(ResNetDepth::ResNet50),
            Self::ResNet101 => Some(ResNetDepth::ResNet101),
            Self::ResNet152 => Some(ResNetDepth::ResNet152),
            _ => None,
        }
    }

    /// Whether `replace_stride_with_dilation` may be set; basic-block ResNets cannot dilate.
    pub const fn supports_dilation(&self) -> bool {
        !matches!(self, Self::ResNet18 | Self::ResNet34)
    }

    /// Name of the matching torchvision / pretrainedmodels architecture.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ResNet18 => "resnet18",
            Self::ResNet34 => "resnet34",
            Self::ResNet50 => "resnet50",
            Self::ResNet101 => "resnet101",
            Self::ResNet152 => "resnet152",
            Self::Vgg16 => "vgg16",
            Self::Vgg16Bn => "vgg16_bn",
            Self::Xception => "xception",
            Self::MobileNetV3Large => "mobilenet_v3_large",
        }
    }
}

/// Backbone configuration shared by all segmentation models.
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// Backbone architecture.
    pub backbone: BackboneType,
    /// ResNet only: replace the stride of `layer2..=layer4` with dilation.
    #[config(default = "[false, false, false]")]
    pub replace_stride_with_dilation: [bool; 3],
    /// MobileNetV3 only: dilate the last blocks to keep an output stride of 16.
    #[config(default = "false")]
    pub dilated: bool,
}

impl BackboneConfig {
    /// Output channels of every stage, known without building the network.
    pub fn output_channels(&self) -> Vec<usize> {
        if let Some(depth) = self.backbone.resnet_depth() {
            return depth.stage_channels().into();
        }
        match self.backbone {
            BackboneType::Vgg16 | BackboneType::Vgg16Bn => vec![64, 128, 256, 512, 512],
            BackboneType::Xception => vec![64, 128, 256, 728, 2048],
            _ => vec![16, 24, 40, 80, 160, 960],
        }
    }

    /// Initialize the backbone.
    ///
    /// # Panics
    ///
    /// Panics if dilation is requested for a backbone without [`BackboneType::supports_dilation`].
    pub fn init<B: Backend>(&self, device: &B::Device) -> BackboneWrapper<B> {
        create_backbone(self, device)
    }
}

/// Enum to wrap different backbone implementations
#[derive(Module, Debug)]
pub enum BackboneWrapper<B: Backend> {
    /// ResNet backbone
    ResNet(ResNetBackbone<B>),
    /// VGG backbone
    VGG(VGGBackbone<B>),
    /// Xception backbone
    Xception(XceptionBackbone<B>),
    /// MobileNetV3 backbone
    MobileNetV3(MobileNetV3Backbone<B>),
}

impl<B: Backend> Backbone<B> for BackboneWrapper<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        match self {
            Self::ResNet(backbone) => Backbone::forward(backbone, input),
            Self::VGG(backbone) => Backbone::forward(backbone, input),
            Self::Xception(backbone) => Backbone::forward(backbone, input),
            Self::MobileNetV3(backbone) => Backbone::forward(backbone, input),
        }
    }

    fn output_channels(&self) -> Vec<usize> {
        match self {
            Self::ResNet(backbone) => Backbone::output_channels(backbone),
            Self::VGG(backbone) => Backbone::output_channels(backbone),
            Self::Xception(backbone) => Backbone::output_channels(backbone),
            Self::MobileNetV3(backbone) => Backbone::output_channels(backbone),
        }
    }
}

/// Factory function to create backbones
pub fn create_backbone<B: Backend>(
    config: &BackboneConfig,
    device: &Device<B>,
) -> BackboneWrapper<B> {
    if let Some(depth) = config.backbone.resnet_depth() {
        let backbone = ResNetConfig::new(depth)
            .with_replace_stride_with_dilation(config.replace_stride_with_dilation)
            .init(device);
        return BackboneWrapper::ResNet(backbone);
    }

    match config.backbone {
        BackboneType::Vgg16 => BackboneWrapper::VGG(VggConfig::vgg16().init(device)),
        BackboneType::Vgg16Bn => BackboneWrapper::VGG(VggConfig::vgg16_bn().init(device)),
        BackboneType::Xception => BackboneWrapper::Xception(XceptionConfig::new().init(device)),
        _ => BackboneWrapper::MobileNetV3(
            MobileNetV3Config::new()
                .with_dilated(config.dilated)
                .init(device),
        ),
    }
}

/// Resolve a possibly negative stage index against `len` stages.
///
/// Negative indices count from the end, so `-1` is the coarsest stage.
pub fn resolve_stage_index(index: isize, len: usize) -> Option<usize> {
    let len = isize::try_from(len).ok()?;
    let resolved = if index < 0 { len + index } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

/// Named backbone stages a segmentation model consumes.
#[derive(Config, Debug, PartialEq, Eq)]
pub struct FeatureTaps {
    /// `(stage index, role)` pairs; negative indices count from the last stage.
    pub taps: Vec<(isize, String)>,
}

impl FeatureTaps {
    /// The 1/16 and 1/32 features of BiSeNet's context path.
    pub fn context_path() -> Self {
        Self::new(vec![(-2, "16x".to_string()), (-1, "32x".to_string())])
    }

    /// Final features plus the stage feeding the auxiliary classifier.
    pub fn out_aux(aux_index: isize) -> Self {
        Self::new(vec![(-1, "out".to_string()), (aux_index, "aux".to_string())])
    }

    /// Stage index of `role`, resolved against `num_stages`.
    pub fn index_of(&self, role: &str, num_stages: usize) -> Option<usize> {
        self.taps
            .iter()
            .find(|(_, name)| name == role)
            .and_then(|(index, _)| resolve_stage_index(*index, num_stages))
    }

    /// Positive stage indices in tap order, `None` if any tap is out of range.
    pub fn resolve(&self, num_stages: usize) -> Option<Vec<usize>> {
        self.taps
            .iter()
            .map(|(index, _)| resolve_stage_index(*index, num_stages))
            .collect()
    }

    /// Channel count of every tap, given the backbone's per-stage channels.
    pub fn channels(&self, stage_channels: &[usize]) -> Option<Vec<(String, usize)>> {
        self.taps
            .iter()
            .map(|(index, name)| {
                resolve_stage_index(*index, stage_channels.len())
                    .map(|i| (name.clone(), stage_channels[i]))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn input(height: usize, width: usize) -> Tensor<TestBackend, 4> {
        Tensor::<TestBackend, 4>::random(
            [1, 3, height, width],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &Default::default(),
        )
    }

    #[test]
    fn test_resnet_backbone() {
        let device = Default::default();
        let config = BackboneConfig::new(BackboneType::ResNet50);
        let backbone = create_backbone::<TestBackend>(&config, &device);

        let output = backbone.forward(input(64, 64));
        let channels = backbone.output_channels();

        assert_eq!(channels, config.output_channels());
        assert_eq!(output.len(), 4);
        assert_eq!(output[0].dims(), [1, 256, 16, 16]);
        assert_eq!(output[3].dims(), [1, 2048, 2, 2]);
    }

    #[test]
    fn test_dilated_resnet_backbone() {
        let device = Default::default();
        let config = BackboneConfig::new(BackboneType::ResNet50)
            .with_replace_stride_with_dilation([false, true, true]);
        let backbone = config.init::<TestBackend>(&device);

        let output = backbone.forward(input(64, 64));
        assert_eq!(output[3].dims(), [1, 2048, 8, 8]);
    }

    #[test]
    fn test_vgg_backbone() {
        let device = Default::default();
        let config = BackboneConfig::new(BackboneType::Vgg16);
        let backbone = config.init::<TestBackend>(&device);

        let output = backbone.forward(input(64, 64));

        assert_eq!(backbone.output_channels(), config.output_channels());
        assert_eq!(output.len(), 5);
        assert_eq!(output[4].dims(), [1, 512, 2, 2]);
    }

    #[test]
    fn test_xception_backbone() {
        let device = Default::default();
        let config = BackboneConfig::new(BackboneType::Xception);
        let backbone = config.init::<TestBackend>(&device);

        let output = backbone.forward(input(64, 64));

        assert_eq!(backbone.output_channels(), config.output_channels());
        assert_eq!(output.len(), 5);
        assert_eq!(output[3].dims(), [1, 728, 4, 4]);
    }

    #[test]
    fn test_mobilenet_backbone() {
        let device = Default::default();
        let config = BackboneConfig::new(BackboneType::MobileNetV3Large).with_dilated(true);
        let backbone = config.init::<TestBackend>(&device);

        let output = backbone.forward(input(64, 64));

        assert_eq!(backbone.output_channels(), config.output_channels());
        assert_eq!(output.len(), 6);
        assert_eq!(output[5].dims(), [1, 960, 4, 4]);
    }

    #[test]
    fn test_supports_dilation() {
        assert!(!BackboneType::ResNet18.supports_dilation());
        assert!(!BackboneType::ResNet34.supports_dilation());
        assert!(BackboneType::ResNet50.supports_dilation());
        assert!(BackboneType::MobileNetV3Large.supports_dilation());
    }

    #[test]
    fn test_resolve_stage_index() {
        assert_eq!(resolve_stage_index(-1, 4), Some(3));
        assert_eq!(resolve_stage_index(-4, 6), Some(2));
        assert_eq!(resolve_stage_index(1, 4), Some(1));
        assert_eq!(resolve_stage_index(-5, 4), None);
        assert_eq!(resolve_stage_index(4, 4), None);
    }

    #[test]
    fn test_feature_taps() {
        let taps = FeatureTaps::context_path();
        assert_eq!(taps.resolve(4), Some(vec![2, 3]));
        assert_eq!(taps.index_of("32x", 5), Some(4));
        assert_eq!(
            taps.channels(&[64, 128, 256, 512]),
            Some(vec![("16x".to_string(), 256), ("32x".to_string(), 512)])
        );

        let taps = FeatureTaps::out_aux(-4);
        let channels = BackboneConfig::new(BackboneType::MobileNetV3Large).output_channels();
        assert_eq!(
            taps.channels(&channels),
            Some(vec![("out".to_string(), 960), ("aux".to_string(), 40)])
        );
        assert_eq!(taps.resolve(3), None);
    }
}
