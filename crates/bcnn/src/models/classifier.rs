//! # Tagged topology selection.
//!
//! [`ImageClassifier`] wraps the three model families behind one module,
//! selected at construction time by the config variant. Dispatch is by
//! tagged variant; there is no runtime introspection over module trees.

use crate::checkpoint::{Checkpointable, StateDict};
use crate::models::convnet::{ConvNet, ConvNetConfig};
use crate::models::densenet::{DenseNet, DenseNetConfig};
use crate::models::resnet::{ResNet, ResNetConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ImageClassifier`] Config.
#[derive(Config, Debug)]
pub enum ImageClassifierConfig {
    /// Residual-stack model.
    ResNet(ResNetConfig),

    /// Plain stacked-conv model.
    ConvNet(ConvNetConfig),

    /// Dense-growth model.
    DenseNet(DenseNetConfig),
}

impl From<ResNetConfig> for ImageClassifierConfig {
    fn from(config: ResNetConfig) -> Self {
        Self::ResNet(config)
    }
}

impl From<ConvNetConfig> for ImageClassifierConfig {
    fn from(config: ConvNetConfig) -> Self {
        Self::ConvNet(config)
    }
}

impl From<DenseNetConfig> for ImageClassifierConfig {
    fn from(config: DenseNetConfig) -> Self {
        Self::DenseNet(config)
    }
}

impl ImageClassifierConfig {
    /// The number of target classes.
    pub fn num_classes(&self) -> usize {
        match self {
            Self::ResNet(config) => config.num_classes,
            Self::ConvNet(config) => config.num_classes,
            Self::DenseNet(config) => config.num_classes,
        }
    }

    /// Initialize an [`ImageClassifier`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ImageClassifier<B> {
        match self {
            Self::ResNet(config) => ImageClassifier::ResNet(config.init(device)),
            Self::ConvNet(config) => ImageClassifier::ConvNet(config.init(device)),
            Self::DenseNet(config) => ImageClassifier::DenseNet(config.init(device)),
        }
    }
}

/// Classifier wrapper over the three model families.
#[derive(Module, Debug)]
pub enum ImageClassifier<B: Backend> {
    /// Residual-stack model.
    ResNet(ResNet<B>),

    /// Plain stacked-conv model.
    ConvNet(ConvNet<B>),

    /// Dense-growth model.
    DenseNet(DenseNet<B>),
}

impl<B: Backend> ImageClassifier<B> {
    /// The number of target classes.
    pub fn num_classes(&self) -> usize {
        match self {
            Self::ResNet(model) => model.num_classes(),
            Self::ConvNet(model) => model.num_classes(),
            Self::DenseNet(model) => model.num_classes(),
        }
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, 3, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        match self {
            Self::ResNet(model) => model.forward(input),
            Self::ConvNet(model) => model.forward(input),
            Self::DenseNet(model) => model.forward(input),
        }
    }
}

impl<B: Backend> Checkpointable<B> for ImageClassifier<B> {
    fn collect(
        &self,
        prefix: &str,
        dict: &mut StateDict,
    ) {
        match self {
            Self::ResNet(model) => model.collect(prefix, dict),
            Self::ConvNet(model) => model.collect(prefix, dict),
            Self::DenseNet(model) => model.collect(prefix, dict),
        }
    }

    fn restore(
        self,
        prefix: &str,
        dict: &StateDict,
    ) -> Self {
        match self {
            Self::ResNet(model) => Self::ResNet(model.restore(prefix, dict)),
            Self::ConvNet(model) => Self::ConvNet(model.restore(prefix, dict)),
            Self::DenseNet(model) => Self::DenseNet(model.restore(prefix, dict)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray<f32>;

    #[test]
    fn test_every_topology_maps_images_to_logits() {
        let device = Default::default();

        let configs: Vec<ImageClassifierConfig> = vec![
            ResNetConfig::new(10).with_blocks([1, 1, 1]).into(),
            ConvNetConfig::new(10).into(),
            DenseNetConfig::new(10).with_blocks([1, 1, 1, 1]).into(),
        ];

        for config in configs {
            assert_eq!(config.num_classes(), 10);
            let model: ImageClassifier<B> = config.init(&device);
            assert_eq!(model.num_classes(), 10);

            for batch in [1, 4] {
                let input = Tensor::random([batch, 3, 32, 32], Distribution::Default, &device);
                let output = model.forward(input);
                assert_eq!(output.dims(), [batch, 10]);
            }
        }
    }
}
