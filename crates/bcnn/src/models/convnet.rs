//! # Plain stacked-conv classifier.
//!
//! A short feature trunk of [`ConvNormAct2d`] units interleaved with
//! max-pooling, kept as an explicit ordered list of polymorphic layers
//! evaluated in sequence, followed by global average pooling and a
//! two-layer classification head.

use crate::checkpoint::{key, Checkpointable, StateDict};
use crate::layers::act::{Rectifier, RectifierConfig};
use crate::layers::cna::{ConvNormAct2d, ConvNormAct2dConfig};
use burn::module::Module;
use burn::nn::conv::Conv2dConfig;
use burn::nn::pool::{
    AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig,
};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::{Backend, Config, Tensor};

/// Trunk widths: narrow for three units, then doubled.
const TRUNK_WIDTHS: [usize; 2] = [64, 128];

/// One layer of the feature trunk.
#[derive(Module, Debug)]
pub enum TrunkLayer<B: Backend> {
    /// Conv/norm/rectifier unit.
    Conv(ConvNormAct2d<B>),

    /// 2x2 max-pool, stride 2.
    Pool(MaxPool2d),
}

impl<B: Backend> TrunkLayer<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            TrunkLayer::Conv(layer) => layer.forward(input),
            TrunkLayer::Pool(layer) => layer.forward(input),
        }
    }
}

impl<B: Backend> Checkpointable<B> for TrunkLayer<B> {
    fn collect(
        &self,
        prefix: &str,
        dict: &mut StateDict,
    ) {
        if let TrunkLayer::Conv(layer) = self {
            layer.collect(prefix, dict);
        }
    }

    fn restore(
        self,
        prefix: &str,
        dict: &StateDict,
    ) -> Self {
        match self {
            TrunkLayer::Conv(layer) => TrunkLayer::Conv(layer.restore(prefix, dict)),
            TrunkLayer::Pool(layer) => TrunkLayer::Pool(layer),
        }
    }
}

/// [`ConvNet`] Config.
#[derive(Config, Debug)]
pub struct ConvNetConfig {
    /// The number of target classes.
    pub num_classes: usize,

    /// Classification head dropout probability.
    #[config(default = 0.25)]
    pub dropout: f64,
}

impl ConvNetConfig {
    /// Initialize a [`ConvNet`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvNet<B> {
        let [narrow, wide] = TRUNK_WIDTHS;

        let conv = |in_channels: usize, out_channels: usize| {
            TrunkLayer::Conv(
                ConvNormAct2dConfig::new(
                    Conv2dConfig::new([in_channels, out_channels], [3, 3])
                        .with_padding(PaddingConfig2d::Explicit(1, 1)),
                )
                .init(device),
            )
        };
        let pool = || TrunkLayer::Pool(MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init());

        let features = vec![
            conv(3, narrow),
            pool(),
            conv(narrow, narrow),
            conv(narrow, narrow),
            pool(),
            conv(narrow, wide),
            conv(wide, wide),
            pool(),
            conv(wide, wide),
        ];

        ConvNet {
            features,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc1: LinearConfig::new(wide, wide).init(device),
            act: RectifierConfig::Relu.init(),
            fc2: LinearConfig::new(wide, self.num_classes).init(device),
        }
    }
}

/// Plain stacked-conv model.
#[derive(Module, Debug)]
pub struct ConvNet<B: Backend> {
    /// Ordered feature trunk.
    pub features: Vec<TrunkLayer<B>>,

    /// Global average pooling.
    pub avgpool: AdaptiveAvgPool2d,

    /// Head dropout.
    pub dropout: Dropout,

    /// Hidden classification layer.
    pub fc1: Linear<B>,

    /// Hidden rectifier.
    pub act: Rectifier,

    /// Output classification layer.
    pub fc2: Linear<B>,
}

impl<B: Backend> ConvNet<B> {
    /// The number of target classes.
    pub fn num_classes(&self) -> usize {
        self.fc2.weight.shape().dims[1]
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
        let x = self
            .features
            .iter()
            .fold(input, |x, layer| layer.forward(x));

        let x = self.avgpool.forward(x);
        let x = x.flatten(1, 3);

        let x = self.dropout.forward(x);
        let x = self.fc1.forward(x);
        let x = self.act.forward(x);

        self.fc2.forward(x)
    }
}

impl<B: Backend> Checkpointable<B> for ConvNet<B> {
    fn collect(
        &self,
        prefix: &str,
        dict: &mut StateDict,
    ) {
        for (index, layer) in self.features.iter().enumerate() {
            layer.collect(&key(&key(prefix, "features"), &index.to_string()), dict);
        }
        self.fc1.collect(&key(prefix, "fc1"), dict);
        self.fc2.collect(&key(prefix, "fc2"), dict);
    }

    fn restore(
        mut self,
        prefix: &str,
        dict: &StateDict,
    ) -> Self {
        self.features = self
            .features
            .into_iter()
            .enumerate()
            .map(|(index, layer)| {
                layer.restore(&key(&key(prefix, "features"), &index.to_string()), dict)
            })
            .collect();
        self.fc1 = self.fc1.restore(&key(prefix, "fc1"), dict);
        self.fc2 = self.fc2.restore(&key(prefix, "fc2"), dict);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    #[test]
    fn test_convnet_trunk_layout() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: ConvNet<B> = ConvNetConfig::new(10).init(&device);
        assert_eq!(model.features.len(), 9);
        assert_eq!(model.num_classes(), 10);

        let pools = model
            .features
            .iter()
            .filter(|layer| matches!(layer, TrunkLayer::Pool(_)))
            .count();
        assert_eq!(pools, 3);
    }

    #[test]
    fn test_convnet_forward_logits_shape() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let model: ConvNet<B> = ConvNetConfig::new(10).init(&device);

        for batch in [1, 4] {
            let input = Tensor::random([batch, 3, 32, 32], Distribution::Default, &device);
            let output = model.forward(input);
            assert_eq!(output.dims(), [batch, 10]);
        }
    }
}
