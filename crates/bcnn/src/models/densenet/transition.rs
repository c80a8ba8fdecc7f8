//! # Transition step.
//!
//! Compresses the channel count with a 1x1 conv and halves the spatial
//! resolution with a stride-2 average pool. Inserted between dense stages
//! so concatenation growth stays bounded.

use crate::checkpoint::{key, Checkpointable, StateDict};
use crate::layers::act::{Rectifier, RectifierConfig};
use crate::util::rectifier_conv_initializer;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`Transition`] Meta API.
pub trait TransitionMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;
}

/// [`Transition`] Config.
///
/// Implements [`TransitionMeta`].
#[derive(Config, Debug)]
pub struct TransitionConfig {
    /// The number of input feature planes.
    pub in_planes: usize,

    /// The number of output feature planes.
    pub out_planes: usize,

    /// The [`RectifierConfig`] applied before the conv.
    #[config(default = "RectifierConfig::default()")]
    pub act: RectifierConfig,

    /// Convolution override initializer.
    #[config(default = "rectifier_conv_initializer()")]
    pub initializer: Initializer,
}

impl TransitionMeta for TransitionConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn out_planes(&self) -> usize {
        self.out_planes
    }
}

impl TransitionConfig {
    /// Initialize a [`Transition`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> Transition<B> {
        Transition {
            norm: BatchNormConfig::new(self.in_planes).init(device),
            conv: Conv2dConfig::new([self.in_planes, self.out_planes], [1, 1])
                .with_initializer(self.initializer.clone())
                .with_bias(false)
                .init(device),
            pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            act: self.act.init(),
        }
    }
}

/// Channel-compressing, resolution-halving transition.
///
/// Implements [`TransitionMeta`].
#[derive(Module, Debug)]
pub struct Transition<B: Backend> {
    /// Norm over the stage output.
    pub norm: BatchNorm<B, 2>,

    /// 1x1 compression conv.
    pub conv: Conv2d<B>,

    /// 2x2 average pool, stride 2.
    pub pool: AvgPool2d,

    /// Rectifier applied between norm and conv.
    pub act: Rectifier,
}

impl<B: Backend> TransitionMeta for Transition<B> {
    fn in_planes(&self) -> usize {
        self.conv.weight.shape().dims[1]
    }

    fn out_planes(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }
}

impl<B: Backend> Transition<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: \
    ///   ``[batch, in_planes, in_height=out_height*2, in_width=out_width*2]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_planes",
                "in_height" = "out_height" * "stride",
                "in_width" = "out_width" * "stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[("in_planes", self.in_planes()), ("stride", 2)]
        );

        let x = self.act.forward(self.norm.forward(input));
        let x = self.conv.forward(x);
        let out = self.pool.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &out,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        out
    }
}

impl<B: Backend> Checkpointable<B> for Transition<B> {
    fn collect(
        &self,
        prefix: &str,
        dict: &mut StateDict,
    ) {
        self.norm.collect(&key(prefix, "norm"), dict);
        self.conv.collect(&key(prefix, "conv"), dict);
    }

    fn restore(
        mut self,
        prefix: &str,
        dict: &StateDict,
    ) -> Self {
        self.norm = self.norm.restore(&key(prefix, "norm"), dict);
        self.conv = self.conv.restore(&key(prefix, "conv"), dict);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray<f32>;

    #[test]
    fn test_transition_config() {
        let config = TransitionConfig::new(96, 48);
        assert_eq!(config.in_planes(), 96);
        assert_eq!(config.out_planes(), 48);
    }

    #[test]
    fn test_transition_compresses_and_halves() {
        let device = Default::default();

        let transition: Transition<B> = TransitionConfig::new(8, 4).init(&device);

        let input = Tensor::random([2, 8, 16, 16], Distribution::Default, &device);
        let output = transition.forward(input);
        assert_eq!(output.dims(), [2, 4, 8, 8]);
    }
}
