//! # Dense-growth bottleneck unit.
//!
//! Pre-activation bottleneck: norm → rectify → 1x1 conv (to a narrow
//! working width) → norm → rectify → 3x3 conv producing `growth_rate` new
//! channels, which are concatenated onto the unit's own input along the
//! channel axis.

use crate::checkpoint::{key, Checkpointable, StateDict};
use crate::layers::act::{Rectifier, RectifierConfig};
use crate::util::rectifier_conv_initializer;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`DenseBottleneck`] Meta API.
pub trait DenseBottleneckMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of new channels the unit contributes.
    fn growth_rate(&self) -> usize;

    /// The number of output feature planes.
    ///
    /// ``out_planes = in_planes + growth_rate``
    fn out_planes(&self) -> usize {
        self.in_planes() + self.growth_rate()
    }
}

/// [`DenseBottleneck`] Config.
///
/// Implements [`DenseBottleneckMeta`].
#[derive(Config, Debug)]
pub struct DenseBottleneckConfig {
    /// The number of input feature planes.
    pub in_planes: usize,

    /// The number of new channels the unit contributes.
    pub growth_rate: usize,

    /// Working-width multiplier for the 1x1 bottleneck conv.
    #[config(default = 4)]
    pub bottleneck_factor: usize,

    /// The [`RectifierConfig`] for both rectifications.
    #[config(default = "RectifierConfig::default()")]
    pub act: RectifierConfig,

    /// Convolution override initializer.
    #[config(default = "rectifier_conv_initializer()")]
    pub initializer: Initializer,
}

impl DenseBottleneckMeta for DenseBottleneckConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn growth_rate(&self) -> usize {
        self.growth_rate
    }
}

impl DenseBottleneckConfig {
    /// Initialize a [`DenseBottleneck`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> DenseBottleneck<B> {
        let working = self.bottleneck_factor * self.growth_rate;

        DenseBottleneck {
            norm1: BatchNormConfig::new(self.in_planes).init(device),
            conv1: Conv2dConfig::new([self.in_planes, working], [1, 1])
                .with_initializer(self.initializer.clone())
                .with_bias(false)
                .init(device),
            norm2: BatchNormConfig::new(working).init(device),
            conv2: Conv2dConfig::new([working, self.growth_rate], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_initializer(self.initializer.clone())
                .with_bias(false)
                .init(device),
            act: self.act.init(),
        }
    }
}

/// Dense-growth bottleneck unit.
///
/// Implements [`DenseBottleneckMeta`].
#[derive(Module, Debug)]
pub struct DenseBottleneck<B: Backend> {
    /// Norm over the unit input.
    pub norm1: BatchNorm<B, 2>,

    /// 1x1 bottleneck conv to the working width.
    pub conv1: Conv2d<B>,

    /// Norm over the working width.
    pub norm2: BatchNorm<B, 2>,

    /// 3x3 conv producing the new channels.
    pub conv2: Conv2d<B>,

    /// Rectifier (stateless, shared by both rectifications).
    pub act: Rectifier,
}

impl<B: Backend> DenseBottleneckMeta for DenseBottleneck<B> {
    fn in_planes(&self) -> usize {
        self.conv1.weight.shape().dims[1]
    }

    fn growth_rate(&self) -> usize {
        self.conv2.weight.shape().dims[0]
    }
}

impl<B: Backend> DenseBottleneck<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, height, width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, in_planes + growth_rate, height, width]`` tensor: the
    /// input with the new channels appended.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "in_planes", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("in_planes", self.in_planes())]
        );

        let x = self.act.forward(self.norm1.forward(input.clone()));
        let x = self.conv1.forward(x);
        let x = self.act.forward(self.norm2.forward(x));
        let x = self.conv2.forward(x);

        let out = Tensor::cat(vec![input, x], 1);

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "height", "width"],
            &out,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("height", height),
                ("width", width)
            ]
        );

        out
    }
}

impl<B: Backend> Checkpointable<B> for DenseBottleneck<B> {
    fn collect(
        &self,
        prefix: &str,
        dict: &mut StateDict,
    ) {
        self.norm1.collect(&key(prefix, "norm1"), dict);
        self.conv1.collect(&key(prefix, "conv1"), dict);
        self.norm2.collect(&key(prefix, "norm2"), dict);
        self.conv2.collect(&key(prefix, "conv2"), dict);
    }

    fn restore(
        mut self,
        prefix: &str,
        dict: &StateDict,
    ) -> Self {
        self.norm1 = self.norm1.restore(&key(prefix, "norm1"), dict);
        self.conv1 = self.conv1.restore(&key(prefix, "conv1"), dict);
        self.norm2 = self.norm2.restore(&key(prefix, "norm2"), dict);
        self.conv2 = self.conv2.restore(&key(prefix, "conv2"), dict);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    #[test]
    fn test_dense_bottleneck_config() {
        let config = DenseBottleneckConfig::new(24, 12);
        assert_eq!(config.in_planes(), 24);
        assert_eq!(config.growth_rate(), 12);
        assert_eq!(config.out_planes(), 36);
        assert_eq!(config.bottleneck_factor, 4);
    }

    #[test]
    fn test_dense_bottleneck_grows_channels_exactly() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let block: DenseBottleneck<B> = DenseBottleneckConfig::new(8, 4).init(&device);
        assert_eq!(block.in_planes(), 8);
        assert_eq!(block.growth_rate(), 4);

        let input = Tensor::random([2, 8, 16, 16], Distribution::Default, &device);
        let output = block.forward(input);
        assert_eq!(output.dims(), [2, 12, 16, 16]);
    }

    #[test]
    fn test_dense_bottleneck_passes_input_channels_through() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: DenseBottleneck<B> = DenseBottleneckConfig::new(2, 3).init(&device);

        let input = Tensor::<B, 4>::random([1, 2, 4, 4], Distribution::Default, &device);
        let output = block.forward(input.clone());

        // the first in_planes channels are the unchanged input
        let passthrough = output.slice([0..1, 0..2, 0..4, 0..4]);
        passthrough.to_data().assert_eq(&input.to_data(), true);
    }
}
