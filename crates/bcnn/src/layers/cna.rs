//! # `ConvNormAct2d` - conv/norm/rectifier unit.
//!
//! [`ConvNormAct2d`] is the convolution unit shared by every model family:
//! a bias-free [`Conv2d`], a [`BatchNorm`] sized to the conv output
//! channels, and a [`Rectifier`]. The norm layer absorbs the conv bias
//! term; during training it tracks running mean/variance from batch
//! statistics, and during inference it applies the stored statistics.
//!
//! [`ConvNormAct2dMeta`] defines a common meta API for [`ConvNormAct2d`]
//! and [`ConvNormAct2dConfig`].
//!
//! The forward method can be hooked, to run code between the norm and the
//! rectifier.

use crate::checkpoint::{key, Checkpointable, StateDict};
use crate::layers::act::{Rectifier, RectifierConfig};
use crate::util::rectifier_conv_initializer;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer};
use burn::prelude::{Backend, Tensor};

/// [`ConvNormAct2d`] Meta.
pub trait ConvNormAct2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Get the stride.
    fn stride(&self) -> [usize; 2];
}

/// [`ConvNormAct2d`] Config.
///
/// Implements [`ConvNormAct2dMeta`].
#[derive(Config, Debug)]
pub struct ConvNormAct2dConfig {
    /// The [`Conv2d`] config.
    ///
    /// Bias is forced off at init; the norm layer absorbs it.
    pub conv: Conv2dConfig,

    /// The [`Rectifier`] config.
    #[config(default = "RectifierConfig::default()")]
    pub act: RectifierConfig,

    /// Convolution override initializer.
    #[config(default = "rectifier_conv_initializer()")]
    pub initializer: Initializer,
}

impl ConvNormAct2dMeta for ConvNormAct2dConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride.clone()
    }
}

impl ConvNormAct2dConfig {
    /// Initialize a [`ConvNormAct2d`].
    ///
    /// The norm features are auto-matched to the conv output channels.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ConvNormAct2d<B> {
        let features = self.out_channels();

        let conv = self
            .conv
            .with_bias(false)
            .with_initializer(self.initializer.clone());

        ConvNormAct2d {
            conv: conv.init(device),
            norm: BatchNormConfig::new(features).init(device),
            act: self.act.init(),
        }
    }
}

/// Sequenced conv/norm/rectifier unit.
///
/// Implements [`ConvNormAct2dMeta`].
#[derive(Module, Debug)]
pub struct ConvNormAct2d<B: Backend> {
    /// Internal [`Conv2d`] layer.
    pub conv: Conv2d<B>,

    /// Internal [`BatchNorm`] layer.
    pub norm: BatchNorm<B, 2>,

    /// Rectifier layer.
    pub act: Rectifier,
}

impl<B: Backend> ConvNormAct2dMeta for ConvNormAct2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride.clone()
    }
}

impl<B: Backend> ConvNormAct2d<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: \
    ///   ``[batch, in_channels, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.forward_with(input, |x| x)
    }

    /// Forward pass with a hook between the norm and the rectifier.
    ///
    /// ```rust,ignore
    /// let x = self.conv.forward(input);
    /// let x = self.norm.forward(x);
    /// let x = hook(x);
    /// let x = self.act.forward(x);
    /// ```
    ///
    /// # Arguments
    ///
    /// - `input`: \
    ///   ``[batch, in_channels, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward_with<F>(
        &self,
        input: Tensor<B, 4>,
        hook: F,
    ) -> Tensor<B, 4>
    where
        F: FnOnce(Tensor<B, 4>) -> Tensor<B, 4>,
    {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_channels",
                "in_height" = "out_height" * "height_stride",
                "in_width" = "out_width" * "width_stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[
                ("in_channels", self.in_channels()),
                ("height_stride", self.stride()[0]),
                ("width_stride", self.stride()[1]),
            ]
        );

        let x = self.conv.forward(input);
        let x = self.norm.forward(x);
        let x = hook(x);
        let x = self.act.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }
}

impl<B: Backend> Checkpointable<B> for ConvNormAct2d<B> {
    fn collect(
        &self,
        prefix: &str,
        dict: &mut StateDict,
    ) {
        self.conv.collect(&key(prefix, "conv"), dict);
        self.norm.collect(&key(prefix, "norm"), dict);
    }

    fn restore(
        mut self,
        prefix: &str,
        dict: &StateDict,
    ) -> Self {
        self.conv = self.conv.restore(&key(prefix, "conv"), dict);
        self.norm = self.norm.restore(&key(prefix, "norm"), dict);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};
    use burn::nn::PaddingConfig2d;
    use burn::tensor::Distribution;

    #[test]
    fn test_conv_norm_act_config() {
        let config = ConvNormAct2dConfig::new(
            Conv2dConfig::new([2, 4], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1)),
        );

        assert_eq!(config.in_channels(), 2);
        assert_eq!(config.out_channels(), 4);
        assert_eq!(config.stride(), [2, 2]);
        assert!(matches!(config.act, RectifierConfig::LeakyRelu(_)));
    }

    #[test]
    fn test_conv_norm_act_forward() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let layer: ConvNormAct2d<B> = ConvNormAct2dConfig::new(
            Conv2dConfig::new([2, 4], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1)),
        )
        .init(&device);

        assert_eq!(layer.in_channels(), 2);
        assert_eq!(layer.out_channels(), 4);
        assert_eq!(layer.stride(), [2, 2]);

        let input = Tensor::random([2, 2, 10, 10], Distribution::Default, &device);

        let output = layer.forward(input.clone());
        let expected = {
            let x = layer.conv.forward(input.clone());
            let x = layer.norm.forward(x);
            layer.act.forward(x)
        };
        output.to_data().assert_eq(&expected.to_data(), true);

        assert_shape_contract!(
            ["batch", "out_channels", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_channels", 4),
                ("out_height", 5),
                ("out_width", 5)
            ],
        );
    }

    #[test]
    fn test_conv_norm_act_forward_with_hook() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ConvNormAct2d<B> = ConvNormAct2dConfig::new(
            Conv2dConfig::new([2, 2], [3, 3]).with_padding(PaddingConfig2d::Explicit(1, 1)),
        )
        .init(&device);

        let input = Tensor::random([1, 2, 8, 8], Distribution::Default, &device);

        let hook = |x: Tensor<B, 4>| x * 2.0;
        let output = layer.forward_with(input.clone(), hook);

        let expected = {
            let x = layer.conv.forward(input);
            let x = layer.norm.forward(x);
            let x = hook(x);
            layer.act.forward(x)
        };
        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    #[should_panic(expected = "in_channels")]
    fn test_conv_norm_act_channel_mismatch_panics() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ConvNormAct2d<B> = ConvNormAct2dConfig::new(
            Conv2dConfig::new([4, 8], [3, 3]).with_padding(PaddingConfig2d::Explicit(1, 1)),
        )
        .init(&device);

        let input = Tensor::ones([1, 3, 8, 8], &device);
        layer.forward(input);
    }
}
