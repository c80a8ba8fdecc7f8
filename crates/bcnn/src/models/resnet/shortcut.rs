//! # Projection shortcut for residual blocks.
//!
//! A 1x1 conv + norm that matches the skip path to the residual path when
//! the stride or the channel width changes. No activation; the block
//! rectifies after the add.

use crate::checkpoint::{key, Checkpointable, StateDict};
use crate::util::{rectifier_conv_initializer, stride_div_output_resolution};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ProjectionShortcut`] Meta trait.
pub trait ProjectionShortcutMeta {
    /// The size of the in channels dimension.
    fn in_channels(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_channels(&self) -> usize;

    /// The stride of the projection.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// # Panics
    ///
    /// If the input resolution is not a multiple of the stride.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_div_output_resolution(input_resolution, self.stride())
    }
}

/// [`ProjectionShortcut`] configuration.
///
/// Implements [`ProjectionShortcutMeta`].
#[derive(Config, Debug)]
pub struct ProjectionShortcutConfig {
    /// The size of the in channels dimension.
    in_channels: usize,

    /// The size of the out channels dimension.
    out_channels: usize,

    /// The stride of the projection.
    #[config(default = 1)]
    stride: usize,

    /// Convolution override initializer.
    #[config(default = "rectifier_conv_initializer()")]
    pub initializer: Initializer,
}

impl ProjectionShortcutMeta for ProjectionShortcutConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl ProjectionShortcutConfig {
    /// Initialize a [`ProjectionShortcut`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ProjectionShortcut<B> {
        ProjectionShortcut {
            conv: Conv2dConfig::new([self.in_channels, self.out_channels], [1, 1])
                .with_stride([self.stride, self.stride])
                .with_padding(PaddingConfig2d::Explicit(0, 0))
                .with_initializer(self.initializer.clone())
                .with_bias(false)
                .init(device),
            norm: BatchNormConfig::new(self.out_channels).init(device),
        }
    }
}

/// Skip-path projection: 1x1 conv (possibly strided) followed by a norm.
///
/// Maps ``[batch, in_channels, in_height, in_width]`` to
/// ``[batch, out_channels, out_height, out_width]`` tensors.
///
/// Implements [`ProjectionShortcutMeta`].
#[derive(Module, Debug)]
pub struct ProjectionShortcut<B: Backend> {
    /// 1x1 projection conv.
    pub conv: Conv2d<B>,

    /// Norm over the projected channels.
    pub norm: BatchNorm<B, 2>,
}

impl<B: Backend> ProjectionShortcutMeta for ProjectionShortcut<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1]
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn stride(&self) -> usize {
        self.conv.stride[0]
    }
}

impl<B: Backend> ProjectionShortcut<B> {
    /// Forward pass.
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
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_channels",
                "in_height" = "out_height" * "stride",
                "in_width" = "out_width" * "stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[
                ("in_channels", self.in_channels()),
                ("stride", self.stride())
            ]
        );

        let out = self.conv.forward(input);
        let out = self.norm.forward(out);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &out,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        out
    }
}

impl<B: Backend> Checkpointable<B> for ProjectionShortcut<B> {
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
