//! # Residual block.
//!
//! Two [`ConvNormAct2d`] units with an additive skip path. The skip path
//! is the identity when the stride is 1 and the width is unchanged, and a
//! [`ProjectionShortcut`] otherwise. The final rectification is applied
//! after the add, via the second unit's hooked forward.
//!
//! The additive identity path lets gradients flow directly across the
//! block, which keeps deep stacks trainable.

use crate::checkpoint::{key, Checkpointable, StateDict};
use crate::layers::act::RectifierConfig;
use crate::layers::cna::{ConvNormAct2d, ConvNormAct2dConfig, ConvNormAct2dMeta};
use crate::models::resnet::shortcut::{ProjectionShortcut, ProjectionShortcutConfig};
use crate::util::stride_div_output_resolution;
use burn::nn::conv::Conv2dConfig;
use burn::nn::PaddingConfig2d;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ResidualBlock`] Meta API.
pub trait ResidualBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn planes(&self) -> usize;

    /// The stride of the first conv and the skip path.
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

/// [`ResidualBlock`] Config.
///
/// Implements [`ResidualBlockMeta`].
#[derive(Config, Debug)]
pub struct ResidualBlockConfig {
    /// The number of input feature planes.
    pub in_planes: usize,

    /// The number of output feature planes.
    pub planes: usize,

    /// The stride of the first conv and the skip path.
    #[config(default = 1)]
    pub stride: usize,

    /// The [`RectifierConfig`] for both units.
    #[config(default = "RectifierConfig::default()")]
    pub act: RectifierConfig,
}

impl ResidualBlockMeta for ResidualBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn planes(&self) -> usize {
        self.planes
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl ResidualBlockConfig {
    /// Initialize a [`ResidualBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ResidualBlock<B> {
        let shortcut = if self.stride != 1 || self.in_planes != self.planes {
            ProjectionShortcutConfig::new(self.in_planes, self.planes)
                .with_stride(self.stride)
                .init(device)
                .into()
        } else {
            None
        };

        let cna1 = ConvNormAct2dConfig::new(
            Conv2dConfig::new([self.in_planes, self.planes], [3, 3])
                .with_stride([self.stride, self.stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1)),
        )
        .with_act(self.act.clone())
        .init(device);

        let cna2 = ConvNormAct2dConfig::new(
            Conv2dConfig::new([self.planes, self.planes], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1)),
        )
        .with_act(self.act)
        .init(device);

        ResidualBlock {
            shortcut,
            cna1,
            cna2,
        }
    }
}

/// Residual block.
///
/// Implements [`ResidualBlockMeta`].
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    /// Optional skip-path projection.
    ///
    /// `None` when the skip path is the identity (stride 1, unchanged
    /// width); the identity path carries no parameters.
    pub shortcut: Option<ProjectionShortcut<B>>,

    /// First conv/norm/rectifier unit (carries the stride).
    pub cna1: ConvNormAct2d<B>,

    /// Second conv/norm/rectifier unit (rectifies after the add).
    pub cna2: ConvNormAct2d<B>,
}

impl<B: Backend> ResidualBlockMeta for ResidualBlock<B> {
    fn in_planes(&self) -> usize {
        self.cna1.in_channels()
    }

    fn planes(&self) -> usize {
        self.cna2.out_channels()
    }

    fn stride(&self) -> usize {
        self.cna1.stride()[0]
    }
}

impl<B: Backend> ResidualBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: \
    ///   ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, planes, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let identity = match &self.shortcut {
            Some(shortcut) => shortcut.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.cna1.forward(input);
        self.cna2.forward_with(x, |x| x + identity)
    }
}

impl<B: Backend> Checkpointable<B> for ResidualBlock<B> {
    fn collect(
        &self,
        prefix: &str,
        dict: &mut StateDict,
    ) {
        if let Some(shortcut) = &self.shortcut {
            shortcut.collect(&key(prefix, "shortcut"), dict);
        }
        self.cna1.collect(&key(prefix, "cna1"), dict);
        self.cna2.collect(&key(prefix, "cna2"), dict);
    }

    fn restore(
        mut self,
        prefix: &str,
        dict: &StateDict,
    ) -> Self {
        self.shortcut = self
            .shortcut
            .map(|shortcut| shortcut.restore(&key(prefix, "shortcut"), dict));
        self.cna1 = self.cna1.restore(&key(prefix, "cna1"), dict);
        self.cna2 = self.cna2.restore(&key(prefix, "cna2"), dict);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    #[test]
    fn test_residual_block_config() {
        let config = ResidualBlockConfig::new(16, 32);
        assert_eq!(config.in_planes(), 16);
        assert_eq!(config.planes(), 32);
        assert_eq!(config.stride(), 1);
        assert_eq!(config.output_resolution([16, 16]), [16, 16]);

        let config = config.with_stride(2);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.output_resolution([16, 16]), [8, 8]);
    }

    #[test]
    fn test_identity_skip_has_no_parameters() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: ResidualBlock<B> = ResidualBlockConfig::new(8, 8).init(&device);
        assert!(block.shortcut.is_none());

        let input = Tensor::random([2, 8, 16, 16], Distribution::Default, &device);
        let output = block.forward(input.clone());

        // stride 1, unchanged width: output shape equals input shape
        assert_eq!(output.dims(), input.dims());
    }

    #[test]
    fn test_downsampling_block_projects_the_skip_path() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let block: ResidualBlock<B> = ResidualBlockConfig::new(8, 16).with_stride(2).init(&device);
        assert!(block.shortcut.is_some());
        assert_eq!(block.in_planes(), 8);
        assert_eq!(block.planes(), 16);
        assert_eq!(block.stride(), 2);

        let input = Tensor::random([2, 8, 16, 16], Distribution::Default, &device);
        let output = block.forward(input);

        assert_shape_contract!(
            ["batch", "planes", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("planes", 16),
                ("out_height", 8),
                ("out_width", 8)
            ]
        );
    }

    #[test]
    fn test_widening_block_without_stride_projects_the_skip_path() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: ResidualBlock<B> = ResidualBlockConfig::new(8, 16).init(&device);
        assert!(block.shortcut.is_some());

        let input = Tensor::random([1, 8, 8, 8], Distribution::Default, &device);
        let output = block.forward(input);
        assert_eq!(output.dims(), [1, 16, 8, 8]);
    }
}
