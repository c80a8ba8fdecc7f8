//! # Residual stage.
//!
//! A [`ResidualStage`] is a sequence of [`ResidualBlock`]s; the first
//! block carries the stage's stride and width change, the rest are
//! stride-1 same-width.

use crate::checkpoint::{key, Checkpointable, StateDict};
use crate::models::resnet::residual_block::{
    ResidualBlock, ResidualBlockConfig, ResidualBlockMeta,
};
use crate::util::stride_div_output_resolution;
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// [`ResidualStage`] Meta API.
pub trait ResidualStageMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the stage is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// Get the effective stride of the stage.
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

/// [`ResidualStage`] Configuration.
#[derive(Config, Debug)]
pub struct ResidualStageConfig {
    /// The component blocks.
    pub blocks: Vec<ResidualBlockConfig>,
}

impl From<Vec<ResidualBlockConfig>> for ResidualStageConfig {
    fn from(blocks: Vec<ResidualBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl ResidualStageMeta for ResidualStageConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl ResidualStageConfig {
    /// Build a stage of `depth` blocks from `in_planes` to `planes`.
    ///
    /// The first block applies `stride` and the width change.
    pub fn build(
        depth: usize,
        in_planes: usize,
        planes: usize,
        stride: usize,
    ) -> Self {
        let mut blocks = Vec::with_capacity(depth);
        blocks.push(ResidualBlockConfig::new(in_planes, planes).with_stride(stride));
        for _ in 1..depth {
            blocks.push(ResidualBlockConfig::new(planes, planes));
        }
        Self { blocks }
    }

    /// Initialize a [`ResidualStage`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ResidualStage<B> {
        ResidualStage {
            blocks: self
                .blocks
                .into_iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }
}

/// A sequence of [`ResidualBlock`]s.
///
/// Implements [`ResidualStageMeta`].
#[derive(Module, Debug)]
pub struct ResidualStage<B: Backend> {
    /// The component blocks, applied in order.
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> ResidualStageMeta for ResidualStage<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl<B: Backend> ResidualStage<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: \
    ///   ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(input, |x, block| block.forward(x))
    }
}

impl<B: Backend> Checkpointable<B> for ResidualStage<B> {
    fn collect(
        &self,
        prefix: &str,
        dict: &mut StateDict,
    ) {
        for (index, block) in self.blocks.iter().enumerate() {
            block.collect(&key(prefix, &index.to_string()), dict);
        }
    }

    fn restore(
        mut self,
        prefix: &str,
        dict: &StateDict,
    ) -> Self {
        self.blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(index, block)| block.restore(&key(prefix, &index.to_string()), dict))
            .collect();
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
    fn test_stage_config_build() {
        let config = ResidualStageConfig::build(3, 16, 32, 2);
        assert_eq!(config.len(), 3);
        assert_eq!(config.in_planes(), 16);
        assert_eq!(config.out_planes(), 32);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.output_resolution([16, 16]), [8, 8]);
    }

    #[test]
    fn test_stage_forward() {
        let device = Default::default();

        let stage: ResidualStage<B> = ResidualStageConfig::build(2, 4, 8, 2).init(&device);
        assert_eq!(stage.len(), 2);
        assert_eq!(stage.stride(), 2);

        let input = Tensor::random([2, 4, 16, 16], Distribution::Default, &device);
        let output = stage.forward(input);
        assert_eq!(output.dims(), [2, 8, 8, 8]);
    }
}
