//! # Dense stage.
//!
//! Chained [`DenseBottleneck`] units; the channel count grows by
//! `growth_rate` per unit, linearly across the stage.

use crate::checkpoint::{key, Checkpointable, StateDict};
use crate::models::densenet::bottleneck::{
    DenseBottleneck, DenseBottleneckConfig, DenseBottleneckMeta,
};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// [`DenseStage`] Meta API.
pub trait DenseStageMeta {
    /// The number of units.
    fn len(&self) -> usize;

    /// Check if the stage is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;
}

/// [`DenseStage`] Configuration.
#[derive(Config, Debug)]
pub struct DenseStageConfig {
    /// The component units.
    pub blocks: Vec<DenseBottleneckConfig>,
}

impl From<Vec<DenseBottleneckConfig>> for DenseStageConfig {
    fn from(blocks: Vec<DenseBottleneckConfig>) -> Self {
        Self { blocks }
    }
}

impl DenseStageMeta for DenseStageConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }
}

impl DenseStageConfig {
    /// Build a stage of `depth` units starting at `in_planes`.
    pub fn build(
        depth: usize,
        in_planes: usize,
        growth_rate: usize,
    ) -> Self {
        let mut blocks = Vec::with_capacity(depth);
        let mut planes = in_planes;
        for _ in 0..depth {
            blocks.push(DenseBottleneckConfig::new(planes, growth_rate));
            planes += growth_rate;
        }
        Self { blocks }
    }

    /// Initialize a [`DenseStage`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> DenseStage<B> {
        DenseStage {
            blocks: self
                .blocks
                .into_iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }
}

/// A sequence of [`DenseBottleneck`] units.
///
/// Implements [`DenseStageMeta`].
#[derive(Module, Debug)]
pub struct DenseStage<B: Backend> {
    /// The component units, applied in order.
    pub blocks: Vec<DenseBottleneck<B>>,
}

impl<B: Backend> DenseStageMeta for DenseStage<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }
}

impl<B: Backend> DenseStage<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, height, width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, height, width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(input, |x, block| block.forward(x))
    }
}

impl<B: Backend> Checkpointable<B> for DenseStage<B> {
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
    fn test_dense_stage_config_growth() {
        let config = DenseStageConfig::build(6, 24, 12);
        assert_eq!(config.len(), 6);
        assert_eq!(config.in_planes(), 24);
        assert_eq!(config.out_planes(), 24 + 6 * 12);
    }

    #[test]
    fn test_dense_stage_forward() {
        let device = Default::default();

        let stage: DenseStage<B> = DenseStageConfig::build(3, 4, 2).init(&device);
        assert_eq!(stage.out_planes(), 10);

        let input = Tensor::random([2, 4, 8, 8], Distribution::Default, &device);
        let output = stage.forward(input);
        assert_eq!(output.dims(), [2, 10, 8, 8]);
    }
}
