//! # Dense-growth model for 32x32 inputs.
//!
//! Stem conv, four dense stages separated by transitions (none after the
//! last stage), a final norm + rectify + global average pooling, and a
//! linear classification head.

use crate::checkpoint::{key, Checkpointable, StateDict};
use crate::layers::act::{Rectifier, RectifierConfig};
use crate::models::densenet::stage::{DenseStage, DenseStageConfig};
use crate::models::densenet::transition::{Transition, TransitionConfig};
use crate::util::rectifier_conv_initializer;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::{Backend, Config, Tensor};

/// [`DenseNet`] Config.
#[derive(Config, Debug)]
pub struct DenseNetConfig {
    /// The number of target classes.
    pub num_classes: usize,

    /// Units per dense stage.
    #[config(default = "[6, 12, 24, 16]")]
    pub blocks: [usize; 4],

    /// New channels contributed per unit.
    #[config(default = 12)]
    pub growth_rate: usize,

    /// Transition channel compression factor.
    #[config(default = 0.5)]
    pub reduction: f64,
}

impl DenseNetConfig {
    /// Channel count entering the classifier head.
    pub fn head_planes(&self) -> usize {
        let mut planes = 2 * self.growth_rate;
        for (index, depth) in self.blocks.iter().enumerate() {
            planes += depth * self.growth_rate;
            if index + 1 < self.blocks.len() {
                planes = self.compressed(planes);
            }
        }
        planes
    }

    fn compressed(
        &self,
        planes: usize,
    ) -> usize {
        (planes as f64 * self.reduction).floor() as usize
    }

    /// Initialize a [`DenseNet`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> DenseNet<B> {
        let growth = self.growth_rate;
        let mut planes = 2 * growth;

        let stem = Conv2dConfig::new([3, planes], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_initializer(rectifier_conv_initializer())
            .with_bias(false)
            .init(device);

        let stage1 = DenseStageConfig::build(self.blocks[0], planes, growth).init(device);
        planes += self.blocks[0] * growth;
        let trans1 = TransitionConfig::new(planes, self.compressed(planes)).init(device);
        planes = self.compressed(planes);

        let stage2 = DenseStageConfig::build(self.blocks[1], planes, growth).init(device);
        planes += self.blocks[1] * growth;
        let trans2 = TransitionConfig::new(planes, self.compressed(planes)).init(device);
        planes = self.compressed(planes);

        let stage3 = DenseStageConfig::build(self.blocks[2], planes, growth).init(device);
        planes += self.blocks[2] * growth;
        let trans3 = TransitionConfig::new(planes, self.compressed(planes)).init(device);
        planes = self.compressed(planes);

        let stage4 = DenseStageConfig::build(self.blocks[3], planes, growth).init(device);
        planes += self.blocks[3] * growth;

        DenseNet {
            stem,
            stage1,
            trans1,
            stage2,
            trans2,
            stage3,
            trans3,
            stage4,
            norm: BatchNormConfig::new(planes).init(device),
            act: RectifierConfig::Relu.init(),
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(planes, self.num_classes).init(device),
        }
    }
}

/// Dense-growth model.
#[derive(Module, Debug)]
pub struct DenseNet<B: Backend> {
    /// Stem conv (no norm/rectifier; the first unit pre-activates).
    pub stem: Conv2d<B>,

    /// First dense stage.
    pub stage1: DenseStage<B>,

    /// Transition after the first stage.
    pub trans1: Transition<B>,

    /// Second dense stage.
    pub stage2: DenseStage<B>,

    /// Transition after the second stage.
    pub trans2: Transition<B>,

    /// Third dense stage.
    pub stage3: DenseStage<B>,

    /// Transition after the third stage.
    pub trans3: Transition<B>,

    /// Fourth dense stage (no transition afterwards).
    pub stage4: DenseStage<B>,

    /// Final norm before pooling.
    pub norm: BatchNorm<B, 2>,

    /// Final rectifier.
    pub act: Rectifier,

    /// Global average pooling.
    pub avgpool: AdaptiveAvgPool2d,

    /// Linear classification head.
    pub fc: Linear<B>,
}

impl<B: Backend> DenseNet<B> {
    /// The number of target classes.
    pub fn num_classes(&self) -> usize {
        self.fc.weight.shape().dims[1]
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
        let x = self.stem.forward(input);

        let x = self.trans1.forward(self.stage1.forward(x));
        let x = self.trans2.forward(self.stage2.forward(x));
        let x = self.trans3.forward(self.stage3.forward(x));
        let x = self.stage4.forward(x);

        let x = self.act.forward(self.norm.forward(x));
        let x = self.avgpool.forward(x);
        let x = x.flatten(1, 3);

        self.fc.forward(x)
    }
}

impl<B: Backend> Checkpointable<B> for DenseNet<B> {
    fn collect(
        &self,
        prefix: &str,
        dict: &mut StateDict,
    ) {
        self.stem.collect(&key(prefix, "stem"), dict);
        self.stage1.collect(&key(prefix, "stage1"), dict);
        self.trans1.collect(&key(prefix, "trans1"), dict);
        self.stage2.collect(&key(prefix, "stage2"), dict);
        self.trans2.collect(&key(prefix, "trans2"), dict);
        self.stage3.collect(&key(prefix, "stage3"), dict);
        self.trans3.collect(&key(prefix, "trans3"), dict);
        self.stage4.collect(&key(prefix, "stage4"), dict);
        self.norm.collect(&key(prefix, "norm"), dict);
        self.fc.collect(&key(prefix, "fc"), dict);
    }

    fn restore(
        mut self,
        prefix: &str,
        dict: &StateDict,
    ) -> Self {
        self.stem = self.stem.restore(&key(prefix, "stem"), dict);
        self.stage1 = self.stage1.restore(&key(prefix, "stage1"), dict);
        self.trans1 = self.trans1.restore(&key(prefix, "trans1"), dict);
        self.stage2 = self.stage2.restore(&key(prefix, "stage2"), dict);
        self.trans2 = self.trans2.restore(&key(prefix, "trans2"), dict);
        self.stage3 = self.stage3.restore(&key(prefix, "stage3"), dict);
        self.trans3 = self.trans3.restore(&key(prefix, "trans3"), dict);
        self.stage4 = self.stage4.restore(&key(prefix, "stage4"), dict);
        self.norm = self.norm.restore(&key(prefix, "norm"), dict);
        self.fc = self.fc.restore(&key(prefix, "fc"), dict);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::densenet::stage::DenseStageMeta;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    #[test]
    fn test_densenet_channel_arithmetic() {
        let config = DenseNetConfig::new(10);

        // 24 -> 96 -> 48 -> 192 -> 96 -> 384 -> 192 -> 384
        assert_eq!(config.head_planes(), 384);

        type B = NdArray<f32>;
        let device = Default::default();
        let model: DenseNet<B> = config.init(&device);

        assert_eq!(model.stage1.in_planes(), 24);
        assert_eq!(model.stage1.out_planes(), 96);
        assert_eq!(model.stage4.out_planes(), 384);
        assert_eq!(model.num_classes(), 10);
    }

    #[test]
    fn test_densenet_forward_logits_shape() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let model: DenseNet<B> = DenseNetConfig::new(10)
            .with_blocks([1, 1, 1, 1])
            .init(&device);

        for batch in [1, 4] {
            let input = Tensor::random([batch, 3, 32, 32], Distribution::Default, &device);
            let output = model.forward(input);
            assert_eq!(output.dims(), [batch, 10]);
        }
    }
}
