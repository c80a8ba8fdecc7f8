//! # Residual-stack model for 32x32 inputs.
//!
//! Stem conv/norm/Relu + 2x2 max-pool, three residual stages with
//! increasing width and spatial downsampling between stages, global
//! average pooling, dropout, and a linear classification head.

use crate::checkpoint::{key, Checkpointable, StateDict};
use crate::layers::act::RectifierConfig;
use crate::layers::cna::{ConvNormAct2d, ConvNormAct2dConfig};
use crate::models::resnet::stage::{ResidualStage, ResidualStageConfig};
use burn::module::Module;
use burn::nn::conv::Conv2dConfig;
use burn::nn::pool::{
    AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig,
};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::{Backend, Config, Tensor};

/// [`ResNet`] Config.
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// The number of target classes.
    pub num_classes: usize,

    /// Blocks per stage.
    #[config(default = "[2, 2, 2]")]
    pub blocks: [usize; 3],

    /// Stem width; stages widen 1x / 2x / 4x from here.
    #[config(default = 64)]
    pub base_width: usize,

    /// Classification head dropout probability.
    #[config(default = 0.3)]
    pub dropout: f64,
}

impl ResNetConfig {
    /// Initialize a [`ResNet`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNet<B> {
        let width = self.base_width;

        let stem = ConvNormAct2dConfig::new(
            Conv2dConfig::new([3, width], [3, 3]).with_padding(PaddingConfig2d::Explicit(1, 1)),
        )
        .with_act(RectifierConfig::Relu)
        .init(device);

        ResNet {
            stem,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            stage1: ResidualStageConfig::build(self.blocks[0], width, width, 1).init(device),
            stage2: ResidualStageConfig::build(self.blocks[1], width, width * 2, 2).init(device),
            stage3: ResidualStageConfig::build(self.blocks[2], width * 2, width * 4, 2)
                .init(device),

            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc: LinearConfig::new(width * 4, self.num_classes).init(device),
        }
    }
}

/// Residual-stack model.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    /// Stem conv/norm/Relu.
    pub stem: ConvNormAct2d<B>,

    /// Stem 2x2 max-pool.
    pub pool: MaxPool2d,

    /// First residual stage (stride 1).
    pub stage1: ResidualStage<B>,

    /// Second residual stage (stride 2, 2x width).
    pub stage2: ResidualStage<B>,

    /// Third residual stage (stride 2, 4x width).
    pub stage3: ResidualStage<B>,

    /// Global average pooling.
    pub avgpool: AdaptiveAvgPool2d,

    /// Head dropout.
    pub dropout: Dropout,

    /// Linear classification head.
    pub fc: Linear<B>,
}

impl<B: Backend> ResNet<B> {
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
        let x = self.pool.forward(x);

        let x = self.stage1.forward(x);
        let x = self.stage2.forward(x);
        let x = self.stage3.forward(x);

        let x = self.avgpool.forward(x);
        let x = x.flatten(1, 3);
        let x = self.dropout.forward(x);

        self.fc.forward(x)
    }
}

impl<B: Backend> Checkpointable<B> for ResNet<B> {
    fn collect(
        &self,
        prefix: &str,
        dict: &mut StateDict,
    ) {
        self.stem.collect(&key(prefix, "stem"), dict);
        self.stage1.collect(&key(prefix, "stage1"), dict);
        self.stage2.collect(&key(prefix, "stage2"), dict);
        self.stage3.collect(&key(prefix, "stage3"), dict);
        self.fc.collect(&key(prefix, "fc"), dict);
    }

    fn restore(
        mut self,
        prefix: &str,
        dict: &StateDict,
    ) -> Self {
        self.stem = self.stem.restore(&key(prefix, "stem"), dict);
        self.stage1 = self.stage1.restore(&key(prefix, "stage1"), dict);
        self.stage2 = self.stage2.restore(&key(prefix, "stage2"), dict);
        self.stage3 = self.stage3.restore(&key(prefix, "stage3"), dict);
        self.fc = self.fc.restore(&key(prefix, "fc"), dict);
        self
    }
}
