//! # Module lowering into ONNX graphs.
//!
//! Each lowering mirrors the corresponding `forward` node for node; node
//! and tensor names reuse the checkpoint prefixes, so a graph diff lines
//! up with a state-dict diff.

use crate::checkpoint::key;
use crate::layers::act::Rectifier;
use crate::layers::cna::ConvNormAct2d;
use crate::models::classifier::ImageClassifier;
use crate::models::convnet::{ConvNet, TrunkLayer};
use crate::models::densenet::{DenseBottleneck, DenseNet, DenseStage, Transition};
use crate::models::resnet::{ProjectionShortcut, ResNet, ResidualBlock, ResidualStage};
use crate::onnx::graph::{attr_f, GraphBuilder, OnnxError};
use burn::prelude::Backend;

impl GraphBuilder {
    /// Rectifier node (``Relu`` or ``LeakyRelu``).
    pub(crate) fn rectifier(
        &mut self,
        name: &str,
        x: String,
        act: &Rectifier,
    ) -> String {
        match act {
            Rectifier::Relu(_) => self.node("Relu", name, vec![x], vec![]),
            Rectifier::LeakyRelu(layer) => self.node(
                "LeakyRelu",
                name,
                vec![x],
                vec![attr_f("alpha", layer.negative_slope as f32)],
            ),
        }
    }
}

impl<B: Backend> ConvNormAct2d<B> {
    pub(crate) fn lower(
        &self,
        graph: &mut GraphBuilder,
        x: String,
        prefix: &str,
    ) -> Result<String, OnnxError> {
        self.lower_with(graph, x, prefix, |_, x| Ok(x))
    }

    /// Lowering twin of `forward_with`: the hook lands between the norm
    /// and the rectifier.
    pub(crate) fn lower_with<F>(
        &self,
        graph: &mut GraphBuilder,
        x: String,
        prefix: &str,
        hook: F,
    ) -> Result<String, OnnxError>
    where
        F: FnOnce(&mut GraphBuilder, String) -> Result<String, OnnxError>,
    {
        let x = graph.conv2d(&key(prefix, "conv"), x, &self.conv)?;
        let x = graph.batch_norm(&key(prefix, "norm"), x, &self.norm)?;
        let x = hook(graph, x)?;
        Ok(graph.rectifier(&key(prefix, "act"), x, &self.act))
    }
}

impl<B: Backend> ProjectionShortcut<B> {
    pub(crate) fn lower(
        &self,
        graph: &mut GraphBuilder,
        x: String,
        prefix: &str,
    ) -> Result<String, OnnxError> {
        let x = graph.conv2d(&key(prefix, "conv"), x, &self.conv)?;
        graph.batch_norm(&key(prefix, "norm"), x, &self.norm)
    }
}

impl<B: Backend> ResidualBlock<B> {
    pub(crate) fn lower(
        &self,
        graph: &mut GraphBuilder,
        x: String,
        prefix: &str,
    ) -> Result<String, OnnxError> {
        let identity = match &self.shortcut {
            Some(shortcut) => shortcut.lower(graph, x.clone(), &key(prefix, "shortcut"))?,
            None => x.clone(),
        };

        let x = self.cna1.lower(graph, x, &key(prefix, "cna1"))?;
        self.cna2.lower_with(graph, x, &key(prefix, "cna2"), |graph, x| {
            Ok(graph.add(&key(prefix, "add"), x, identity))
        })
    }
}

impl<B: Backend> ResidualStage<B> {
    pub(crate) fn lower(
        &self,
        graph: &mut GraphBuilder,
        x: String,
        prefix: &str,
    ) -> Result<String, OnnxError> {
        let mut x = x;
        for (index, block) in self.blocks.iter().enumerate() {
            x = block.lower(graph, x, &key(prefix, &index.to_string()))?;
        }
        Ok(x)
    }
}

impl<B: Backend> ResNet<B> {
    pub(crate) fn lower(
        &self,
        graph: &mut GraphBuilder,
        x: String,
        prefix: &str,
    ) -> Result<String, OnnxError> {
        let x = self.stem.lower(graph, x, &key(prefix, "stem"))?;
        // the stem pool is fixed 2x2 / stride 2
        let x = graph.max_pool2d(&key(prefix, "pool"), x, [2, 2], [2, 2]);

        let x = self.stage1.lower(graph, x, &key(prefix, "stage1"))?;
        let x = self.stage2.lower(graph, x, &key(prefix, "stage2"))?;
        let x = self.stage3.lower(graph, x, &key(prefix, "stage3"))?;

        let x = graph.global_avg_pool(&key(prefix, "avgpool"), x);
        let x = graph.flatten(&key(prefix, "flatten"), x);
        // dropout is an inference no-op
        graph.linear(&key(prefix, "fc"), x, &self.fc)
    }
}

impl<B: Backend> ConvNet<B> {
    pub(crate) fn lower(
        &self,
        graph: &mut GraphBuilder,
        x: String,
        prefix: &str,
    ) -> Result<String, OnnxError> {
        let mut x = x;
        for (index, layer) in self.features.iter().enumerate() {
            let name = key(&key(prefix, "features"), &index.to_string());
            x = match layer {
                TrunkLayer::Conv(layer) => layer.lower(graph, x, &name)?,
                // trunk pools are fixed 2x2 / stride 2
                TrunkLayer::Pool(_) => graph.max_pool2d(&name, x, [2, 2], [2, 2]),
            };
        }

        let x = graph.global_avg_pool(&key(prefix, "avgpool"), x);
        let x = graph.flatten(&key(prefix, "flatten"), x);
        // dropout is an inference no-op
        let x = graph.linear(&key(prefix, "fc1"), x, &self.fc1)?;
        let x = graph.rectifier(&key(prefix, "act"), x, &self.act);
        graph.linear(&key(prefix, "fc2"), x, &self.fc2)
    }
}

impl<B: Backend> DenseBottleneck<B> {
    pub(crate) fn lower(
        &self,
        graph: &mut GraphBuilder,
        x: String,
        prefix: &str,
    ) -> Result<String, OnnxError> {
        let y = graph.batch_norm(&key(prefix, "norm1"), x.clone(), &self.norm1)?;
        let y = graph.rectifier(&key(prefix, "act1"), y, &self.act);
        let y = graph.conv2d(&key(prefix, "conv1"), y, &self.conv1)?;
        let y = graph.batch_norm(&key(prefix, "norm2"), y, &self.norm2)?;
        let y = graph.rectifier(&key(prefix, "act2"), y, &self.act);
        let y = graph.conv2d(&key(prefix, "conv2"), y, &self.conv2)?;

        Ok(graph.concat(&key(prefix, "cat"), vec![x, y]))
    }
}

impl<B: Backend> DenseStage<B> {
    pub(crate) fn lower(
        &self,
        graph: &mut GraphBuilder,
        x: String,
        prefix: &str,
    ) -> Result<String, OnnxError> {
        let mut x = x;
        for (index, block) in self.blocks.iter().enumerate() {
            x = block.lower(graph, x, &key(prefix, &index.to_string()))?;
        }
        Ok(x)
    }
}

impl<B: Backend> Transition<B> {
    pub(crate) fn lower(
        &self,
        graph: &mut GraphBuilder,
        x: String,
        prefix: &str,
    ) -> Result<String, OnnxError> {
        let x = graph.batch_norm(&key(prefix, "norm"), x, &self.norm)?;
        let x = graph.rectifier(&key(prefix, "act"), x, &self.act);
        let x = graph.conv2d(&key(prefix, "conv"), x, &self.conv)?;
        Ok(graph.avg_pool2d(&key(prefix, "pool"), x, [2, 2], [2, 2]))
    }
}

impl<B: Backend> DenseNet<B> {
    pub(crate) fn lower(
        &self,
        graph: &mut GraphBuilder,
        x: String,
        prefix: &str,
    ) -> Result<String, OnnxError> {
        let x = graph.conv2d(&key(prefix, "stem"), x, &self.stem)?;

        let x = self.stage1.lower(graph, x, &key(prefix, "stage1"))?;
        let x = self.trans1.lower(graph, x, &key(prefix, "trans1"))?;
        let x = self.stage2.lower(graph, x, &key(prefix, "stage2"))?;
        let x = self.trans2.lower(graph, x, &key(prefix, "trans2"))?;
        let x = self.stage3.lower(graph, x, &key(prefix, "stage3"))?;
        let x = self.trans3.lower(graph, x, &key(prefix, "trans3"))?;
        let x = self.stage4.lower(graph, x, &key(prefix, "stage4"))?;

        let x = graph.batch_norm(&key(prefix, "norm"), x, &self.norm)?;
        let x = graph.rectifier(&key(prefix, "act"), x, &self.act);
        let x = graph.global_avg_pool(&key(prefix, "avgpool"), x);
        let x = graph.flatten(&key(prefix, "flatten"), x);
        graph.linear(&key(prefix, "fc"), x, &self.fc)
    }
}

impl<B: Backend> ImageClassifier<B> {
    pub(crate) fn lower(
        &self,
        graph: &mut GraphBuilder,
        x: String,
        prefix: &str,
    ) -> Result<String, OnnxError> {
        match self {
            Self::ResNet(model) => model.lower(graph, x, prefix),
            Self::ConvNet(model) => model.lower(graph, x, prefix),
            Self::DenseNet(model) => model.lower(graph, x, prefix),
        }
    }
}
