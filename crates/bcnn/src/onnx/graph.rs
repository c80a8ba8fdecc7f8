//! # ONNX graph assembly.
//!
//! [`GraphBuilder`] accumulates nodes and initializers while a model
//! lowers itself; lowering mirrors the module forward passes node for
//! node, and tensor names reuse the checkpoint prefixes.

use crate::models::classifier::ImageClassifier;
use crate::onnx::proto::{
    data_type, tensor_shape_proto, type_proto, AttributeProto, AttributeType, GraphProto,
    ModelProto, NodeProto, OperatorSetIdProto, TensorProto, TensorShapeProto, TypeProto,
    ValueInfoProto,
};
use burn::nn::conv::Conv2d;
use burn::nn::{BatchNorm, Linear, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};
use prost::Message;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The opset every emitted graph requires.
const OPSET_VERSION: i64 = 13;

/// The IR version matching [`OPSET_VERSION`].
const IR_VERSION: i64 = 7;

/// `BatchNormConfig` default; the module keeps its epsilon private, and
/// every norm in this crate is built with the default.
const BATCH_NORM_EPSILON: f32 = 1e-5;

/// Export failures.
#[derive(Debug, Error)]
pub enum OnnxError {
    /// Filesystem failure.
    #[error("onnx write failure at {path:?}")]
    Io {
        /// The offending path.
        path: PathBuf,

        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A parameter could not be read back from the backend.
    #[error("parameter {name} could not be exported: {message}")]
    TensorRead {
        /// The parameter's tensor name.
        name: String,

        /// Backend diagnostic.
        message: String,
    },

    /// A layer configuration the exporter does not emit.
    #[error("unsupported configuration at {name}: {message}")]
    Unsupported {
        /// The offending node name.
        name: String,

        /// What was not supported.
        message: String,
    },
}

/// Single-float attribute.
pub fn attr_f(
    name: &str,
    value: f32,
) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        f: value,
        r#type: AttributeType::Float as i32,
        ..Default::default()
    }
}

/// Single-int attribute.
pub fn attr_i(
    name: &str,
    value: i64,
) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        i: value,
        r#type: AttributeType::Int as i32,
        ..Default::default()
    }
}

/// Int-list attribute.
pub fn attr_ints(
    name: &str,
    values: &[i64],
) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        ints: values.to_vec(),
        r#type: AttributeType::Ints as i32,
        ..Default::default()
    }
}

/// Incremental ONNX graph builder.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<NodeProto>,
    initializers: Vec<TensorProto>,
}

impl GraphBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a float initializer under `name` and return the name.
    pub fn initializer<B: Backend, const D: usize>(
        &mut self,
        name: String,
        tensor: &Tensor<B, D>,
    ) -> Result<String, OnnxError> {
        let data = tensor.to_data().convert::<f32>();
        let float_data = data.to_vec::<f32>().map_err(|err| OnnxError::TensorRead {
            name: name.clone(),
            message: format!("{err:?}"),
        })?;

        self.initializers.push(TensorProto {
            dims: tensor.dims().iter().map(|&dim| dim as i64).collect(),
            data_type: data_type::FLOAT,
            float_data,
            name: name.clone(),
        });
        Ok(name)
    }

    /// Emit a single-output node named `name`; returns the output tensor
    /// name (``{name}_out``).
    pub fn node(
        &mut self,
        op_type: &str,
        name: &str,
        inputs: Vec<String>,
        attributes: Vec<AttributeProto>,
    ) -> String {
        let output = format!("{name}_out");
        self.nodes.push(NodeProto {
            input: inputs,
            output: vec![output.clone()],
            name: name.to_string(),
            op_type: op_type.to_string(),
            attribute: attributes,
        });
        output
    }

    /// Rename a produced tensor across the graph.
    ///
    /// Used to pin the final output to a stable name.
    pub fn rename(
        &mut self,
        from: &str,
        to: &str,
    ) {
        for node in &mut self.nodes {
            for name in node.input.iter_mut().chain(node.output.iter_mut()) {
                if name == from {
                    *name = to.to_string();
                }
            }
        }
    }

    /// ``Conv`` node mirroring a [`Conv2d`], weights as initializers.
    pub fn conv2d<B: Backend>(
        &mut self,
        name: &str,
        x: String,
        conv: &Conv2d<B>,
    ) -> Result<String, OnnxError> {
        let weight = self.initializer(format!("{name}.weight"), &conv.weight.val())?;
        let mut inputs = vec![x, weight];
        if let Some(bias) = &conv.bias {
            inputs.push(self.initializer(format!("{name}.bias"), &bias.val())?);
        }

        let [pad_h, pad_w] = match &*conv.padding {
            PaddingConfig2d::Explicit(height, width) => [*height as i64, *width as i64],
            PaddingConfig2d::Valid => [0, 0],
            PaddingConfig2d::Same => {
                return Err(OnnxError::Unsupported {
                    name: name.to_string(),
                    message: "'Same' conv padding".to_string(),
                });
            }
        };

        Ok(self.node(
            "Conv",
            name,
            inputs,
            vec![
                attr_ints(
                    "kernel_shape",
                    &[conv.kernel_size[0] as i64, conv.kernel_size[1] as i64],
                ),
                attr_ints("strides", &[conv.stride[0] as i64, conv.stride[1] as i64]),
                attr_ints(
                    "dilations",
                    &[conv.dilation[0] as i64, conv.dilation[1] as i64],
                ),
                attr_ints("pads", &[pad_h, pad_w, pad_h, pad_w]),
                attr_i("group", conv.groups as i64),
            ],
        ))
    }

    /// Inference-mode ``BatchNormalization`` node mirroring a
    /// [`BatchNorm`], statistics as initializers.
    pub fn batch_norm<B: Backend>(
        &mut self,
        name: &str,
        x: String,
        norm: &BatchNorm<B, 2>,
    ) -> Result<String, OnnxError> {
        let scale = self.initializer(format!("{name}.gamma"), &norm.gamma.val())?;
        let bias = self.initializer(format!("{name}.beta"), &norm.beta.val())?;
        let mean = self.initializer(format!("{name}.running_mean"), &norm.running_mean.value())?;
        let var = self.initializer(format!("{name}.running_var"), &norm.running_var.value())?;

        Ok(self.node(
            "BatchNormalization",
            name,
            vec![x, scale, bias, mean, var],
            vec![attr_f("epsilon", BATCH_NORM_EPSILON)],
        ))
    }

    /// ``Gemm`` node mirroring a [`Linear`].
    ///
    /// burn stores linear weights as ``[d_input, d_output]``, so the
    /// weight feeds ``B`` untransposed.
    pub fn linear<B: Backend>(
        &mut self,
        name: &str,
        x: String,
        linear: &Linear<B>,
    ) -> Result<String, OnnxError> {
        let weight = self.initializer(format!("{name}.weight"), &linear.weight.val())?;
        let mut inputs = vec![x, weight];
        if let Some(bias) = &linear.bias {
            inputs.push(self.initializer(format!("{name}.bias"), &bias.val())?);
        }

        Ok(self.node(
            "Gemm",
            name,
            inputs,
            vec![
                attr_f("alpha", 1.0),
                attr_f("beta", 1.0),
                attr_i("transB", 0),
            ],
        ))
    }

    /// ``MaxPool`` node.
    pub fn max_pool2d(
        &mut self,
        name: &str,
        x: String,
        kernel: [i64; 2],
        stride: [i64; 2],
    ) -> String {
        self.node(
            "MaxPool",
            name,
            vec![x],
            vec![
                attr_ints("kernel_shape", &kernel),
                attr_ints("strides", &stride),
            ],
        )
    }

    /// ``AveragePool`` node.
    pub fn avg_pool2d(
        &mut self,
        name: &str,
        x: String,
        kernel: [i64; 2],
        stride: [i64; 2],
    ) -> String {
        self.node(
            "AveragePool",
            name,
            vec![x],
            vec![
                attr_ints("kernel_shape", &kernel),
                attr_ints("strides", &stride),
            ],
        )
    }

    /// ``GlobalAveragePool`` node.
    pub fn global_avg_pool(
        &mut self,
        name: &str,
        x: String,
    ) -> String {
        self.node("GlobalAveragePool", name, vec![x], vec![])
    }

    /// ``Flatten`` node (axis 1): ``[batch, c, 1, 1]`` -> ``[batch, c]``.
    pub fn flatten(
        &mut self,
        name: &str,
        x: String,
    ) -> String {
        self.node("Flatten", name, vec![x], vec![attr_i("axis", 1)])
    }

    /// Element-wise ``Add`` node.
    pub fn add(
        &mut self,
        name: &str,
        lhs: String,
        rhs: String,
    ) -> String {
        self.node("Add", name, vec![lhs, rhs], vec![])
    }

    /// Channel-axis ``Concat`` node.
    pub fn concat(
        &mut self,
        name: &str,
        inputs: Vec<String>,
    ) -> String {
        self.node("Concat", name, inputs, vec![attr_i("axis", 1)])
    }

    /// Assemble the final model.
    ///
    /// `feature_shape` is ``[channels, height, width]``; the batch axis of
    /// both the input and the output is declared symbolically.
    pub fn finish(
        self,
        input_name: &str,
        feature_shape: [usize; 3],
        output_name: &str,
        num_classes: usize,
    ) -> ModelProto {
        let [channels, height, width] = feature_shape;

        let input = value_info(
            input_name,
            vec![
                symbolic_dim("batch"),
                fixed_dim(channels as i64),
                fixed_dim(height as i64),
                fixed_dim(width as i64),
            ],
        );
        let output = value_info(
            output_name,
            vec![symbolic_dim("batch"), fixed_dim(num_classes as i64)],
        );

        ModelProto {
            ir_version: IR_VERSION,
            producer_name: env!("CARGO_PKG_NAME").to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            graph: Some(GraphProto {
                node: self.nodes,
                name: "classifier".to_string(),
                initializer: self.initializers,
                input: vec![input],
                output: vec![output],
            }),
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: OPSET_VERSION,
            }],
        }
    }
}

fn symbolic_dim(name: &str) -> tensor_shape_proto::Dimension {
    tensor_shape_proto::Dimension {
        value: Some(tensor_shape_proto::dimension::Value::DimParam(
            name.to_string(),
        )),
    }
}

fn fixed_dim(value: i64) -> tensor_shape_proto::Dimension {
    tensor_shape_proto::Dimension {
        value: Some(tensor_shape_proto::dimension::Value::DimValue(value)),
    }
}

fn value_info(
    name: &str,
    dims: Vec<tensor_shape_proto::Dimension>,
) -> ValueInfoProto {
    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: data_type::FLOAT,
                shape: Some(TensorShapeProto { dim: dims }),
            })),
        }),
    }
}

/// Lower `model` to a [`ModelProto`].
///
/// `feature_shape` is ``[channels, height, width]`` of a representative
/// input; the batch dimension is dynamic.
pub fn to_model_proto<B: Backend>(
    model: &ImageClassifier<B>,
    feature_shape: [usize; 3],
) -> Result<ModelProto, OnnxError> {
    let mut graph = GraphBuilder::new();

    let logits = model.lower(&mut graph, "input".to_string(), "")?;
    graph.rename(&logits, "output");

    Ok(graph.finish("input", feature_shape, "output", model.num_classes()))
}

/// Serialize `model` to `path` as an ONNX file.
pub fn export_to_file<B: Backend>(
    model: &ImageClassifier<B>,
    feature_shape: [usize; 3],
    path: &Path,
) -> Result<(), OnnxError> {
    let proto = to_model_proto(model, feature_shape)?;
    std::fs::write(path, proto.encode_to_vec()).map_err(|source| OnnxError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::classifier::ImageClassifierConfig;
    use crate::models::convnet::ConvNetConfig;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_builder_node_naming() {
        let mut graph = GraphBuilder::new();
        let out = graph.node("Relu", "act", vec!["x".to_string()], vec![]);
        assert_eq!(out, "act_out");

        graph.rename("act_out", "output");
        let model = graph.finish("x", [3, 32, 32], "output", 10);
        let proto_graph = model.graph.unwrap();
        assert_eq!(proto_graph.node[0].output[0], "output");
    }

    #[test]
    fn test_model_proto_declares_dynamic_batch() {
        let device = Default::default();
        let config: ImageClassifierConfig = ConvNetConfig::new(10).into();
        let model = config.init::<B>(&device);

        let proto = to_model_proto(&model, [3, 32, 32]).unwrap();
        assert_eq!(proto.opset_import[0].version, OPSET_VERSION);

        let graph = proto.graph.unwrap();
        assert_eq!(graph.input.len(), 1);
        assert_eq!(graph.output.len(), 1);

        let type_proto::Value::TensorType(tensor) = graph.input[0]
            .r#type
            .as_ref()
            .unwrap()
            .value
            .as_ref()
            .unwrap();
        let dims = &tensor.shape.as_ref().unwrap().dim;
        assert_eq!(dims.len(), 4);
        assert!(matches!(
            dims[0].value.as_ref().unwrap(),
            tensor_shape_proto::dimension::Value::DimParam(name) if name == "batch"
        ));

        // dropout is an inference no-op and is not emitted
        assert!(graph.node.iter().all(|node| node.op_type != "Dropout"));
    }
}
