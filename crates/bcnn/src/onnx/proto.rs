//! # ONNX protobuf schema (subset).
//!
//! Hand-maintained `prost` messages covering the slice of the ONNX schema
//! this crate emits. Field numbers follow `onnx.proto` from the official
//! ONNX repository; messages and fields this exporter never produces are
//! omitted (parsers skip unknown fields, absent fields default).

/// Tensor element types (subset).
pub mod data_type {
    /// IEEE-754 single precision.
    pub const FLOAT: i32 = 1;
}

/// Operator set requirement.
#[derive(Clone, PartialEq, prost::Message)]
pub struct OperatorSetIdProto {
    /// Operator domain; empty for the default ONNX domain.
    #[prost(string, tag = "1")]
    pub domain: String,

    /// Opset version.
    #[prost(int64, tag = "2")]
    pub version: i64,
}

/// Top-level model container.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ModelProto {
    /// ONNX IR version.
    #[prost(int64, tag = "1")]
    pub ir_version: i64,

    /// Producing tool name.
    #[prost(string, tag = "2")]
    pub producer_name: String,

    /// Producing tool version.
    #[prost(string, tag = "3")]
    pub producer_version: String,

    /// The computation graph.
    #[prost(message, optional, tag = "7")]
    pub graph: Option<GraphProto>,

    /// Operator set requirements.
    #[prost(message, repeated, tag = "8")]
    pub opset_import: Vec<OperatorSetIdProto>,
}

/// Computation graph: nodes plus named tensors.
#[derive(Clone, PartialEq, prost::Message)]
pub struct GraphProto {
    /// Topologically sorted nodes.
    #[prost(message, repeated, tag = "1")]
    pub node: Vec<NodeProto>,

    /// Graph name.
    #[prost(string, tag = "2")]
    pub name: String,

    /// Named constant tensors (the parameters).
    #[prost(message, repeated, tag = "5")]
    pub initializer: Vec<TensorProto>,

    /// Graph inputs.
    #[prost(message, repeated, tag = "11")]
    pub input: Vec<ValueInfoProto>,

    /// Graph outputs.
    #[prost(message, repeated, tag = "12")]
    pub output: Vec<ValueInfoProto>,
}

/// One operator application.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NodeProto {
    /// Input tensor names.
    #[prost(string, repeated, tag = "1")]
    pub input: Vec<String>,

    /// Output tensor names.
    #[prost(string, repeated, tag = "2")]
    pub output: Vec<String>,

    /// Node name.
    #[prost(string, tag = "3")]
    pub name: String,

    /// Operator name, e.g. ``Conv``.
    #[prost(string, tag = "4")]
    pub op_type: String,

    /// Operator attributes.
    #[prost(message, repeated, tag = "5")]
    pub attribute: Vec<AttributeProto>,
}

/// Attribute value kinds (subset).
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum AttributeType {
    /// Unset.
    Undefined = 0,

    /// Single float.
    Float = 1,

    /// Single int.
    Int = 2,

    /// Int list.
    Ints = 7,
}

/// One operator attribute.
#[derive(Clone, PartialEq, prost::Message)]
pub struct AttributeProto {
    /// Attribute name.
    #[prost(string, tag = "1")]
    pub name: String,

    /// Float payload (when `type` is `Float`).
    #[prost(float, tag = "2")]
    pub f: f32,

    /// Int payload (when `type` is `Int`).
    #[prost(int64, tag = "3")]
    pub i: i64,

    /// Int-list payload (when `type` is `Ints`).
    #[prost(int64, repeated, tag = "8")]
    pub ints: Vec<i64>,

    /// Which payload field carries the value.
    #[prost(enumeration = "AttributeType", tag = "20")]
    pub r#type: i32,
}

/// A constant tensor value.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TensorProto {
    /// Tensor shape.
    #[prost(int64, repeated, tag = "1")]
    pub dims: Vec<i64>,

    /// Element type, from [`data_type`].
    #[prost(int32, tag = "2")]
    pub data_type: i32,

    /// Row-major float payload.
    #[prost(float, repeated, tag = "4")]
    pub float_data: Vec<f32>,

    /// Tensor name.
    #[prost(string, tag = "8")]
    pub name: String,
}

/// Typed, named graph input or output.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ValueInfoProto {
    /// Tensor name.
    #[prost(string, tag = "1")]
    pub name: String,

    /// Tensor type and shape.
    #[prost(message, optional, tag = "2")]
    pub r#type: Option<TypeProto>,
}

/// Value type wrapper.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TypeProto {
    /// The type payload.
    #[prost(oneof = "type_proto::Value", tags = "1")]
    pub value: Option<type_proto::Value>,
}

/// Nested types for [`TypeProto`].
pub mod type_proto {
    /// Tensor type: element type plus shape.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Tensor {
        /// Element type, from [`super::data_type`].
        #[prost(int32, tag = "1")]
        pub elem_type: i32,

        /// Tensor shape.
        #[prost(message, optional, tag = "2")]
        pub shape: Option<super::TensorShapeProto>,
    }

    /// Type payload.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Value {
        /// Tensor type.
        #[prost(message, tag = "1")]
        TensorType(Tensor),
    }
}

/// Shape with fixed and symbolic dimensions.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TensorShapeProto {
    /// The axes, outermost first.
    #[prost(message, repeated, tag = "1")]
    pub dim: Vec<tensor_shape_proto::Dimension>,
}

/// Nested types for [`TensorShapeProto`].
pub mod tensor_shape_proto {
    /// One axis of a shape.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Dimension {
        /// Fixed size or symbolic name.
        #[prost(oneof = "dimension::Value", tags = "1, 2")]
        pub value: Option<dimension::Value>,
    }

    /// Nested types for [`Dimension`].
    pub mod dimension {
        /// Dimension value.
        #[derive(Clone, PartialEq, prost::Oneof)]
        pub enum Value {
            /// Fixed size.
            #[prost(int64, tag = "1")]
            DimValue(i64),

            /// Symbolic size.
            #[prost(string, tag = "2")]
            DimParam(String),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_model_proto_encode_decode() {
        let model = ModelProto {
            ir_version: 7,
            producer_name: "bcnn".into(),
            producer_version: "0.1.0".into(),
            graph: Some(GraphProto {
                node: vec![NodeProto {
                    input: vec!["x".into()],
                    output: vec!["y".into()],
                    name: "act".into(),
                    op_type: "Relu".into(),
                    attribute: vec![],
                }],
                name: "g".into(),
                initializer: vec![TensorProto {
                    dims: vec![2],
                    data_type: data_type::FLOAT,
                    float_data: vec![1.0, 2.0],
                    name: "w".into(),
                }],
                input: vec![],
                output: vec![],
            }),
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: 13,
            }],
        };

        let bytes = model.encode_to_vec();
        let decoded = ModelProto::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, model);
    }
}
