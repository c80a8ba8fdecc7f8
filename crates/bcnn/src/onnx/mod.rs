//! # ONNX interchange export.
//!
//! Serializes a trained [`ImageClassifier`](crate::models::classifier::ImageClassifier)
//! to an ONNX computation graph (opset 13). The graph input declares a
//! symbolic batch dimension, so exported graphs accept variable batch
//! sizes at inference time.
//!
//! * [`proto`] - hand-maintained protobuf schema subset.
//! * [`graph`] - incremental graph assembly and file export.

pub mod graph;
mod lower;
pub mod proto;

pub use graph::{export_to_file, to_model_proto, GraphBuilder, OnnxError};
