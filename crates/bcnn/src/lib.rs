#![warn(missing_docs)]
//!# bcnn - Burn Convolutional Classifiers
//!
//! Convolutional classifiers for small (32x32) images, built on ``burn``.
//!
//! ## Notable Components
//!
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::act`] - rectifier activation wrapper.
//!   * [`layers::cna`] - ``Conv2d + BatchNorm + rectifier`` unit.
//! * [`models`] - complete model families.
//!   * [`models::resnet`] - the residual-stack classifier.
//!   * [`models::convnet`] - the plain stacked-conv classifier.
//!   * [`models::densenet`] - the dense-growth classifier.
//!   * [`models::classifier`] - tagged selection over the three families.
//! * [`checkpoint`] - named-tensor snapshots with partial restore.
//! * [`onnx`] - ONNX computation-graph export.

pub mod checkpoint;
pub mod layers;
pub mod models;
pub mod onnx;
pub mod util;
