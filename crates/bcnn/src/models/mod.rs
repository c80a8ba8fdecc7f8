//! # Complete model families.

pub mod classifier;
pub mod convnet;
pub mod densenet;
pub mod resnet;
