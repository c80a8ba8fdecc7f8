//! # Named-tensor checkpoints.
//!
//! A [`StateDict`] is an ordered map from dotted parameter paths (for
//! example ``stage1.0.cna1.conv.weight``) to raw tensor values.
//!
//! Restore is a partial, name-matched operation: names present in both the
//! dict and the target module are applied; names present in only one side
//! are skipped silently. A missing checkpoint file is an error *before*
//! any read is attempted.
//!
//! [`Checkpointable`] is implemented for the burn primitives the models
//! are built from, and composed per block with explicit prefixes; there is
//! no runtime reflection over module trees.

use burn::module::{Param, RunningState};
use burn::nn::conv::Conv2d;
use burn::nn::{BatchNorm, Linear};
use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Checkpoint I/O failures.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The checkpoint file does not exist.
    #[error("no checkpoint at {path:?}")]
    NotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// Filesystem failure.
    #[error("checkpoint io failure at {path:?}")]
    Io {
        /// The offending path.
        path: PathBuf,

        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Encode/decode failure.
    #[error("malformed checkpoint at {path:?}: {message}")]
    Codec {
        /// The offending path.
        path: PathBuf,

        /// Codec diagnostic.
        message: String,
    },
}

/// Ordered name -> value snapshot of a module's parameters.
///
/// Values are stored as ``f32``, independent of the backend that produced
/// them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StateDict {
    tensors: BTreeMap<String, TensorData>,
}

impl StateDict {
    /// Create an empty dict.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Check if the dict is empty.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// True when `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    /// Parameter names, in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Record a tensor value under `name`.
    pub fn insert<B: Backend, const D: usize>(
        &mut self,
        name: impl Into<String>,
        tensor: &Tensor<B, D>,
    ) {
        self.tensors
            .insert(name.into(), tensor.to_data().convert::<f32>());
    }

    /// Look up `name` and build a tensor on `device`.
    ///
    /// Returns `None` when the name is absent. Shape agreement is the
    /// caller's contract; mismatches surface as tensor construction
    /// errors, like any forward-pass shape error.
    pub fn get<B: Backend, const D: usize>(
        &self,
        name: &str,
        device: &B::Device,
    ) -> Option<Tensor<B, D>> {
        self.tensors
            .get(name)
            .map(|data| Tensor::from_data(data.clone().convert::<B::FloatElem>(), device))
    }

    /// Write the dict to `path` as MessagePack.
    pub fn save(
        &self,
        path: &Path,
    ) -> Result<(), CheckpointError> {
        let bytes = rmp_serde::to_vec_named(self).map_err(|err| CheckpointError::Codec {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        std::fs::write(path, bytes).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read a dict from `path`.
    ///
    /// Fails with [`CheckpointError::NotFound`] when the file is absent,
    /// before any read is attempted.
    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        if !path.is_file() {
            return Err(CheckpointError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let bytes = std::fs::read(path).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        rmp_serde::from_slice(&bytes).map_err(|err| CheckpointError::Codec {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }
}

/// Modules that can dump and restore their parameters by name.
pub trait Checkpointable<B: Backend>: Sized {
    /// Record every parameter under `prefix` into `dict`.
    fn collect(
        &self,
        prefix: &str,
        dict: &mut StateDict,
    );

    /// Rebuild `self`, taking each parameter whose name is present in
    /// `dict` and keeping the current value otherwise.
    #[must_use]
    fn restore(
        self,
        prefix: &str,
        dict: &StateDict,
    ) -> Self;
}

/// Join a prefix and a component into a dotted path.
pub fn key(
    prefix: &str,
    name: &str,
) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn restore_param<B: Backend, const D: usize>(
    param: Param<Tensor<B, D>>,
    name: &str,
    dict: &StateDict,
) -> Param<Tensor<B, D>> {
    if !dict.contains(name) {
        return param;
    }
    param.map(|tensor| {
        let device = tensor.device();
        dict.get(name, &device).unwrap_or(tensor)
    })
}

impl<B: Backend> Checkpointable<B> for Conv2d<B> {
    fn collect(
        &self,
        prefix: &str,
        dict: &mut StateDict,
    ) {
        dict.insert(key(prefix, "weight"), &self.weight.val());
        if let Some(bias) = &self.bias {
            dict.insert(key(prefix, "bias"), &bias.val());
        }
    }

    fn restore(
        mut self,
        prefix: &str,
        dict: &StateDict,
    ) -> Self {
        self.weight = restore_param(self.weight, &key(prefix, "weight"), dict);
        self.bias = self
            .bias
            .map(|bias| restore_param(bias, &key(prefix, "bias"), dict));
        self
    }
}

impl<B: Backend> Checkpointable<B> for Linear<B> {
    fn collect(
        &self,
        prefix: &str,
        dict: &mut StateDict,
    ) {
        dict.insert(key(prefix, "weight"), &self.weight.val());
        if let Some(bias) = &self.bias {
            dict.insert(key(prefix, "bias"), &bias.val());
        }
    }

    fn restore(
        mut self,
        prefix: &str,
        dict: &StateDict,
    ) -> Self {
        self.weight = restore_param(self.weight, &key(prefix, "weight"), dict);
        self.bias = self
            .bias
            .map(|bias| restore_param(bias, &key(prefix, "bias"), dict));
        self
    }
}

impl<B: Backend> Checkpointable<B> for BatchNorm<B, 2> {
    fn collect(
        &self,
        prefix: &str,
        dict: &mut StateDict,
    ) {
        dict.insert(key(prefix, "gamma"), &self.gamma.val());
        dict.insert(key(prefix, "beta"), &self.beta.val());
        dict.insert(key(prefix, "running_mean"), &self.running_mean.value());
        dict.insert(key(prefix, "running_var"), &self.running_var.value());
    }

    fn restore(
        mut self,
        prefix: &str,
        dict: &StateDict,
    ) -> Self {
        let device = self.gamma.val().device();
        self.gamma = restore_param(self.gamma, &key(prefix, "gamma"), dict);
        self.beta = restore_param(self.beta, &key(prefix, "beta"), dict);
        if let Some(mean) = dict.get::<B, 1>(&key(prefix, "running_mean"), &device) {
            self.running_mean = RunningState::new(mean);
        }
        if let Some(var) = dict.get::<B, 1>(&key(prefix, "running_var"), &device) {
            self.running_var = RunningState::new(var);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::conv::Conv2dConfig;
    use burn::nn::{BatchNormConfig, LinearConfig};

    type B = NdArray<f32>;

    #[test]
    fn test_key_paths() {
        assert_eq!(key("", "weight"), "weight");
        assert_eq!(key("stem.conv", "weight"), "stem.conv.weight");
    }

    #[test]
    fn test_conv_roundtrip() {
        let device = Default::default();

        let a: Conv2d<B> = Conv2dConfig::new([2, 4], [3, 3]).init(&device);
        let b: Conv2d<B> = Conv2dConfig::new([2, 4], [3, 3]).init(&device);

        let mut dict = StateDict::new();
        a.collect("conv", &mut dict);
        assert!(dict.contains("conv.weight"));
        assert!(dict.contains("conv.bias"));

        let b = b.restore("conv", &dict);
        b.weight
            .val()
            .to_data()
            .assert_eq(&a.weight.val().to_data(), true);
    }

    #[test]
    fn test_restore_skips_missing_names() {
        let device = Default::default();

        let a: Linear<B> = LinearConfig::new(4, 2).init(&device);
        let before = a.weight.val();

        let a = a.restore("fc", &StateDict::new());
        a.weight.val().to_data().assert_eq(&before.to_data(), true);
    }

    #[test]
    fn test_restore_ignores_extra_names() {
        let device = Default::default();

        let a: Linear<B> = LinearConfig::new(4, 2).init(&device);
        let b: Linear<B> = LinearConfig::new(4, 2).init(&device);

        let mut dict = StateDict::new();
        a.collect("fc", &mut dict);
        dict.insert("unrelated.weight", &Tensor::<B, 1>::ones([3], &device));

        let b = b.restore("fc", &dict);
        b.weight
            .val()
            .to_data()
            .assert_eq(&a.weight.val().to_data(), true);
    }

    #[test]
    fn test_batch_norm_running_stats_roundtrip() {
        let device = Default::default();

        let mut a: BatchNorm<B, 2> = BatchNormConfig::new(3).init(&device);
        a.running_mean = RunningState::new(Tensor::<B, 1>::from_floats([1.0, 2.0, 3.0], &device));

        let mut dict = StateDict::new();
        a.collect("norm", &mut dict);

        let b: BatchNorm<B, 2> = BatchNormConfig::new(3).init(&device);
        let b = b.restore("norm", &dict);

        b.running_mean
            .value()
            .to_data()
            .assert_eq(&a.running_mean.value().to_data(), true);
    }

    #[test]
    fn test_save_load_file() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ckpt");

        let mut dict = StateDict::new();
        dict.insert("fc.weight", &Tensor::<B, 2>::ones([2, 3], &device));
        dict.save(&path).unwrap();

        let loaded = StateDict::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains("fc.weight"));

        let tensor: Tensor<B, 2> = loaded.get("fc.weight", &device).unwrap();
        assert_eq!(tensor.dims(), [2, 3]);
    }

    #[test]
    fn test_load_missing_file_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.ckpt");

        let err = StateDict::load(&path).unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound { .. }));
    }
}
