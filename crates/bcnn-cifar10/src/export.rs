//! ONNX export of the trained model.

use crate::training::TrainingConfig;
use anyhow::{anyhow, bail, Result};
use bcnn::checkpoint::{Checkpointable, StateDict};
use bcnn::onnx;
use burn::prelude::{Backend, Tensor};
use std::path::Path;

/// Representative input shape, ``[channels, height, width]``.
const FEATURE_SHAPE: [usize; 3] = [3, 32, 32];

/// Restore the trained model from `model.ckpt` and write `model.onnx`.
///
/// The exported graph declares a dynamic batch dimension; the
/// representative input only fixes the feature shape and feeds a forward
/// sanity check before the file is written.
pub fn export<B: Backend>(
    artifact_dir: &Path,
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<()> {
    let dict = StateDict::load(&artifact_dir.join("model.ckpt"))?;
    let model = config.model.init::<B>(device).restore("", &dict);

    let [channels, height, width] = FEATURE_SHAPE;
    let representative = Tensor::<B, 4>::zeros([1, channels, height, width], device);
    let logits = model
        .forward(representative)
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| anyhow!("failed to read logits: {err:?}"))?;
    if logits.iter().any(|value| !value.is_finite()) {
        bail!("refusing to export: non-finite logits from the representative input");
    }

    let path = artifact_dir.join("model.onnx");
    onnx::export_to_file(&model, FEATURE_SHAPE, &path)?;
    tracing::info!(path = %path.display(), "onnx export complete");

    Ok(())
}
