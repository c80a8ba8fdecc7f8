//! Held-out evaluation and the metrics report.
//!
//! Restores the trained model from the named-tensor checkpoint (partial,
//! name-matched), scores the test split, and writes per-class
//! precision/recall/F1/support plus overall accuracy to `metrics.yaml`.

use crate::data::ClassificationBatcher;
use crate::dataset::{Cifar10Loader, CLASSES};
use crate::training::TrainingConfig;
use anyhow::{anyhow, Context, Result};
use bcnn::checkpoint::{Checkpointable, StateDict};
use burn::data::dataloader::DataLoaderBuilder;
use burn::data::dataset::vision::ImageFolderDataset;
use burn::prelude::Backend;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Per-class scores.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    /// `tp / (tp + fp)`; 0.0 when the class was never predicted.
    pub precision: f64,

    /// `tp / (tp + fn)`; 0.0 when the class has no samples.
    pub recall: f64,

    /// Harmonic mean of precision and recall.
    pub f1_score: f64,

    /// Number of ground-truth samples.
    pub support: usize,
}

/// The evaluation report written to `metrics.yaml`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Per-class scores, keyed by class name.
    pub classes: BTreeMap<String, ClassReport>,

    /// Overall fraction of correct predictions.
    pub accuracy: f64,
}

impl EvaluationReport {
    /// Build a report from parallel label/prediction sequences.
    pub fn from_predictions(
        labels: &[usize],
        predictions: &[usize],
        class_names: &[&str],
    ) -> Self {
        let num_classes = class_names.len();
        let mut confusion = vec![vec![0usize; num_classes]; num_classes];
        for (&label, &predicted) in labels.iter().zip(predictions) {
            confusion[label][predicted] += 1;
        }

        let ratio = |numerator: usize, denominator: usize| -> f64 {
            if denominator == 0 {
                0.0
            } else {
                numerator as f64 / denominator as f64
            }
        };

        let mut classes = BTreeMap::new();
        for (index, &name) in class_names.iter().enumerate() {
            let true_positives = confusion[index][index];
            let support: usize = confusion[index].iter().sum();
            let predicted: usize = confusion.iter().map(|row| row[index]).sum();

            let precision = ratio(true_positives, predicted);
            let recall = ratio(true_positives, support);
            let f1_score = if precision + recall == 0.0 {
                0.0
            } else {
                2.0 * precision * recall / (precision + recall)
            };

            classes.insert(
                name.to_string(),
                ClassReport {
                    precision,
                    recall,
                    f1_score,
                    support,
                },
            );
        }

        let correct: usize = (0..num_classes).map(|index| confusion[index][index]).sum();
        let accuracy = ratio(correct, labels.len());

        Self { classes, accuracy }
    }

    /// Write the report to `path` as YAML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("failed to encode the metrics report")?;
        std::fs::write(path, yaml)
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

/// Restore the trained model from `model.ckpt` and score the test split.
pub fn evaluate<B: Backend>(
    data_dir: &Path,
    artifact_dir: &Path,
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<EvaluationReport> {
    let dict = StateDict::load(&artifact_dir.join("model.ckpt"))?;
    let model = config.model.init::<B>(device).restore("", &dict);

    let batcher = ClassificationBatcher::<B>::for_evaluation(device);
    let dataloader = DataLoaderBuilder::new(batcher)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(ImageFolderDataset::cifar10_test(data_dir)?);

    let mut labels = Vec::new();
    let mut predictions = Vec::new();
    for batch in dataloader.iter() {
        let targets = batch
            .targets
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|err| anyhow!("failed to read targets: {err:?}"))?;

        let predicted = model
            .forward(batch.images)
            .argmax(1)
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|err| anyhow!("failed to read predictions: {err:?}"))?;

        labels.extend(targets.into_iter().map(|value| value as usize));
        predictions.extend(predicted.into_iter().map(|value| value as usize));
    }

    let report = EvaluationReport::from_predictions(&labels, &predictions, &CLASSES);
    report.save(&artifact_dir.join("metrics.yaml"))?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_from_a_hand_checked_confusion() {
        // labels:      a a a b b c
        // predictions: a a b b b a
        let labels = [0, 0, 0, 1, 1, 2];
        let predictions = [0, 0, 1, 1, 1, 0];

        let report = EvaluationReport::from_predictions(&labels, &predictions, &["a", "b", "c"]);

        assert!((report.accuracy - 4.0 / 6.0).abs() < 1e-12);

        let a = &report.classes["a"];
        assert!((a.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((a.recall - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(a.support, 3);

        let b = &report.classes["b"];
        assert!((b.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((b.recall - 1.0).abs() < 1e-12);
        assert!((b.f1_score - 0.8).abs() < 1e-12);
        assert_eq!(b.support, 2);

        // never predicted: zero precision/recall/f1, not a crash
        let c = &report.classes["c"];
        assert_eq!(c.precision, 0.0);
        assert_eq!(c.recall, 0.0);
        assert_eq!(c.f1_score, 0.0);
        assert_eq!(c.support, 1);
    }

    #[test]
    fn test_report_yaml_roundtrip() {
        let report = EvaluationReport::from_predictions(&[0, 1], &[0, 1], &["a", "b"]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.yaml");
        report.save(&path).unwrap();

        let yaml = std::fs::read_to_string(&path).unwrap();
        let loaded: EvaluationReport = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(loaded, report);
        assert_eq!(loaded.accuracy, 1.0);
    }
}
