//! Learner wiring for the classifier.

use crate::data::{ClassificationBatch, ClassificationBatcher};
use crate::dataset::Cifar10Loader;
use anyhow::{anyhow, Context, Result};
use bcnn::checkpoint::{Checkpointable, StateDict};
use bcnn::models::classifier::{ImageClassifier, ImageClassifierConfig};
use burn::data::dataloader::DataLoaderBuilder;
use burn::data::dataset::vision::ImageFolderDataset;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::AdamConfig;
use burn::prelude::{Backend, Config, Int, Module, Tensor};
use burn::record::CompactRecorder;
use burn::tensor::backend::AutodiffBackend;
use burn::train::metric::store::{Aggregate, Direction, Split};
use burn::train::metric::{AccuracyMetric, LossMetric, TopKAccuracyMetric};
use burn::train::{
    ClassificationOutput, LearnerBuilder, MetricEarlyStoppingStrategy, StoppingCondition,
    TrainOutput, TrainStep, ValidStep,
};
use std::path::Path;
use std::time::Instant;

/// Pipeline configuration, persisted to `config.json`.
#[derive(Config)]
pub struct TrainingConfig {
    /// The model to train.
    pub model: ImageClassifierConfig,

    /// Number of passes over the training split.
    #[config(default = 10)]
    pub num_epochs: usize,

    /// Items per batch.
    #[config(default = 128)]
    pub batch_size: usize,

    /// Workers for data loading.
    #[config(default = 4)]
    pub num_workers: usize,

    /// Backend RNG seed.
    #[config(default = 42)]
    pub seed: u64,

    /// Adam learning rate.
    #[config(default = 1e-3)]
    pub learning_rate: f64,

    /// Adam weight decay.
    #[config(default = 5e-5)]
    pub weight_decay: f32,

    /// Early-stopping patience, in epochs without valid-loss improvement.
    #[config(default = 6)]
    pub patience: usize,
}

/// Cross-entropy classification head shared by the train and valid steps.
pub trait ClassificationModel<B: Backend> {
    /// Forward plus loss against integer class targets.
    fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B>;
}

impl<B: Backend> ClassificationModel<B> for ImageClassifier<B> {
    fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

impl<B: AutodiffBackend> TrainStep<ClassificationBatch<B>, ClassificationOutput<B>>
    for ImageClassifier<B>
{
    fn step(&self, batch: ClassificationBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<ClassificationBatch<B>, ClassificationOutput<B>>
    for ImageClassifier<B>
{
    fn step(&self, batch: ClassificationBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// Train the configured model.
///
/// Leaves the learner checkpoints, `config.json`, the `CompactRecorder`
/// model file, and the named-tensor checkpoint `model.ckpt` in
/// `artifact_dir`.
pub fn train<B: AutodiffBackend>(
    data_dir: &Path,
    artifact_dir: &Path,
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<()> {
    let artifact_root = artifact_dir
        .to_str()
        .context("artifact dir is not valid utf-8")?;

    config
        .save(artifact_dir.join("config.json"))
        .context("failed to save the training config")?;

    B::seed(config.seed);

    // Dataloaders
    let batcher_train = ClassificationBatcher::<B>::for_training(device);
    let batcher_valid = ClassificationBatcher::<B::InnerBackend>::for_evaluation(device);

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(ImageFolderDataset::cifar10_train(data_dir)?);

    let dataloader_test = DataLoaderBuilder::new(batcher_valid)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(ImageFolderDataset::cifar10_test(data_dir)?);

    let model = config.model.init::<B>(device);
    tracing::info!(params = model.num_params(), "model initialized");

    let optimizer = AdamConfig::new()
        .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay)))
        .init();

    // Learner config
    let learner = LearnerBuilder::new(artifact_root)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(TopKAccuracyMetric::new(3))
        .metric_valid_numeric(TopKAccuracyMetric::new(3))
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .with_file_checkpointer(CompactRecorder::new())
        .early_stopping(MetricEarlyStoppingStrategy::new::<LossMetric<B>>(
            &LossMetric::new(),
            Aggregate::Mean,
            Direction::Lowest,
            Split::Valid,
            StoppingCondition::NoImprovementSince {
                n_epochs: config.patience,
            },
        ))
        .devices(vec![device.clone()])
        .num_epochs(config.num_epochs)
        .summary()
        .build(model, optimizer, config.learning_rate);

    // Training
    let now = Instant::now();
    let model_trained = learner.fit(dataloader_train, dataloader_test);
    let elapsed = now.elapsed().as_secs();
    tracing::info!("training completed in {}m{}s", elapsed / 60, elapsed % 60);

    // Named-tensor checkpoint; the evaluation and export stages restore
    // from this file.
    let mut dict = StateDict::new();
    model_trained.collect("", &mut dict);
    dict.save(&artifact_dir.join("model.ckpt"))?;

    model_trained
        .save_file(artifact_dir.join("model"), &CompactRecorder::new())
        .map_err(|err| anyhow!("failed to save the trained model: {err}"))?;

    Ok(())
}
