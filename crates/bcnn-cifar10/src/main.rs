//! CIFAR-10 pipeline: train, evaluate, export, in sequence.

mod data;
mod dataset;
mod evaluate;
mod export;
mod training;

use crate::training::TrainingConfig;
use anyhow::{Context, Result};
use bcnn::models::classifier::ImageClassifierConfig;
use bcnn::models::convnet::ConvNetConfig;
use bcnn::models::densenet::DenseNetConfig;
use bcnn::models::resnet::ResNetConfig;
use burn::backend::Autodiff;
use burn::prelude::Backend;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Which topology to train.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Arch {
    /// Residual-stack model.
    Resnet,
    /// Plain stacked-conv model.
    Convnet,
    /// Dense-growth model.
    Densenet,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model topology.
    #[arg(long, value_enum, default_value = "densenet")]
    arch: Arch,

    /// Directory for the dataset download.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Directory for artifacts (checkpoints, metrics, onnx).
    #[arg(long, default_value = "artifacts")]
    artifact_dir: PathBuf,

    /// Number of epochs to train the model.
    #[arg(long, default_value_t = 10)]
    num_epochs: usize,

    /// Batch size for training and evaluation.
    #[arg(short, long, default_value_t = 128)]
    batch_size: usize,

    /// Adam learning rate.
    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,

    /// Number of workers for data loading.
    #[arg(long, default_value_t = 4)]
    num_workers: usize,

    /// Backend RNG seed.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Early stopping patience, in epochs.
    #[arg(long, default_value_t = 6)]
    patience: usize,
}

impl Args {
    fn model_config(&self) -> ImageClassifierConfig {
        let num_classes = dataset::CLASSES.len();
        match self.arch {
            Arch::Resnet => ResNetConfig::new(num_classes).into(),
            Arch::Convnet => ConvNetConfig::new(num_classes).into(),
            Arch::Densenet => DenseNetConfig::new(num_classes).into(),
        }
    }
}

#[cfg(all(feature = "ndarray", not(feature = "wgpu")))]
mod backend {
    use burn::backend::ndarray::{NdArray, NdArrayDevice};

    pub type Inference = NdArray<f32>;

    pub fn device() -> NdArrayDevice {
        NdArrayDevice::Cpu
    }
}

#[cfg(feature = "wgpu")]
mod backend {
    use burn::backend::wgpu::{Wgpu, WgpuDevice};

    pub type Inference = Wgpu;

    pub fn device() -> WgpuDevice {
        WgpuDevice::default()
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    // The compute device is an explicit parameter of every stage; nothing
    // mutates process-wide device state.
    let device = backend::device();
    run::<backend::Inference>(&args, &device)
}

fn run<B: Backend>(
    args: &Args,
    device: &B::Device,
) -> Result<()> {
    std::fs::create_dir_all(&args.artifact_dir)
        .with_context(|| format!("failed to create {}", args.artifact_dir.display()))?;

    let config = TrainingConfig::new(args.model_config())
        .with_num_epochs(args.num_epochs)
        .with_batch_size(args.batch_size)
        .with_learning_rate(args.learning_rate)
        .with_num_workers(args.num_workers)
        .with_seed(args.seed)
        .with_patience(args.patience);

    training::train::<Autodiff<B>>(&args.data_dir, &args.artifact_dir, &config, device)?;

    let report = evaluate::evaluate::<B>(&args.data_dir, &args.artifact_dir, &config, device)?;
    tracing::info!(accuracy = report.accuracy, "evaluation complete");

    export::export::<B>(&args.artifact_dir, &config, device)?;

    Ok(())
}
