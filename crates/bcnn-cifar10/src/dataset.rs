//! CIFAR-10 dataset access.
//!
//! Downloads the png-converted CIFAR-10 archive on first use, unpacks it
//! into the data directory, and exposes the train/test splits as
//! [`ImageFolderDataset`]s.

use anyhow::{anyhow, Context, Result};
use burn::data::dataset::vision::ImageFolderDataset;
use flate2::read::GzDecoder;
use std::path::{Path, PathBuf};
use tar::Archive;

/// CIFAR-10 png mirror (original: <https://www.cs.toronto.edu/~kriz/cifar.html>).
const URL: &str = "https://s3.amazonaws.com/fast-ai-sample/cifar10.tgz";

/// Class labels, in label-index order.
pub const CLASSES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

/// CIFAR-10 splits for [`ImageFolderDataset`].
pub trait Cifar10Loader: Sized {
    /// The training split.
    fn cifar10_train(data_dir: &Path) -> Result<Self>;

    /// The held-out test split.
    fn cifar10_test(data_dir: &Path) -> Result<Self>;
}

impl Cifar10Loader for ImageFolderDataset {
    fn cifar10_train(data_dir: &Path) -> Result<Self> {
        let root = download(data_dir)?;
        Self::new_classification(root.join("train"))
            .map_err(|err| anyhow!("failed to load cifar10 train split: {err:?}"))
    }

    fn cifar10_test(data_dir: &Path) -> Result<Self> {
        let root = download(data_dir)?;
        Self::new_classification(root.join("test"))
            .map_err(|err| anyhow!("failed to load cifar10 test split: {err:?}"))
    }
}

/// Fetch and unpack the archive when not already present on disk.
fn download(data_dir: &Path) -> Result<PathBuf> {
    let cifar_dir = data_dir.join("cifar10");

    if !cifar_dir.join("labels.txt").exists() {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        tracing::info!(url = URL, "downloading cifar10");
        let bytes = burn::data::network::downloader::download_file_as_bytes(URL, "cifar10.tgz");

        let gz = GzDecoder::new(&bytes[..]);
        let mut archive = Archive::new(gz);
        archive
            .unpack(data_dir)
            .with_context(|| format!("failed to unpack cifar10 into {}", data_dir.display()))?;
    }

    Ok(cifar_dir)
}
