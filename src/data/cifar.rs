//! CIFAR-10 binary batches (`cifar-10-batches-bin`).

use std::fs;
use std::path::{Path, PathBuf};

use burn::data::dataset::{Dataset, InMemDataset};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const IMAGE_SIZE: usize = 32;
pub const CHANNELS: usize = 3;
pub const NUM_CLASSES: usize = 10;
/// Pixel bytes per image, stored channel-planar (all red, then green, then blue).
pub const IMAGE_BYTES: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;
const RECORD_BYTES: usize = 1 + IMAGE_BYTES;

pub const CLASS_NAMES: [&str; NUM_CLASSES] = [
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

/// One raw 32x32 RGB image with its label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageItem {
    /// Channel-planar `u8` pixels, `IMAGE_BYTES` long.
    pub pixels: Vec<u8>,
    pub label: usize,
}

pub struct Cifar10Dataset {
    dataset: InMemDataset<ImageItem>,
}

impl Cifar10Dataset {
    /// `data_batch_1.bin` to `data_batch_5.bin`.
    pub fn train<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let files: Vec<PathBuf> = (1..=5)
            .map(|i| root.join(format!("data_batch_{i}.bin")))
            .collect();
        Self::from_files(&files)
    }

    /// `test_batch.bin`.
    pub fn test<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::from_files(&[root.as_ref().join("test_batch.bin")])
    }

    pub fn from_files(files: &[PathBuf]) -> Result<Self> {
        let mut items = Vec::new();
        for path in files {
            let bytes = fs::read(path)?;
            items.extend(parse_records(&bytes, path)?);
            log::debug!("loaded {} CIFAR-10 records from {}", items.len(), path.display());
        }
        Ok(Self::from_items(items))
    }

    pub fn from_items(items: Vec<ImageItem>) -> Self {
        Self {
            dataset: InMemDataset::new(items),
        }
    }
}

impl Dataset<ImageItem> for Cifar10Dataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

/// Splits a batch file into `1 label byte + 3072 pixel bytes` records.
pub fn parse_records(bytes: &[u8], path: &Path) -> Result<Vec<ImageItem>> {
    if bytes.len() % RECORD_BYTES != 0 {
        return Err(Error::Dataset {
            path: path.to_path_buf(),
            reason: format!(
                "{} bytes is not a whole number of {RECORD_BYTES}-byte records",
                bytes.len()
            ),
        });
    }

    bytes
        .chunks_exact(RECORD_BYTES)
        .enumerate()
        .map(|(index, record)| {
            let label = usize::from(record[0]);
            if label >= NUM_CLASSES {
                return Err(Error::Dataset {
                    path: path.to_path_buf(),
                    reason: format!("record {index} has label {label}"),
                });
            }
            Ok(ImageItem {
                pixels: record[1..].to_vec(),
                label,
            })
        })
        .collect()
}
