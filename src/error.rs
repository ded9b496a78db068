//! Error type shared by the data pipeline and the training loops.

use std::path::PathBuf;

use burn::record::RecorderError;
use thiserror::Error;

/// Errors raised while loading data, training or persisting artifacts.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("record error: {0}")]
    Record(String),

    #[error("dataset error at {}: {reason}", path.display())]
    Dataset { path: PathBuf, reason: String },

    #[error("batch {batch} failed: {reason}")]
    Batch { batch: usize, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("training interrupted during epoch {epoch}")]
    Interrupted { epoch: usize },
}

impl From<RecorderError> for Error {
    fn from(err: RecorderError) -> Self {
        Error::Record(format!("{err:?}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
