//! Metric history (JSON), the per-batch CSV log and the per-epoch text log.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub const METRIC_KEYS: [&str; 6] = [
    "train_acc",
    "test_acc",
    "train_loss",
    "test_loss",
    "train_reg_loss",
    "test_reg_loss",
];

/// Per-epoch metric history, persisted wholesale.
#[derive(Debug, Clone)]
pub struct MetricsLogger {
    dir: PathBuf,
    metrics: BTreeMap<String, Vec<f64>>,
}

impl MetricsLogger {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let metrics = METRIC_KEYS
            .iter()
            .map(|key| (key.to_string(), Vec::new()))
            .collect();
        Ok(Self { dir, metrics })
    }

    /// Appends the values of known keys; anything else is ignored.
    pub fn update(&mut self, values: &[(&str, f64)]) {
        for (key, value) in values {
            match self.metrics.get_mut(*key) {
                Some(history) => history.push(*value),
                None => log::debug!("ignoring unknown metric '{key}'"),
            }
        }
    }

    pub fn history(&self, key: &str) -> Option<&[f64]> {
        self.metrics.get(key).map(Vec::as_slice)
    }

    pub fn save(&self, filename: &str) -> Result<PathBuf> {
        let path = self.dir.join(filename);
        fs::write(&path, serde_json::to_string(&self.metrics)?)?;
        Ok(path)
    }

    pub fn load(&mut self, filename: &str) -> Result<()> {
        let text = fs::read_to_string(self.dir.join(filename))?;
        self.metrics = serde_json::from_str(&text)?;
        Ok(())
    }
}

/// One CSV row; losses of a single batch.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchRow {
    pub epoch: usize,
    pub batch: usize,
    pub total_loss: f64,
    pub box_loss: f64,
    pub dfl_loss: f64,
    pub quat_loss: f64,
}

/// Append-only `epoch,batch,total_loss,box_loss,dfl_loss,quat_loss` log.
pub struct CsvBatchLog {
    writer: csv::Writer<File>,
}

impl CsvBatchLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let needs_header = fs::metadata(path).map(|meta| meta.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        Ok(Self { writer })
    }

    pub fn append(&mut self, row: &BatchRow) -> Result<()> {
        self.writer.serialize(row)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Human-readable per-epoch dump.
pub struct TextLog {
    file: File,
}

impl TextLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    pub fn write_epoch(&mut self, epoch: usize, metrics: &[(&str, f64)]) -> Result<()> {
        writeln!(self.file, "Epoch {epoch}:")?;
        for (key, value) in metrics {
            writeln!(self.file, "{key}: {value:.4}")?;
        }
        writeln!(self.file, "{}", "-".repeat(50))?;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}
