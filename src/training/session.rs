//! Run-scoped resources and the interrupt path.
//!
//! A [`TrainingSession`] owns the progress bars and log writers of one run.
//! On Ctrl-C the loops notice the raised [`InterruptFlag`] between batches
//! and the caller invokes [`TrainingSession::shutdown`], which closes the
//! bars, then the writers, then saves an interrupt checkpoint. Every step
//! runs even if an earlier one failed.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::metrics::{CsvBatchLog, TextLog};
use crate::error::Result;

/// Shared stop request, polled between batches.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raises the flag on the first Ctrl-C, from a dedicated listener thread.
    pub fn listen_for_ctrl_c(&self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let flag = self.clone();
        std::thread::Builder::new()
            .name("ctrl-c".into())
            .spawn(move || {
                runtime.block_on(async {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => {
                            log::warn!("interrupt received, stopping after the current batch");
                            flag.raise();
                        }
                        Err(err) => log::error!("cannot listen for Ctrl-C: {err}"),
                    }
                });
            })?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStep {
    ProgressBars,
    LogWriters,
    InterruptCheckpoint,
}

/// What each shutdown step did.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub steps: Vec<(ShutdownStep, std::result::Result<(), String>)>,
    pub checkpoint: Option<PathBuf>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|(_, outcome)| outcome.is_ok())
    }

    fn push(&mut self, step: ShutdownStep, outcome: std::result::Result<(), String>) {
        if let Err(reason) = &outcome {
            log::error!("shutdown step {step:?} failed: {reason}");
        }
        self.steps.push((step, outcome));
    }
}

/// Runs `f`, turning both errors and panics into a message.
fn isolated<T>(f: impl FnOnce() -> Result<T>) -> std::result::Result<T, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(panic) => Err(panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".to_string())),
    }
}

pub struct TrainingSession {
    dir: PathBuf,
    progress: MultiProgress,
    bars: Vec<ProgressBar>,
    csv_log: Option<CsvBatchLog>,
    text_log: Option<TextLog>,
    interrupt: InterruptFlag,
}

impl TrainingSession {
    pub fn new<P: AsRef<Path>>(dir: P, interrupt: InterruptFlag) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            progress: MultiProgress::new(),
            bars: Vec::new(),
            csv_log: None,
            text_log: None,
            interrupt,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn interrupt(&self) -> &InterruptFlag {
        &self.interrupt
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.is_raised()
    }

    /// Opens `training_log.csv` and `training_log.txt` in the run directory.
    pub fn open_logs(&mut self) -> Result<()> {
        self.csv_log = Some(CsvBatchLog::open(self.dir.join("training_log.csv"))?);
        self.text_log = Some(TextLog::open(self.dir.join("training_log.txt"))?);
        Ok(())
    }

    pub fn csv_log(&mut self) -> Option<&mut CsvBatchLog> {
        self.csv_log.as_mut()
    }

    pub fn text_log(&mut self) -> Option<&mut TextLog> {
        self.text_log.as_mut()
    }

    /// Adds a bar to the session's display; it is finished on shutdown.
    pub fn progress_bar(&mut self, len: u64, prefix: &str) -> ProgressBar {
        let bar = self.progress.add(ProgressBar::new(len));
        let style = ProgressStyle::default_bar()
            .template("{prefix} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        bar.set_prefix(prefix.to_string());
        self.bars.push(bar.clone());
        bar
    }

    /// Bars that are neither finished nor abandoned.
    pub fn active_bars(&self) -> usize {
        self.bars.iter().filter(|bar| !bar.is_finished()).count()
    }

    /// Normal end of a run: finishes the bars and flushes the logs.
    pub fn close(&mut self) -> Result<()> {
        for bar in self.bars.drain(..) {
            bar.finish();
        }
        if let Some(csv) = self.csv_log.take() {
            csv.close()?;
        }
        if let Some(text) = self.text_log.take() {
            text.close()?;
        }
        Ok(())
    }

    /// Ordered cleanup: progress bars, log writers, interrupt checkpoint.
    pub fn shutdown(
        &mut self,
        save_checkpoint: impl FnOnce(&Path) -> Result<PathBuf>,
    ) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        let bars = std::mem::take(&mut self.bars);
        report.push(
            ShutdownStep::ProgressBars,
            isolated(|| {
                for bar in bars {
                    bar.abandon();
                }
                Ok(())
            }),
        );

        let csv_log = self.csv_log.take();
        let text_log = self.text_log.take();
        report.push(
            ShutdownStep::LogWriters,
            isolated(|| {
                let csv = csv_log.map(CsvBatchLog::close).transpose();
                let text = text_log.map(TextLog::close).transpose();
                csv.and(text).map(|_| ())
            }),
        );

        let dir = self.dir.join(super::checkpoint::INTERRUPT_DIR);
        match isolated(|| save_checkpoint(&dir)) {
            Ok(path) => {
                log::info!("interrupt checkpoint saved to {}", path.display());
                report.checkpoint = Some(path);
                report.push(ShutdownStep::InterruptCheckpoint, Ok(()));
            }
            Err(reason) => report.push(ShutdownStep::InterruptCheckpoint, Err(reason)),
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn flag_is_shared_between_clones() {
        let flag = InterruptFlag::new();
        let other = flag.clone();
        assert!(!other.is_raised());

        flag.raise();

        assert!(other.is_raised());
    }

    #[test]
    fn shutdown_runs_steps_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = TrainingSession::new(dir.path(), InterruptFlag::new()).unwrap();
        session.open_logs().unwrap();
        let _bar = session.progress_bar(10, "epoch");

        let report = session.shutdown(|target| {
            std::fs::create_dir_all(target)?;
            Ok(target.to_path_buf())
        });

        let order: Vec<ShutdownStep> = report.steps.iter().map(|(step, _)| *step).collect();
        assert_eq!(
            order,
            vec![
                ShutdownStep::ProgressBars,
                ShutdownStep::LogWriters,
                ShutdownStep::InterruptCheckpoint,
            ]
        );
        assert!(report.is_clean());
        assert_eq!(report.checkpoint, Some(dir.path().join("interrupt_checkpoint")));
    }

    #[test]
    fn failing_checkpoint_is_reported_not_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = TrainingSession::new(dir.path(), InterruptFlag::new()).unwrap();

        let report = session.shutdown(|_| Err(Error::Config("disk full".into())));

        assert!(!report.is_clean());
        assert!(report.steps[0].1.is_ok());
        assert!(report.steps[1].1.is_ok());
        assert!(report.steps[2].1.as_ref().unwrap_err().contains("disk full"));
        assert!(report.checkpoint.is_none());
    }
}
