//! Generic training loop for a quaternion object detector.
//!
//! The detector, its loss and its mAP evaluator are supplied by the caller
//! through [`DetectionModel`], [`DetectionLoss`] and [`DetectionEvaluator`].
//! The loop owns optimisation, the loss-scale guard, logging and
//! checkpoints.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use super::checkpoint::{self, BEST_DIR, CheckpointState};
use super::metrics::BatchRow;
use super::scaler::{GradScaler, ScalerStep};
use super::scheduler::MultiStepLr;
use super::session::TrainingSession;
use crate::error::Error;
use crate::model::QuaternionState;

pub const BOX_WEIGHT: f64 = 1.0;
pub const DFL_WEIGHT: f64 = 0.5;
pub const CLS_WEIGHT: f64 = 1.0;
pub const QUAT_WEIGHT: f64 = 0.1;

#[derive(Clone, Debug)]
pub struct DetectionBatch<B: Backend> {
    /// `[batch, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch, objects, 4]`
    pub boxes: Tensor<B, 3>,
    /// `[batch, objects]`
    pub categories: Tensor<B, 2, Int>,
}

/// The four scalar loss terms of one batch, each of shape `[1]`.
#[derive(Clone, Debug)]
pub struct LossTerms<B: Backend> {
    pub box_loss: Tensor<B, 1>,
    pub dfl_loss: Tensor<B, 1>,
    pub cls_loss: Tensor<B, 1>,
    pub quat_loss: Tensor<B, 1>,
}

impl<B: Backend> LossTerms<B> {
    /// `box + 0.5 * dfl + cls + 0.1 * quat`
    pub fn total(&self) -> Tensor<B, 1> {
        self.box_loss.clone().mul_scalar(BOX_WEIGHT)
            + self.dfl_loss.clone().mul_scalar(DFL_WEIGHT)
            + self.cls_loss.clone().mul_scalar(CLS_WEIGHT)
            + self.quat_loss.clone().mul_scalar(QUAT_WEIGHT)
    }
}

pub trait DetectionModel<B: Backend> {
    type Output;

    fn forward(&self, images: Tensor<B, 4>) -> Self::Output;

    /// Extra state persisted with checkpoints, for models that have some.
    fn quaternion_state(&self) -> Option<QuaternionState> {
        None
    }
}

pub trait DetectionLoss<B: Backend, O> {
    fn losses(&self, outputs: O, batch: &DetectionBatch<B>) -> crate::error::Result<LossTerms<B>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionMetrics {
    /// Mean average precision at IoU 0.5.
    pub map50: f64,
}

pub trait DetectionEvaluator<M> {
    fn evaluate(&mut self, model: &M) -> crate::error::Result<DetectionMetrics>;
}

#[derive(Config, Debug)]
pub struct TrainerConfig {
    /// Batches between progress updates and CSV rows.
    #[config(default = 10)]
    pub log_every: usize,
    /// Epochs between unconditional checkpoints.
    #[config(default = 10)]
    pub checkpoint_every: usize,
}

impl TrainerConfig {
    /// Rejects cadences of zero.
    pub fn validate(&self) -> crate::error::Result<()> {
        for (name, value) in [
            ("log_every", self.log_every),
            ("checkpoint_every", self.checkpoint_every),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }
}

/// Loss values of one batch or averaged over an epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochLosses {
    pub total_loss: f64,
    pub box_loss: f64,
    pub dfl_loss: f64,
    pub cls_loss: f64,
    pub quat_loss: f64,
}

impl EpochLosses {
    fn from_terms<B: Backend>(terms: &LossTerms<B>, total: &Tensor<B, 1>) -> Self {
        let value = |t: &Tensor<B, 1>| t.clone().into_scalar().elem::<f64>();
        Self {
            total_loss: value(total),
            box_loss: value(&terms.box_loss),
            dfl_loss: value(&terms.dfl_loss),
            cls_loss: value(&terms.cls_loss),
            quat_loss: value(&terms.quat_loss),
        }
    }

    fn add(&mut self, other: &Self) {
        self.total_loss += other.total_loss;
        self.box_loss += other.box_loss;
        self.dfl_loss += other.dfl_loss;
        self.cls_loss += other.cls_loss;
        self.quat_loss += other.quat_loss;
    }

    fn scaled(&self, factor: f64) -> Self {
        Self {
            total_loss: self.total_loss * factor,
            box_loss: self.box_loss * factor,
            dfl_loss: self.dfl_loss * factor,
            cls_loss: self.cls_loss * factor,
            quat_loss: self.quat_loss * factor,
        }
    }

    pub fn as_pairs(&self) -> [(&'static str, f64); 5] {
        [
            ("total_loss", self.total_loss),
            ("box_loss", self.box_loss),
            ("dfl_loss", self.dfl_loss),
            ("cls_loss", self.cls_loss),
            ("quat_loss", self.quat_loss),
        ]
    }
}

/// Result of one training pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochReport {
    pub losses: EpochLosses,
    pub batches: usize,
    pub interrupted: bool,
}

/// Which checkpoints a validation wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    pub best: bool,
    pub periodic: bool,
}

pub struct Trainer<B, M, O, L, E> {
    model: M,
    optimizer: O,
    loss_fn: L,
    evaluator: E,
    scheduler: MultiStepLr,
    scaler: GradScaler,
    config: TrainerConfig,
    best_map: f64,
    best_epoch: usize,
    _backend: PhantomData<B>,
}

impl<B, M, O, L, E> Trainer<B, M, O, L, E>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + DetectionModel<B>,
    O: Optimizer<M, B>,
    L: DetectionLoss<B, M::Output>,
    E: DetectionEvaluator<M>,
{
    /// Gradient clipping is configured on the optimizer itself.
    pub fn new(
        config: TrainerConfig,
        model: M,
        optimizer: O,
        loss_fn: L,
        evaluator: E,
        scheduler: MultiStepLr,
    ) -> crate::error::Result<Self> {
        config.validate()?;
        Ok(Self {
            model,
            optimizer,
            loss_fn,
            evaluator,
            scheduler,
            scaler: GradScaler::default(),
            config,
            best_map: 0.0,
            best_epoch: 0,
            _backend: PhantomData,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn scaler(&self) -> &GradScaler {
        &self.scaler
    }

    pub fn best_map(&self) -> f64 {
        self.best_map
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    /// Trains on every batch of `batches`, averaging the loss terms.
    ///
    /// A failing batch is logged and aborts the epoch with [`Error::Batch`].
    pub fn train_one_epoch<I>(
        &mut self,
        epoch: usize,
        batches: I,
        session: &mut TrainingSession,
    ) -> crate::error::Result<EpochReport>
    where
        I: IntoIterator<Item = DetectionBatch<B>>,
    {
        let batches = batches.into_iter();
        let len = batches.size_hint().1.unwrap_or(0) as u64;
        let bar = session.progress_bar(len, &format!("Epoch {}", epoch + 1));

        let mut sums = EpochLosses::default();
        let mut count = 0;
        let mut interrupted = false;

        for (index, batch) in batches.enumerate() {
            if session.interrupted() {
                interrupted = true;
                break;
            }

            let losses = match self.train_batch(batch) {
                Ok(losses) => losses,
                Err(err) => {
                    log::error!("error in batch {index} of epoch {epoch}: {err}");
                    bar.abandon();
                    return Err(Error::Batch {
                        batch: index,
                        reason: err.to_string(),
                    });
                }
            };
            sums.add(&losses);
            count += 1;
            bar.inc(1);

            if index % self.config.log_every == 0 {
                bar.set_message(format!(
                    "loss {:.4} box {:.4} dfl {:.4} cls {:.4} quat {:.4}",
                    losses.total_loss,
                    losses.box_loss,
                    losses.dfl_loss,
                    losses.cls_loss,
                    losses.quat_loss
                ));
                if let Some(csv) = session.csv_log() {
                    let row = BatchRow {
                        epoch,
                        batch: index,
                        total_loss: losses.total_loss,
                        box_loss: losses.box_loss,
                        dfl_loss: losses.dfl_loss,
                        quat_loss: losses.quat_loss,
                    };
                    if let Err(err) = csv.append(&row) {
                        bar.abandon();
                        return Err(err);
                    }
                }
            }
        }
        bar.finish_and_clear();

        let losses = if count == 0 {
            sums
        } else {
            sums.scaled(1.0 / count as f64)
        };
        Ok(EpochReport {
            losses,
            batches: count,
            interrupted,
        })
    }

    fn train_batch(&mut self, batch: DetectionBatch<B>) -> crate::error::Result<EpochLosses> {
        let outputs = self.model.forward(batch.images.clone());
        let terms = self.loss_fn.losses(outputs, &batch)?;
        let total = terms.total();
        let losses = EpochLosses::from_terms(&terms, &total);

        if self.scaler.update(losses.total_loss) == ScalerStep::Applied {
            let grads = GradientsParams::from_grads(total.backward(), &self.model);
            self.model = self
                .optimizer
                .step(self.scheduler.lr(), self.model.clone(), grads);
        }
        self.scheduler.step();

        Ok(losses)
    }

    /// Validates, then writes a best checkpoint on a new best mAP@0.5 and a
    /// periodic one every `checkpoint_every` epochs.
    pub fn validate_and_save(
        &mut self,
        epoch: usize,
        save_dir: &Path,
    ) -> crate::error::Result<(DetectionMetrics, SaveOutcome)> {
        let metrics = self.evaluator.evaluate(&self.model)?;
        let mut outcome = SaveOutcome::default();

        if metrics.map50 > self.best_map {
            self.best_map = metrics.map50;
            self.best_epoch = epoch;
            log::info!("new best mAP@0.5 {:.4} at epoch {epoch}", metrics.map50);
            self.save_checkpoint(save_dir, epoch, true)?;
            outcome.best = true;
        }

        if epoch % self.config.checkpoint_every == 0 {
            if !outcome.best {
                self.save_checkpoint(save_dir, epoch, false)?;
            }
            outcome.periodic = true;
        }

        Ok((metrics, outcome))
    }

    /// Writes `checkpoint_epoch_{epoch}` and, for a best model, `best_model`.
    pub fn save_checkpoint(&self, save_dir: &Path, epoch: usize, is_best: bool) -> crate::error::Result<PathBuf> {
        let state = self.checkpoint_state(epoch);
        let path = checkpoint::save_checkpoint(
            &save_dir.join(checkpoint::epoch_dir(epoch)),
            &self.model,
            &self.optimizer,
            &state,
        )?;
        if is_best {
            checkpoint::save_checkpoint(&save_dir.join(BEST_DIR), &self.model, &self.optimizer, &state)?;
        }
        Ok(path)
    }

    /// Saves into `dir` with the interrupt marker set.
    pub fn save_interrupt_checkpoint(&self, dir: &Path, epoch: usize) -> crate::error::Result<PathBuf> {
        let mut state = self.checkpoint_state(epoch);
        state.interrupt_save = true;
        checkpoint::save_checkpoint(dir, &self.model, &self.optimizer, &state)
    }

    fn checkpoint_state(&self, epoch: usize) -> CheckpointState {
        let mut state = CheckpointState::new(epoch, self.scheduler.clone());
        state.scaler = Some(self.scaler.clone());
        state.best_map = Some(self.best_map);
        state.quaternion_state = self.model.quaternion_state();
        state
    }

    /// Runs `epochs` epochs, logging each to the session's text log.
    /// Returns `false` when stopped by an interrupt.
    pub fn fit<F, I>(&mut self, epochs: usize, batches: F, session: &mut TrainingSession) -> crate::error::Result<bool>
    where
        F: Fn() -> I,
        I: IntoIterator<Item = DetectionBatch<B>>,
    {
        let save_dir = session.dir().to_path_buf();
        for epoch in 0..epochs {
            let report = self.train_one_epoch(epoch, batches(), session)?;
            if report.interrupted {
                return Ok(false);
            }

            let (metrics, _) = self.validate_and_save(epoch, &save_dir)?;
            let mut values = report.losses.as_pairs().to_vec();
            values.push(("map50", metrics.map50));
            if let Some(log) = session.text_log() {
                log.write_epoch(epoch, &values)?;
            }
            log::info!(
                "epoch {epoch}: loss {:.4}, mAP@0.5 {:.4}",
                report.losses.total_loss,
                metrics.map50
            );
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CpuBackend, cpu_device};

    fn scalar(value: f32) -> Tensor<CpuBackend, 1> {
        Tensor::from_floats([value], &cpu_device())
    }

    #[test]
    fn total_uses_fixed_weights() {
        let terms = LossTerms {
            box_loss: scalar(1.0),
            dfl_loss: scalar(2.0),
            cls_loss: scalar(3.0),
            quat_loss: scalar(4.0),
        };

        let total = terms.total().into_scalar();

        assert!((total - 5.4).abs() < 1e-6);
    }

    #[test]
    fn zero_log_cadence_is_rejected() {
        let config = TrainerConfig::new().with_log_every(0);

        match config.validate() {
            Err(Error::Config(reason)) => assert!(reason.contains("log_every")),
            other => panic!("expected a config error, got {other:?}"),
        }
        assert!(TrainerConfig::new().with_checkpoint_every(0).validate().is_err());
        assert!(TrainerConfig::new().validate().is_ok());
    }

    #[test]
    fn epoch_losses_average() {
        let mut sums = EpochLosses::default();
        let batch = EpochLosses {
            total_loss: 2.0,
            box_loss: 1.0,
            dfl_loss: 0.5,
            cls_loss: 0.25,
            quat_loss: 4.0,
        };
        sums.add(&batch);
        sums.add(&batch.scaled(3.0));

        let mean = sums.scaled(0.5);

        assert_eq!(mean.total_loss, 4.0);
        assert_eq!(mean.quat_loss, 8.0);
        assert_eq!(mean.as_pairs()[2], ("dfl_loss", 1.0));
    }
}
