//! CIFAR-10 classification training: SGD with Nesterov momentum, a
//! multi-step learning-rate schedule and accuracy-driven checkpoints.

use std::path::{Path, PathBuf};

use burn::{
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{
        GradientsParams, Optimizer, SgdConfig, decay::WeightDecayConfig, momentum::MomentumConfig,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
    train::ClassificationOutput,
};

use super::checkpoint::{self, BEST_DIR, CheckpointState};
use super::metrics::MetricsLogger;
use super::scheduler::MultiStepLr;
use super::session::TrainingSession;
use crate::data::CifarBatch;
use crate::error::Error;
use crate::model::ImageClassifier;

pub const METRICS_FILE: &str = "metrics.json";

#[derive(Config, Debug)]
pub struct ClassificationConfig {
    #[config(default = 300)]
    pub num_epochs: usize,
    #[config(default = 0.1)]
    pub learning_rate: f64,
    #[config(default = 0.9)]
    pub momentum: f64,
    #[config(default = 1e-4)]
    pub weight_decay: f32,
    /// Maximum global gradient norm.
    #[config(default = 1.0)]
    pub grad_clip: f32,
    #[config(default = "vec![75, 150, 225]")]
    pub milestones: Vec<usize>,
    #[config(default = 0.1)]
    pub gamma: f64,
    /// Epoch cadence of the metrics JSON dump.
    #[config(default = 10)]
    pub metrics_every: usize,
    /// Epoch cadence of `checkpoint_epoch_{n}` saves.
    #[config(default = 10)]
    pub checkpoint_every: usize,
}

impl ClassificationConfig {
    pub fn optimizer(&self) -> SgdConfig {
        SgdConfig::new()
            .with_weight_decay(Some(WeightDecayConfig::new(self.weight_decay)))
            .with_momentum(Some(
                MomentumConfig::new()
                    .with_momentum(self.momentum)
                    .with_dampening(0.0)
                    .with_nesterov(true),
            ))
            .with_gradient_clipping(Some(GradientClippingConfig::Norm(self.grad_clip)))
    }

    /// Rejects cadences of zero.
    pub fn validate(&self) -> crate::error::Result<()> {
        for (name, value) in [
            ("metrics_every", self.metrics_every),
            ("checkpoint_every", self.checkpoint_every),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }

    pub fn scheduler(&self) -> MultiStepLr {
        MultiStepLr::new(self.learning_rate, self.milestones.clone(), self.gamma)
    }
}

/// Mean loss and accuracy (in percent) over the batches of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochSummary {
    pub loss: f64,
    pub accuracy: f64,
    pub batches: usize,
    pub samples: usize,
    /// The pass stopped early because an interrupt was requested.
    pub interrupted: bool,
}

#[derive(Debug, Default)]
struct Accumulator {
    loss: f64,
    correct: usize,
    samples: usize,
    batches: usize,
}

impl Accumulator {
    fn record<B: Backend>(&mut self, output: &ClassificationOutput<B>) {
        let batch_size = output.targets.dims()[0];
        let correct = output
            .output
            .clone()
            .argmax(1)
            .squeeze::<1>(1)
            .equal(output.targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();

        self.loss += output.loss.clone().into_scalar().elem::<f64>();
        self.correct += correct as usize;
        self.samples += batch_size;
        self.batches += 1;
    }

    fn finish(self, interrupted: bool) -> EpochSummary {
        let mean = |total: f64, count: usize| if count == 0 { 0.0 } else { total / count as f64 };
        EpochSummary {
            loss: mean(self.loss, self.batches),
            accuracy: 100.0 * mean(self.correct as f64, self.samples),
            batches: self.batches,
            samples: self.samples,
            interrupted,
        }
    }
}

/// Forward pass plus cross-entropy on one batch.
pub fn forward_classification<B: Backend, M: ImageClassifier<B>>(
    model: &M,
    batch: CifarBatch<B>,
) -> ClassificationOutput<B> {
    let output = model.forward(batch.images);
    let loss = CrossEntropyLossConfig::new()
        .init(&output.device())
        .forward(output.clone(), batch.targets.clone());

    ClassificationOutput::new(loss, output, batch.targets)
}

/// One optimisation pass. Stops between batches once `should_stop` says so.
pub fn train_epoch<B, M, O, I>(
    mut model: M,
    optimizer: &mut O,
    batches: I,
    lr: f64,
    should_stop: impl Fn() -> bool,
) -> (M, EpochSummary)
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ImageClassifier<B>,
    O: Optimizer<M, B>,
    I: IntoIterator<Item = CifarBatch<B>>,
{
    let mut acc = Accumulator::default();

    for batch in batches {
        if should_stop() {
            return (model, acc.finish(true));
        }

        let item = forward_classification(&model, batch);
        acc.record(&item);

        let grads = GradientsParams::from_grads(item.loss.backward(), &model);
        model = optimizer.step(lr, model, grads);
    }

    (model, acc.finish(false))
}

/// Loss and accuracy of an inference model.
pub fn evaluate<B, M, I>(model: &M, batches: I) -> EpochSummary
where
    B: Backend,
    M: ImageClassifier<B>,
    I: IntoIterator<Item = CifarBatch<B>>,
{
    let mut acc = Accumulator::default();
    for batch in batches {
        acc.record(&forward_classification(model, batch));
    }
    acc.finish(false)
}

/// Model, optimizer and schedule of a classification run, with the best test
/// accuracy seen so far.
pub struct ClassificationRun<M, O> {
    pub model: M,
    pub optimizer: O,
    pub scheduler: MultiStepLr,
    /// Next epoch to run.
    pub epoch: usize,
    pub best_accuracy: f64,
}

impl<M, O> ClassificationRun<M, O> {
    pub fn new(model: M, optimizer: O, scheduler: MultiStepLr) -> Self {
        Self {
            model,
            optimizer,
            scheduler,
            epoch: 0,
            best_accuracy: 0.0,
        }
    }

    /// Continues the run stored in a checkpoint directory.
    pub fn resume<B>(dir: &Path, model: M, optimizer: O, device: &B::Device) -> crate::error::Result<Self>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + ImageClassifier<B>,
        O: Optimizer<M, B>,
    {
        let (mut model, optimizer, state) = checkpoint::load_checkpoint(dir, model, optimizer, device)?;
        if let Some(quaternion_state) = &state.quaternion_state {
            model.restore_quaternion_state(quaternion_state);
        }
        log::info!("resuming from {} after epoch {}", dir.display(), state.epoch);

        Ok(Self {
            model,
            optimizer,
            scheduler: state.scheduler,
            // An interrupt checkpoint holds a partially trained epoch; rerun it.
            epoch: if state.interrupt_save { state.epoch } else { state.epoch + 1 },
            best_accuracy: state.accuracy.unwrap_or(0.0),
        })
    }

    pub fn save<B>(&self, dir: &Path, epoch: usize, interrupt_save: bool) -> crate::error::Result<PathBuf>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + ImageClassifier<B>,
        O: Optimizer<M, B>,
    {
        let mut state = CheckpointState::new(epoch, self.scheduler.clone());
        state.accuracy = Some(self.best_accuracy);
        state.quaternion_state = self.model.quaternion_state();
        state.interrupt_save = interrupt_save;
        checkpoint::save_checkpoint(dir, &self.model, &self.optimizer, &state)
    }

    /// Runs the remaining epochs. Returns early, with the run intact, when the
    /// session's interrupt flag is raised.
    pub fn fit<B, T, TI, V, VI>(
        mut self,
        config: &ClassificationConfig,
        train: T,
        test: V,
        metrics: &mut MetricsLogger,
        session: &mut TrainingSession,
    ) -> crate::error::Result<(Self, bool)>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + ImageClassifier<B>,
        M::InnerModule: ImageClassifier<B::InnerBackend>,
        O: Optimizer<M, B>,
        T: Fn() -> TI,
        TI: IntoIterator<Item = CifarBatch<B>>,
        V: Fn() -> VI,
        VI: IntoIterator<Item = CifarBatch<B::InnerBackend>>,
    {
        config.validate()?;
        let epochs = session.progress_bar(config.num_epochs as u64, "Training Progress");
        epochs.set_position(self.epoch as u64);
        let interrupt = session.interrupt().clone();

        while self.epoch < config.num_epochs {
            let epoch = self.epoch;
            let lr = self.scheduler.lr();

            let (model, train_summary) =
                train_epoch(self.model, &mut self.optimizer, train(), lr, || interrupt.is_raised());
            self.model = model;
            if train_summary.interrupted {
                log::warn!("epoch {epoch} interrupted after {} batches", train_summary.batches);
                return Ok((self, true));
            }

            let test_summary = evaluate(&self.model.valid(), test());

            if self.scheduler.step() {
                log::info!("learning rate dropped to {}", self.scheduler.lr());
                self.model.on_learning_rate_drop();
            }

            epochs.inc(1);
            epochs.set_message(format!(
                "Train Acc: {:.2}% Test Acc: {:.2}% LR: {:.6}",
                train_summary.accuracy,
                test_summary.accuracy,
                self.scheduler.lr()
            ));
            log::info!(
                "epoch {epoch}: train loss {:.4} acc {:.2}%, test loss {:.4} acc {:.2}%",
                train_summary.loss,
                train_summary.accuracy,
                test_summary.loss,
                test_summary.accuracy
            );

            let values = [
                ("train_acc", train_summary.accuracy),
                ("test_acc", test_summary.accuracy),
                ("train_loss", train_summary.loss),
                ("test_loss", test_summary.loss),
            ];
            metrics.update(&values);
            if let Some(log) = session.text_log() {
                log.write_epoch(epoch, &values)?;
            }
            if (epoch + 1) % config.metrics_every == 0 {
                metrics.save(METRICS_FILE)?;
            }

            if test_summary.accuracy > self.best_accuracy {
                self.best_accuracy = test_summary.accuracy;
                log::info!("saving model (acc: {:.2}%)", self.best_accuracy);
                self.save::<B>(&session.dir().join(BEST_DIR), epoch, false)?;
            }
            if epoch % config.checkpoint_every == 0 {
                self.save::<B>(&session.dir().join(checkpoint::epoch_dir(epoch)), epoch, false)?;
            }

            self.epoch += 1;
        }

        epochs.finish();
        metrics.save(METRICS_FILE)?;
        log::info!("best test accuracy: {:.2}%", self.best_accuracy);
        Ok((self, false))
    }
}
