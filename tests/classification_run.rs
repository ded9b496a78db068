use std::cell::Cell;
use std::path::Path;

use burn::{
    optim::Optimizer,
    tensor::{Distribution, Int, Tensor, backend::Backend},
};
use qnet_rust::{
    data::CifarBatch,
    device::{CpuAutodiffBackend, CpuBackend, cpu_device},
    model::{QResNet34, QResNet34Config},
    training::{
        ClassificationConfig, ClassificationRun, InterruptFlag, MetricsLogger, TrainingSession,
        checkpoint,
    },
};

type Model = QResNet34<CpuAutodiffBackend>;

fn sgd() -> impl Optimizer<Model, CpuAutodiffBackend> {
    ClassificationConfig::new()
        .optimizer()
        .init::<CpuAutodiffBackend, Model>()
}

fn tiny_model(num_classes: usize) -> Model {
    QResNet34Config::new(num_classes)
        .with_widths([4, 4, 4, 8, 8])
        .with_blocks([1, 1, 1, 1])
        .with_hidden_features(8)
        .init(&cpu_device())
}

fn batch<B: Backend>(labels: [i32; 2], device: &B::Device) -> CifarBatch<B> {
    CifarBatch {
        images: Tensor::random([2, 3, 32, 32], Distribution::Normal(0.0, 1.0), device),
        targets: Tensor::<B, 1, Int>::from_ints(labels, device),
    }
}

fn train_batches(labels: [i32; 2]) -> Vec<CifarBatch<CpuAutodiffBackend>> {
    vec![batch(labels, &cpu_device())]
}

fn test_batches(labels: [i32; 2]) -> Vec<CifarBatch<CpuBackend>> {
    vec![batch(labels, &cpu_device())]
}

fn session(dir: &Path) -> (TrainingSession, MetricsLogger) {
    (
        TrainingSession::new(dir, InterruptFlag::new()).unwrap(),
        MetricsLogger::new(dir).unwrap(),
    )
}

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-9, "{actual:?} != {expected:?}");
    }
}

#[test]
fn periodic_checkpoints_every_tenth_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, mut metrics) = session(dir.path());
    let config = ClassificationConfig::new().with_num_epochs(11);
    let run = ClassificationRun::new(tiny_model(10), sgd(), config.scheduler());

    let (run, interrupted) = run
        .fit(
            &config,
            || train_batches([3, 7]),
            || test_batches([3, 7]),
            &mut metrics,
            &mut session,
        )
        .unwrap();

    assert!(!interrupted);
    assert_eq!(run.epoch, 11);
    for epoch in [0, 10] {
        let target = dir.path().join(checkpoint::epoch_dir(epoch));
        assert!(target.join(checkpoint::MODEL_FILE).is_file());
        assert!(target.join(checkpoint::OPTIMIZER_FILE).is_file());
        assert_eq!(checkpoint::load_state(&target).unwrap().epoch, epoch);
    }
    for epoch in [1, 5, 9] {
        assert!(!dir.path().join(checkpoint::epoch_dir(epoch)).exists());
    }
    let state = checkpoint::load_state(&dir.path().join(checkpoint::epoch_dir(10))).unwrap();
    assert_eq!(state.scheduler.last_epoch(), 11);
}

#[test]
fn best_model_is_written_only_on_improvement() {
    // A single class makes every prediction correct: 100% from the first epoch
    let dir = tempfile::tempdir().unwrap();
    let (mut session, mut metrics) = session(dir.path());
    let config = ClassificationConfig::new().with_num_epochs(3);
    let run = ClassificationRun::new(tiny_model(1), sgd(), config.scheduler());

    let (run, _) = run
        .fit(
            &config,
            || train_batches([0, 0]),
            || test_batches([0, 0]),
            &mut metrics,
            &mut session,
        )
        .unwrap();

    assert_eq!(run.best_accuracy, 100.0);
    let best = checkpoint::load_state(&dir.path().join(checkpoint::BEST_DIR)).unwrap();
    assert_eq!(best.epoch, 0);
    assert_eq!(best.accuracy, Some(100.0));
}

#[test]
fn no_best_model_without_improvement() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, mut metrics) = session(dir.path());
    let config = ClassificationConfig::new().with_num_epochs(2);
    let mut run = ClassificationRun::new(tiny_model(1), sgd(), config.scheduler());
    run.best_accuracy = 100.0;

    run.fit(
        &config,
        || train_batches([0, 0]),
        || test_batches([0, 0]),
        &mut metrics,
        &mut session,
    )
    .unwrap();

    assert!(!dir.path().join(checkpoint::BEST_DIR).exists());
}

#[test]
fn learning_rate_drops_raise_dropout_rates() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, mut metrics) = session(dir.path());
    let config = ClassificationConfig::new()
        .with_num_epochs(3)
        .with_milestones(vec![1, 2]);
    let model = tiny_model(10);
    let initial = model.dropout_rates();
    let run = ClassificationRun::new(model, sgd(), config.scheduler());

    let (run, _) = run
        .fit(
            &config,
            || train_batches([3, 7]),
            || test_batches([3, 7]),
            &mut metrics,
            &mut session,
        )
        .unwrap();

    let expected: Vec<f64> = initial.iter().map(|rate| rate + 0.10).collect();
    assert_close(&run.model.dropout_rates(), &expected);
    assert_close(&run.model.installed_dropout_rates(), &expected);
    assert!((run.scheduler.lr() - 0.001).abs() < 1e-12);
}

#[test]
fn repeated_drops_clamp_dropout_at_half() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, mut metrics) = session(dir.path());
    let config = ClassificationConfig::new()
        .with_num_epochs(9)
        .with_milestones((1..=8).collect());
    let run = ClassificationRun::new(tiny_model(10), sgd(), config.scheduler());

    let (run, _) = run
        .fit(
            &config,
            || train_batches([3, 7]),
            || test_batches([3, 7]),
            &mut metrics,
            &mut session,
        )
        .unwrap();

    assert_close(&run.model.dropout_rates(), &[0.5; 5]);
    assert_close(&run.model.installed_dropout_rates(), &[0.5; 5]);
}

#[test]
fn metrics_are_saved_on_their_cadence() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, mut metrics) = session(dir.path());
    let config = ClassificationConfig::new()
        .with_num_epochs(10)
        .with_metrics_every(2);
    let run = ClassificationRun::new(tiny_model(10), sgd(), config.scheduler());

    // The fourth training pass stops at once; no end-of-run save happens
    let interrupt = session.interrupt().clone();
    let calls = Cell::new(0);
    let train = || {
        calls.set(calls.get() + 1);
        if calls.get() == 4 {
            interrupt.raise();
        }
        train_batches([3, 7])
    };

    let (run, interrupted) = run
        .fit(&config, train, || test_batches([3, 7]), &mut metrics, &mut session)
        .unwrap();

    assert!(interrupted);
    assert_eq!(run.epoch, 3);
    assert_eq!(metrics.history("train_acc").unwrap().len(), 3);

    let mut saved = MetricsLogger::new(dir.path()).unwrap();
    saved.load("metrics.json").unwrap();
    assert_eq!(saved.history("train_acc").unwrap().len(), 2);
    assert_eq!(saved.history("test_loss").unwrap().len(), 2);
}

#[test]
fn zero_checkpoint_cadence_fails_before_training() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, mut metrics) = session(dir.path());
    let config = ClassificationConfig::new().with_checkpoint_every(0);
    let run = ClassificationRun::new(tiny_model(10), sgd(), config.scheduler());

    let result = run.fit(
        &config,
        || train_batches([3, 7]),
        || test_batches([3, 7]),
        &mut metrics,
        &mut session,
    );

    assert!(matches!(result, Err(qnet_rust::Error::Config(_))));
    assert!(!dir.path().join(checkpoint::epoch_dir(0)).exists());
}
