#![recursion_limit = "256"]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use burn::{
    backend::wgpu::WgpuDevice,
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    prelude::*,
};
use clap::Parser;
use qnet_rust::{
    Error,
    QuaternionMapping,
    data::{Cifar10Dataset, CifarBatch, CifarBatcher, MultiAugmentDataset},
    device::{AutodiffBackend, Backend as InnerBackend, init_device},
    model::{Architecture, ImageClassifier, ModelConfig},
    training::{
        ClassificationConfig, ClassificationRun, InterruptFlag, MetricsLogger, TrainingSession,
    },
};

#[derive(Parser, Debug)]
#[command(about = "Train a quaternion classifier on CIFAR-10")]
struct Args {
    #[arg(long, default_value_t = 300)]
    epochs: usize,
    #[arg(long, default_value_t = 128)]
    batch_size: usize,
    /// resnet34, qresnet34, qdensenet or qcifar
    #[arg(long, default_value = "qresnet34")]
    architecture: Architecture,
    /// raw, luminance or poincare
    #[arg(long, default_value = "poincare")]
    mapping: QuaternionMapping,
    #[arg(long, default_value_t = 1)]
    augmentations: usize,
    /// Directory holding `data_batch_{1..5}.bin` and `test_batch.bin`
    #[arg(long, default_value = "data/cifar-10-batches-bin")]
    data_dir: PathBuf,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value_t = 4)]
    num_workers: usize,
    #[arg(long, default_value = "/tmp/qnet-training")]
    artifact_dir: PathBuf,
    /// Checkpoint directory to continue from
    #[arg(long)]
    resume: Option<PathBuf>,
}

#[derive(Config)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub training: ClassificationConfig,
    #[config(default = 128)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 1)]
    pub augmentations_per_image: usize,
}

type TrainLoader = Arc<dyn DataLoader<AutodiffBackend, CifarBatch<AutodiffBackend>>>;
type TestLoader = Arc<dyn DataLoader<InnerBackend, CifarBatch<InnerBackend>>>;

fn create_artifact_dir(artifact_dir: &Path, resuming: bool) -> anyhow::Result<()> {
    // A fresh run starts from an empty directory
    if !resuming {
        std::fs::remove_dir_all(artifact_dir).ok();
    }
    std::fs::create_dir_all(artifact_dir)
        .with_context(|| format!("creating {}", artifact_dir.display()))
}

fn data_loaders(config: &TrainingConfig, data_dir: &Path) -> anyhow::Result<(TrainLoader, TestLoader)> {
    log::info!("loading CIFAR-10 from {}", data_dir.display());
    let train = Cifar10Dataset::train(data_dir).context("reading training batches")?;
    let test = Cifar10Dataset::test(data_dir).context("reading test batch")?;

    let train_loader: TrainLoader = DataLoaderBuilder::new(CifarBatcher::default())
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(MultiAugmentDataset::train(
            train,
            config.augmentations_per_image,
            config.seed,
        ));
    let test_loader: TestLoader = DataLoaderBuilder::new(CifarBatcher::default())
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(MultiAugmentDataset::eval(test));

    Ok((train_loader, test_loader))
}

fn run<M>(
    model: M,
    config: &TrainingConfig,
    args: &Args,
    device: &WgpuDevice,
) -> anyhow::Result<()>
where
    M: AutodiffModule<AutodiffBackend> + ImageClassifier<AutodiffBackend> + std::fmt::Display,
    M::InnerModule: ImageClassifier<InnerBackend>,
{
    log::info!("{model}");
    log::info!("total trainable parameters: {}", model.num_params());

    let (train_loader, test_loader) = data_loaders(config, &args.data_dir)?;
    let optimizer = config.training.optimizer().init::<AutodiffBackend, M>();

    let run = match &args.resume {
        Some(dir) => ClassificationRun::resume::<AutodiffBackend>(dir, model, optimizer, device)
            .with_context(|| format!("resuming from {}", dir.display()))?,
        None => ClassificationRun::new(model, optimizer, config.training.scheduler()),
    };

    let interrupt = InterruptFlag::new();
    interrupt.listen_for_ctrl_c()?;
    let mut session = TrainingSession::new(&args.artifact_dir, interrupt)?;
    session.open_logs()?;
    let mut metrics = MetricsLogger::new(&args.artifact_dir)?;

    log::info!("starting training");
    let (run, interrupted) = run.fit(
        &config.training,
        || train_loader.iter(),
        || test_loader.iter(),
        &mut metrics,
        &mut session,
    )?;

    if interrupted {
        log::warn!("training interrupted by user, cleaning up");
        let epoch = run.epoch;
        let report = session.shutdown(|dir| run.save::<AutodiffBackend>(dir, epoch, true));
        if !report.is_clean() {
            log::warn!("cleanup finished with errors");
        }
        log::warn!("{}", Error::Interrupted { epoch });
        return Ok(());
    }

    session.close()?;
    log::info!(
        "training complete, artifacts in {}",
        args.artifact_dir.display()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.augmentations == 0 {
        bail!("--augmentations must be at least 1");
    }
    create_artifact_dir(&args.artifact_dir, args.resume.is_some())?;

    let config = TrainingConfig::new(
        ModelConfig::new(args.architecture).with_mapping(args.mapping),
        ClassificationConfig::new().with_num_epochs(args.epochs),
    )
    .with_batch_size(args.batch_size)
    .with_num_workers(args.num_workers)
    .with_seed(args.seed)
    .with_augmentations_per_image(args.augmentations);
    config
        .save(args.artifact_dir.join("config.json"))
        .context("saving config.json")?;

    let device = init_device();
    AutodiffBackend::seed(config.seed);
    log::info!("training {} on {device:?}", config.model.architecture);

    let model_config = &config.model;
    match model_config.architecture {
        Architecture::ResNet34 => run(model_config.resnet34().init(&device), &config, &args, &device),
        Architecture::QResNet34 => run(model_config.qresnet34().init(&device), &config, &args, &device),
        Architecture::QuaternionDenseNet => {
            run(model_config.densenet().init(&device), &config, &args, &device)
        }
        Architecture::QuaternionCifarNet => {
            run(model_config.cifar_net().init(&device), &config, &args, &device)
        }
    }
}
