#![recursion_limit = "256"]

use std::path::PathBuf;

use anyhow::Context;
use burn::{
    backend::wgpu::WgpuDevice,
    data::{dataloader::DataLoaderBuilder, dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
};
use clap::Parser;
use qnet_rust::{
    QuaternionMapping,
    data::{Cifar10Dataset, CifarBatch, CifarBatcher, MultiAugmentDataset, cifar::CLASS_NAMES},
    device::{Backend, init_device},
    model::{Architecture, ImageClassifier, ModelConfig},
    training::{checkpoint::BEST_DIR, evaluate, load_model},
};

#[derive(Parser, Debug)]
#[command(about = "Evaluate a trained classifier on the CIFAR-10 test batch")]
struct Args {
    #[arg(long, default_value = "qresnet34")]
    architecture: Architecture,
    #[arg(long, default_value = "poincare")]
    mapping: QuaternionMapping,
    #[arg(long, default_value = "/tmp/qnet-training")]
    artifact_dir: PathBuf,
    #[arg(long, default_value = "data/cifar-10-batches-bin")]
    data_dir: PathBuf,
    #[arg(long, default_value_t = 256)]
    batch_size: usize,
    /// Test image whose prediction is printed
    #[arg(long, default_value_t = 42)]
    index: usize,
}

fn infer<M>(model: M, args: &Args, device: &WgpuDevice) -> anyhow::Result<()>
where
    M: Module<Backend> + ImageClassifier<Backend>,
{
    let checkpoint = args.artifact_dir.join(BEST_DIR);
    let model = load_model::<Backend, M>(&checkpoint, model, device)
        .with_context(|| format!("loading weights from {}", checkpoint.display()))?;

    let dataset = MultiAugmentDataset::eval(
        Cifar10Dataset::test(&args.data_dir).context("reading test batch")?,
    );

    if let Some(item) = dataset.get(args.index) {
        let label = item.label;
        let batch: CifarBatch<Backend> = CifarBatcher::default().batch(vec![item], device);
        let predicted = model
            .forward(batch.images)
            .argmax(1)
            .into_scalar()
            .elem::<i64>() as usize;
        println!(
            "image {}: predicted {} (label {})",
            args.index, CLASS_NAMES[predicted], CLASS_NAMES[label]
        );
    }

    let loader = DataLoaderBuilder::new(CifarBatcher::default())
        .batch_size(args.batch_size)
        .build(dataset);
    let summary = evaluate(&model, loader.iter());
    println!(
        "test loss {:.4}, accuracy {:.2}% over {} images",
        summary.loss, summary.accuracy, summary.samples
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let device = init_device();
    let config = ModelConfig::new(args.architecture).with_mapping(args.mapping);

    match args.architecture {
        Architecture::ResNet34 => infer(config.resnet34().init(&device), &args, &device),
        Architecture::QResNet34 => infer(config.qresnet34().init(&device), &args, &device),
        Architecture::QuaternionDenseNet => infer(config.densenet().init(&device), &args, &device),
        Architecture::QuaternionCifarNet => infer(config.cifar_net().init(&device), &args, &device),
    }
}
