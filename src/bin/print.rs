use burn::prelude::*;
use qnet_rust::{
    device::{CpuBackend, cpu_device},
    model::{Architecture, ModelConfig},
};

fn describe<B: Backend, M: Module<B> + std::fmt::Display>(arch: Architecture, model: M) {
    println!("{model}");
    println!("{arch}: {} parameters\n", model.num_params());
}

fn main() {
    let device = cpu_device();

    for arch in Architecture::ALL {
        let config = ModelConfig::new(arch);
        match arch {
            Architecture::ResNet34 => {
                describe::<CpuBackend, _>(arch, config.resnet34().init(&device))
            }
            Architecture::QResNet34 => {
                describe::<CpuBackend, _>(arch, config.qresnet34().init(&device))
            }
            Architecture::QuaternionDenseNet => {
                describe::<CpuBackend, _>(arch, config.densenet().init(&device))
            }
            Architecture::QuaternionCifarNet => {
                describe::<CpuBackend, _>(arch, config.cifar_net().init(&device))
            }
        }
    }
}
