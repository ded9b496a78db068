use burn::tensor::{Distribution, ElementConversion, Tensor};
use qnet_rust::{
    device::{Backend, init_device},
    model::{Architecture, ImageClassifier, ModelConfig},
    quaternion::{QConv2dConfig, QuaternionMapping, lift_rgb},
};

fn check<M: ImageClassifier<Backend>>(arch: Architecture, model: M, images: Tensor<Backend, 4>) {
    let logits = model.forward(images);
    let finite = logits.clone().abs().sum().into_scalar().elem::<f64>().is_finite();
    println!("{arch}: logits {:?}, finite: {finite}", logits.dims());
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let device = init_device();
    println!("WGPU device selected: {device:?}");

    let images = Tensor::<Backend, 4>::random([2, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device);

    // Lift the batch and run one quaternion convolution
    let field = lift_rgb(images.clone(), QuaternionMapping::Poincare);
    println!("quaternion field shape: {:?}", field.dims());
    let conv = QConv2dConfig::new([1, 8], 3).with_padding(1).init::<Backend>(&device);
    let features = conv.forward(field);
    println!("quaternion conv output: {:?} on {:?}", features.dims(), features.device());

    for arch in Architecture::ALL {
        let config = ModelConfig::new(arch);
        match arch {
            Architecture::ResNet34 => check(arch, config.resnet34().init(&device), images.clone()),
            Architecture::QResNet34 => check(arch, config.qresnet34().init(&device), images.clone()),
            Architecture::QuaternionDenseNet => {
                check(arch, config.densenet().init(&device), images.clone())
            }
            Architecture::QuaternionCifarNet => {
                check(arch, config.cifar_net().init(&device), images.clone())
            }
        }
    }
}
