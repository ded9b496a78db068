use burn::{
    backend::Autodiff,
    module::AutodiffModule,
    tensor::{Distribution, Tensor},
};
use qnet_rust::{
    QuaternionMapping,
    device::{CpuBackend, cpu_device},
    model::{
        ImageClassifier, QResNet34Config, QuaternionCifarNetConfig, QuaternionDenseNetConfig,
        ResNet34Config,
    },
};

type TestBackend = CpuBackend;

fn images(batch: usize) -> Tensor<TestBackend, 4> {
    Tensor::random([batch, 3, 32, 32], Distribution::Normal(0.0, 1.0), &cpu_device())
}

fn assert_finite_logits<M: ImageClassifier<TestBackend>>(model: &M, batch: usize) {
    let logits = model.forward(images(batch));

    assert_eq!(logits.dims(), [batch, model.num_classes()]);
    let values = logits.into_data().to_vec::<f32>().unwrap();
    assert!(values.iter().all(|v| v.is_finite()), "non-finite logits: {values:?}");
}

#[test]
fn resnet34_produces_finite_logits() {
    let model = ResNet34Config::new(10)
        .with_widths([4, 8, 8, 16])
        .with_blocks([1, 1, 1, 1])
        .init::<TestBackend>(&cpu_device());

    assert_finite_logits(&model, 2);
}

#[test]
fn qresnet34_produces_finite_logits_for_every_mapping() {
    for mapping in [
        QuaternionMapping::RawNormalized,
        QuaternionMapping::Luminance,
        QuaternionMapping::Poincare,
    ] {
        let model = QResNet34Config::new(10)
            .with_mapping(mapping)
            .with_widths([4, 4, 4, 8, 8])
            .with_blocks([1, 1, 1, 1])
            .with_hidden_features(8)
            .init::<TestBackend>(&cpu_device());

        assert_finite_logits(&model, 2);
    }
}

#[test]
fn densenet_produces_finite_logits() {
    let model = QuaternionDenseNetConfig::new(10)
        .with_depth(10)
        .with_growth_rate(2)
        .with_bottleneck(false)
        .init::<TestBackend>(&cpu_device());

    assert_finite_logits(&model, 2);
}

#[test]
fn bottleneck_densenet_produces_finite_logits() {
    let config = QuaternionDenseNetConfig::new(10).with_depth(10).with_growth_rate(2);
    assert!(config.bottleneck);
    assert_eq!(config.layers_per_block(), 1);

    let model = config.init::<TestBackend>(&cpu_device());

    assert_finite_logits(&model, 2);
}

#[test]
fn cifar_net_produces_finite_logits() {
    let model = QuaternionCifarNetConfig::new(10)
        .with_base_width(2)
        .with_hidden_features(8)
        .init::<TestBackend>(&cpu_device());

    assert_finite_logits(&model, 3);
}

#[test]
fn training_forward_also_has_the_right_shape() {
    // Dropout and batch statistics are active under autodiff
    let model = QResNet34Config::new(4)
        .with_widths([4, 4, 4, 8, 8])
        .with_blocks([1, 1, 1, 1])
        .with_hidden_features(8)
        .init::<Autodiff<TestBackend>>(&cpu_device());
    let input = Tensor::random([2, 3, 32, 32], Distribution::Normal(0.0, 1.0), &cpu_device());

    let logits = model.forward(input);

    assert_eq!(logits.dims(), [2, 4]);
    let valid = model.valid();
    assert_eq!(valid.forward(images(2)).dims(), [2, 4]);
}
