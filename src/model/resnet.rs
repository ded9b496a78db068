use burn::{
    nn::{
        BatchNorm, BatchNormConfig, Initializer, Linear, LinearConfig, PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
    },
    prelude::*,
    tensor::activation::relu,
};

use super::ImageClassifier;

/// Kaiming-normal, fan-out mode, ReLU gain.
fn kaiming_fan_out() -> Initializer {
    Initializer::KaimingNormal {
        gain: 2f64.sqrt(),
        fan_out_only: true,
    }
}

fn conv(in_channels: usize, out_channels: usize, kernel: usize, stride: usize) -> Conv2dConfig {
    Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(kernel / 2, kernel / 2))
        .with_bias(false)
        .with_initializer(kaiming_fan_out())
}

#[derive(Module, Debug)]
pub struct Projection<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    shortcut: Option<Projection<B>>,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let shortcut = (stride != 1 || in_channels != out_channels).then(|| Projection {
            conv: conv(in_channels, out_channels, 1, stride).init(device),
            norm: BatchNormConfig::new(out_channels).init(device),
        });

        Self {
            conv1: conv(in_channels, out_channels, 3, stride).init(device),
            norm1: BatchNormConfig::new(out_channels).init(device),
            conv2: conv(out_channels, out_channels, 3, 1).init(device),
            norm2: BatchNormConfig::new(out_channels).init(device),
            shortcut,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.shortcut {
            Some(projection) => projection.norm.forward(projection.conv.forward(x.clone())),
            None => x.clone(),
        };

        let out = relu(self.norm1.forward(self.conv1.forward(x)));
        let out = self.norm2.forward(self.conv2.forward(out));

        relu(out + identity)
    }
}

#[derive(Config, Debug)]
pub struct ResNet34Config {
    pub num_classes: usize,
    #[config(default = "[64, 128, 256, 512]")]
    pub widths: [usize; 4],
    #[config(default = "[3, 4, 6, 3]")]
    pub blocks: [usize; 4],
    /// 3x3 stride-1 stem for 32x32 inputs; otherwise 7x7 stride 2 plus max-pool.
    #[config(default = true)]
    pub small_input: bool,
}

impl ResNet34Config {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet34<B> {
        let stem_width = self.widths[0];
        let (stem_conv, stem_pool) = if self.small_input {
            (conv(3, stem_width, 3, 1).init(device), None)
        } else {
            let pool = MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init();
            (conv(3, stem_width, 7, 2).init(device), Some(pool))
        };

        let mut in_channels = stem_width;
        let mut layers = Vec::with_capacity(4);
        for (stage, (&width, &count)) in self.widths.iter().zip(&self.blocks).enumerate() {
            let stride = if stage == 0 { 1 } else { 2 };
            let mut blocks = Vec::with_capacity(count);
            for index in 0..count {
                let stride = if index == 0 { stride } else { 1 };
                blocks.push(BasicBlock::new(in_channels, width, stride, device));
                in_channels = width;
            }
            layers.push(blocks);
        }

        ResNet34 {
            stem_conv,
            stem_norm: BatchNormConfig::new(stem_width).init(device),
            stem_pool,
            layers,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(in_channels, self.num_classes).init(device),
            num_classes: self.num_classes,
        }
    }
}

/// Real-valued ResNet34 used as the baseline for the quaternion models.
#[derive(Module, Debug)]
pub struct ResNet34<B: Backend> {
    stem_conv: Conv2d<B>,
    stem_norm: BatchNorm<B, 2>,
    stem_pool: Option<MaxPool2d>,
    layers: Vec<Vec<BasicBlock<B>>>,
    pool: AdaptiveAvgPool2d,
    fc: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> ImageClassifier<B> for ResNet34<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = relu(self.stem_norm.forward(self.stem_conv.forward(images)));
        if let Some(pool) = &self.stem_pool {
            x = pool.forward(x);
        }
        for block in self.layers.iter().flatten() {
            x = block.forward(x);
        }

        let x = self.pool.forward(x);
        let [batch, channels, _, _] = x.dims();
        self.fc.forward(x.reshape([batch, channels]))
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
