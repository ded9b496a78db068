use burn::{
    module::Ignored,
    nn::{Dropout, DropoutConfig},
    prelude::*,
    tensor::activation::relu,
};

use super::ImageClassifier;
use crate::quaternion::{
    QConv2d, QConv2dConfig, QLinear, QLinearConfig, QuaternionBatchNorm,
    QuaternionBatchNormConfig, QuaternionDropout, QuaternionMapping, QuaternionMaxPool,
    flatten_field, lift_rgb, real_part, split_relu,
};

/// Two 3x3 convs; the first may downsample. The two narrow blocks skip the
/// second norm.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv1: QConv2d<B>,
    norm1: QuaternionBatchNorm<B>,
    conv2: QConv2d<B>,
    norm2: Option<QuaternionBatchNorm<B>>,
}

impl<B: Backend> ConvBlock<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        second_norm: bool,
        device: &B::Device,
    ) -> Self {
        Self {
            conv1: QConv2dConfig::new([in_channels, out_channels], 3)
                .with_stride(stride)
                .with_padding(1)
                .init(device),
            norm1: QuaternionBatchNormConfig::new(out_channels).init(device),
            conv2: QConv2dConfig::new([out_channels, out_channels], 3)
                .with_padding(1)
                .init(device),
            norm2: second_norm.then(|| QuaternionBatchNormConfig::new(out_channels).init(device)),
        }
    }

    fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = split_relu(self.norm1.forward(self.conv1.forward(x)));
        let mut x = self.conv2.forward(x);
        if let Some(norm) = &self.norm2 {
            x = norm.forward(x);
        }
        split_relu(x)
    }
}

#[derive(Config, Debug)]
pub struct QuaternionCifarNetConfig {
    pub num_classes: usize,
    #[config(default = "QuaternionMapping::Luminance")]
    pub mapping: QuaternionMapping,
    /// Width of the stem and first block; later blocks double it.
    #[config(default = 32)]
    pub base_width: usize,
    #[config(default = 512)]
    pub hidden_features: usize,
}

impl QuaternionCifarNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> QuaternionCifarNet<B> {
        let base = self.base_width;
        let widths = [base, 2 * base, 4 * base, 8 * base];

        let mut in_channels = base;
        let blocks = widths
            .iter()
            .enumerate()
            .map(|(index, &width)| {
                let stride = if index == 0 { 1 } else { 2 };
                let block = ConvBlock::new(in_channels, width, stride, index >= 2, device);
                in_channels = width;
                block
            })
            .collect();

        QuaternionCifarNet {
            stem_conv: QConv2dConfig::new([1, base], 3)
                .with_padding(1)
                .init(device),
            stem_norm: QuaternionBatchNormConfig::new(base).init(device),
            blocks,
            pool: QuaternionMaxPool::new(2, 2, 1),
            dropout: QuaternionDropout::new(0.1),
            fc1: QLinearConfig::new(in_channels, self.hidden_features).init(device),
            head_dropout: DropoutConfig::new(0.3).init(),
            fc2: QLinearConfig::new(self.hidden_features, self.num_classes).init(device),
            mapping: Ignored(self.mapping),
            num_classes: self.num_classes,
        }
    }
}

/// Plain four-block quaternion CNN for 32x32 inputs.
///
/// Every block is followed by quaternion max-pooling (k=2, s=2, p=1) and
/// quaternion dropout, which brings a 32x32 input down to 1x1 before the head.
#[derive(Module, Debug)]
pub struct QuaternionCifarNet<B: Backend> {
    stem_conv: QConv2d<B>,
    stem_norm: QuaternionBatchNorm<B>,
    blocks: Vec<ConvBlock<B>>,
    pool: QuaternionMaxPool,
    dropout: QuaternionDropout,
    fc1: QLinear<B>,
    head_dropout: Dropout,
    fc2: QLinear<B>,
    mapping: Ignored<QuaternionMapping>,
    num_classes: usize,
}

impl<B: Backend> ImageClassifier<B> for QuaternionCifarNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = lift_rgb(images, self.mapping.0);
        let mut x = split_relu(self.stem_norm.forward(self.stem_conv.forward(x)));
        for block in &self.blocks {
            x = self.dropout.forward(self.pool.forward(block.forward(x)));
        }

        let x = relu(self.fc1.forward(flatten_field(x)));
        let x = self.head_dropout.forward(x);

        real_part(self.fc2.forward(x))
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CpuBackend, cpu_device};
    use burn::tensor::Distribution;

    #[test]
    fn only_wide_blocks_carry_a_second_norm() {
        let model = QuaternionCifarNetConfig::new(10)
            .with_base_width(2)
            .init::<CpuBackend>(&cpu_device());

        let second_norms: Vec<bool> = model.blocks.iter().map(|b| b.norm2.is_some()).collect();

        assert_eq!(second_norms, vec![false, false, true, true]);
    }

    #[test]
    fn spatial_size_collapses_to_one_before_the_head() {
        let device = cpu_device();
        let model = QuaternionCifarNetConfig::new(3)
            .with_base_width(2)
            .with_hidden_features(4)
            .init::<CpuBackend>(&device);
        let images = Tensor::<CpuBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device);

        // fc1 expects exactly 8 * base quaternions, so a wrong spatial size panics
        let logits = model.forward(images);

        assert_eq!(logits.dims(), [1, 3]);
    }
}
