use burn::prelude::*;

use super::ImageClassifier;
use crate::quaternion::{
    QConv2d, QConv2dConfig, QLinear, QLinearConfig, QuaternionAdaptiveAvgPool, QuaternionAvgPool,
    QuaternionBatchNorm, QuaternionBatchNormConfig, QuaternionDropout, QuaternionMapping,
    QuaternionPRelu, QuaternionPReluConfig, flatten_field, lift_rgb, real_part,
};

/// `QBN -> PReLU -> conv`, the unit every dense layer is made of.
#[derive(Module, Debug)]
pub struct NormActConv<B: Backend> {
    norm: QuaternionBatchNorm<B>,
    activation: QuaternionPRelu<B>,
    conv: QConv2d<B>,
}

impl<B: Backend> NormActConv<B> {
    fn new(in_channels: usize, out_channels: usize, kernel: usize, device: &B::Device) -> Self {
        Self {
            norm: QuaternionBatchNormConfig::new(in_channels).init(device),
            activation: QuaternionPReluConfig::new(in_channels).init(device),
            conv: QConv2dConfig::new([in_channels, out_channels], kernel)
                .with_padding(kernel / 2)
                .with_bias(false)
                .init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        self.conv
            .forward(self.activation.forward(self.norm.forward(x)))
    }
}

/// One dense layer; its output is concatenated onto its input.
///
/// With a bottleneck, a 1x1 conv to `4 * growth` channels precedes the 3x3 conv.
#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    bottleneck: Option<NormActConv<B>>,
    conv: NormActConv<B>,
    dropout: QuaternionDropout,
}

impl<B: Backend> DenseLayer<B> {
    fn new(
        in_channels: usize,
        growth_rate: usize,
        bottleneck: bool,
        drop_rate: f64,
        device: &B::Device,
    ) -> Self {
        let (bottleneck, conv) = if bottleneck {
            let inter = 4 * growth_rate;
            (
                Some(NormActConv::new(in_channels, inter, 1, device)),
                NormActConv::new(inter, growth_rate, 3, device),
            )
        } else {
            (None, NormActConv::new(in_channels, growth_rate, 3, device))
        };

        Self {
            bottleneck,
            conv,
            dropout: QuaternionDropout::new(drop_rate),
        }
    }

    fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let mut out = x.clone();
        if let Some(bottleneck) = &self.bottleneck {
            out = self.dropout.forward(bottleneck.forward(out));
        }
        let out = self.dropout.forward(self.conv.forward(out));

        Tensor::cat(vec![x, out], 1)
    }
}

/// 1x1 compression followed by 2x2 average pooling.
#[derive(Module, Debug)]
pub struct Transition<B: Backend> {
    conv: NormActConv<B>,
    dropout: QuaternionDropout,
    pool: QuaternionAvgPool,
}

impl<B: Backend> Transition<B> {
    fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        self.pool
            .forward(self.dropout.forward(self.conv.forward(x)))
    }
}

#[derive(Config, Debug)]
pub struct QuaternionDenseNetConfig {
    pub num_classes: usize,
    #[config(default = 40)]
    pub depth: usize,
    #[config(default = 12)]
    pub growth_rate: usize,
    #[config(default = 0.5)]
    pub reduction: f64,
    #[config(default = true)]
    pub bottleneck: bool,
    #[config(default = 0.0)]
    pub drop_rate: f64,
}

impl QuaternionDenseNetConfig {
    /// Layers per dense block.
    pub fn layers_per_block(&self) -> usize {
        let layers = self.depth.saturating_sub(4) / 3;
        if self.bottleneck { layers / 2 } else { layers }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> QuaternionDenseNet<B> {
        let layers = self.layers_per_block();
        let mut channels = 2 * self.growth_rate;
        let stem = QConv2dConfig::new([1, channels], 3)
            .with_padding(1)
            .with_bias(false)
            .init(device);

        let mut blocks = Vec::with_capacity(3);
        let mut transitions = Vec::with_capacity(2);
        for index in 0..3 {
            let block: Vec<_> = (0..layers)
                .map(|layer| {
                    DenseLayer::new(
                        channels + layer * self.growth_rate,
                        self.growth_rate,
                        self.bottleneck,
                        self.drop_rate,
                        device,
                    )
                })
                .collect();
            blocks.push(block);
            channels += layers * self.growth_rate;

            if index < 2 {
                let compressed = (channels as f64 * self.reduction).floor() as usize;
                transitions.push(Transition {
                    conv: NormActConv::new(channels, compressed, 1, device),
                    dropout: QuaternionDropout::new(self.drop_rate),
                    pool: QuaternionAvgPool::new(2, 2),
                });
                channels = compressed;
            }
        }

        QuaternionDenseNet {
            stem,
            blocks,
            transitions,
            norm: QuaternionBatchNormConfig::new(channels).init(device),
            activation: QuaternionPReluConfig::new(channels).init(device),
            pool: QuaternionAdaptiveAvgPool::global(),
            fc: QLinearConfig::new(channels, self.num_classes).init(device),
            num_classes: self.num_classes,
        }
    }
}

/// Quaternion DenseNet-BC; the stem always uses the raw normalized mapping.
#[derive(Module, Debug)]
pub struct QuaternionDenseNet<B: Backend> {
    stem: QConv2d<B>,
    blocks: Vec<Vec<DenseLayer<B>>>,
    transitions: Vec<Transition<B>>,
    norm: QuaternionBatchNorm<B>,
    activation: QuaternionPRelu<B>,
    pool: QuaternionAdaptiveAvgPool,
    fc: QLinear<B>,
    num_classes: usize,
}

impl<B: Backend> QuaternionDenseNet<B> {
    /// Quaternion channels reaching the classifier.
    pub fn features(&self) -> usize {
        self.activation.alpha.val().dims()[0]
    }
}

impl<B: Backend> ImageClassifier<B> for QuaternionDenseNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self
            .stem
            .forward(lift_rgb(images, QuaternionMapping::RawNormalized));
        for (index, block) in self.blocks.iter().enumerate() {
            x = block.iter().fold(x, |x, layer| layer.forward(x));
            if let Some(transition) = self.transitions.get(index) {
                x = transition.forward(x);
            }
        }

        let x = self.activation.forward(self.norm.forward(x));
        let x = flatten_field(self.pool.forward(x));

        real_part(self.fc.forward(x))
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CpuBackend, cpu_device};

    #[test]
    fn default_depth_gives_six_bottleneck_layers() {
        let config = QuaternionDenseNetConfig::new(10);
        assert_eq!(config.layers_per_block(), 6);
        assert_eq!(config.with_bottleneck(false).layers_per_block(), 12);
    }

    #[test]
    fn channel_bookkeeping_matches_densenet_bc() {
        // growth 12, depth 40: 24 -> 96 -> 48 -> 120 -> 60 -> 132
        let model = QuaternionDenseNetConfig::new(10).init::<CpuBackend>(&cpu_device());
        assert_eq!(model.features(), 132);
        assert_eq!(model.blocks.iter().map(Vec::len).collect::<Vec<_>>(), vec![6, 6, 6]);
    }

    #[test]
    fn basic_layers_skip_the_bottleneck() {
        let model = QuaternionDenseNetConfig::new(10)
            .with_depth(10)
            .with_growth_rate(2)
            .with_bottleneck(false)
            .init::<CpuBackend>(&cpu_device());

        assert!(model.blocks[0][0].bottleneck.is_none());
        // 4 -> 8 -> 4 -> 8 -> 4 -> 8
        assert_eq!(model.features(), 8);
    }
}
