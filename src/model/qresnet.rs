//! Quaternion ResNet34 with a dropout schedule that tightens after every
//! learning-rate drop.

use burn::{
    module::Ignored,
    nn::{Dropout, DropoutConfig},
    prelude::*,
    tensor::activation::silu,
};

use super::{ImageClassifier, QuaternionState};
use crate::quaternion::{
    QConv2d, QConv2dConfig, QLinear, QLinearConfig, QuaternionAdaptiveAvgPool,
    QuaternionBatchNorm, QuaternionBatchNormConfig, QuaternionDropout, QuaternionMapping,
    flatten_field, lift_rgb, real_part, split_silu,
};

/// Largest rate the schedule ever reaches.
pub const MAX_DROPOUT_RATE: f64 = 0.5;

/// Dropout rates for the four stages and the classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct DropoutSchedule {
    pub rates: [f64; 5],
    pub increment: f64,
}

impl Default for DropoutSchedule {
    fn default() -> Self {
        Self {
            rates: [0.10, 0.15, 0.20, 0.20, 0.25],
            increment: 0.05,
        }
    }
}

impl DropoutSchedule {
    pub fn advance(&mut self) {
        for rate in &mut self.rates {
            *rate = (*rate + self.increment).min(MAX_DROPOUT_RATE);
        }
    }

    pub fn stage_rate(&self, stage: usize) -> f64 {
        self.rates[stage]
    }

    pub fn classifier_rate(&self) -> f64 {
        self.rates[4]
    }
}

#[derive(Module, Debug)]
pub struct QBasicBlock<B: Backend> {
    conv1: QConv2d<B>,
    norm1: QuaternionBatchNorm<B>,
    conv2: QConv2d<B>,
    norm2: QuaternionBatchNorm<B>,
    shortcut: Option<QConv2d<B>>,
}

impl<B: Backend> QBasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let shortcut = (stride != 1 || in_channels != out_channels).then(|| {
            QConv2dConfig::new([in_channels, out_channels], 1)
                .with_stride(stride)
                .init(device)
        });

        Self {
            conv1: QConv2dConfig::new([in_channels, out_channels], 3)
                .with_stride(stride)
                .with_padding(1)
                .init(device),
            norm1: QuaternionBatchNormConfig::new(out_channels).init(device),
            conv2: QConv2dConfig::new([out_channels, out_channels], 3)
                .with_padding(1)
                .init(device),
            norm2: QuaternionBatchNormConfig::new(out_channels).init(device),
            shortcut,
        }
    }

    /// The activation sits before the second norm and nothing follows the
    /// residual sum.
    fn forward(&self, x: Tensor<B, 5>, dropout: &QuaternionDropout) -> Tensor<B, 5> {
        let identity = match &self.shortcut {
            Some(projection) => projection.forward(x.clone()),
            None => x.clone(),
        };

        let out = split_silu(self.norm1.forward(self.conv1.forward(x)));
        let out = dropout.forward(out);
        let out = self.norm2.forward(split_silu(self.conv2.forward(out)));
        let out = dropout.forward(out);

        out + identity
    }
}

/// A stage owns its blocks and the dropout they all share, so a rate update
/// is a single write.
#[derive(Module, Debug)]
pub struct QResStage<B: Backend> {
    blocks: Vec<QBasicBlock<B>>,
    dropout: QuaternionDropout,
}

impl<B: Backend> QResStage<B> {
    fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        self.blocks
            .iter()
            .fold(x, |x, block| block.forward(x, &self.dropout))
    }

    pub fn dropout_rate(&self) -> f64 {
        self.dropout.prob
    }
}

#[derive(Config, Debug)]
pub struct QResNet34Config {
    pub num_classes: usize,
    #[config(default = "QuaternionMapping::RawNormalized")]
    pub mapping: QuaternionMapping,
    /// Stem width followed by the four stage widths.
    #[config(default = "[64, 64, 128, 256, 256]")]
    pub widths: [usize; 5],
    #[config(default = "[3, 4, 6, 3]")]
    pub blocks: [usize; 4],
    #[config(default = 512)]
    pub hidden_features: usize,
}

impl QResNet34Config {
    pub fn init<B: Backend>(&self, device: &B::Device) -> QResNet34<B> {
        let schedule = DropoutSchedule::default();
        let stem_width = self.widths[0];

        let mut in_channels = stem_width;
        let mut stages = Vec::with_capacity(4);
        for stage in 0..4 {
            let width = self.widths[stage + 1];
            let first_stride = if stage == 0 { 1 } else { 2 };
            let blocks = (0..self.blocks[stage])
                .map(|index| {
                    let stride = if index == 0 { first_stride } else { 1 };
                    let block = QBasicBlock::new(in_channels, width, stride, device);
                    in_channels = width;
                    block
                })
                .collect();
            stages.push(QResStage {
                blocks,
                dropout: QuaternionDropout::new(schedule.stage_rate(stage)),
            });
        }

        QResNet34 {
            stem_conv: QConv2dConfig::new([1, stem_width], 3)
                .with_padding(1)
                .init(device),
            stem_norm: QuaternionBatchNormConfig::new(stem_width).init(device),
            stages,
            pool: QuaternionAdaptiveAvgPool::global(),
            fc1: QLinearConfig::new(in_channels, self.hidden_features).init(device),
            head_dropout: DropoutConfig::new(0.3).init(),
            fc2: QLinearConfig::new(self.hidden_features, self.num_classes).init(device),
            mapping: Ignored(self.mapping),
            schedule: Ignored(schedule),
            num_classes: self.num_classes,
        }
    }
}

#[derive(Module, Debug)]
pub struct QResNet34<B: Backend> {
    stem_conv: QConv2d<B>,
    stem_norm: QuaternionBatchNorm<B>,
    stages: Vec<QResStage<B>>,
    pool: QuaternionAdaptiveAvgPool,
    fc1: QLinear<B>,
    head_dropout: Dropout,
    fc2: QLinear<B>,
    mapping: Ignored<QuaternionMapping>,
    schedule: Ignored<DropoutSchedule>,
    num_classes: usize,
}

impl<B: Backend> QResNet34<B> {
    pub fn dropout_rates(&self) -> [f64; 5] {
        self.schedule.0.rates
    }

    /// Rates actually installed in the stage and classifier dropouts.
    pub fn installed_dropout_rates(&self) -> Vec<f64> {
        self.stages
            .iter()
            .map(QResStage::dropout_rate)
            .chain(std::iter::once(self.head_dropout.prob))
            .collect()
    }

    /// Raises every rate by the increment (capped at 0.5) and installs the
    /// new rates.
    pub fn update_dropout_rates(&mut self) {
        self.schedule.0.advance();
        self.install_rates();
        log::info!("dropout rates raised to {:?}", self.schedule.0.rates);
    }

    fn install_rates(&mut self) {
        let schedule = &self.schedule.0;
        for (index, stage) in self.stages.iter_mut().enumerate() {
            stage.dropout.set_prob(schedule.stage_rate(index));
        }
        self.head_dropout.prob = schedule.classifier_rate();
    }
}

impl<B: Backend> ImageClassifier<B> for QResNet34<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = lift_rgb(images, self.mapping.0);
        let x = split_silu(self.stem_norm.forward(self.stem_conv.forward(x)));
        let x = self.stages.iter().fold(x, |x, stage| stage.forward(x));

        let x = flatten_field(self.pool.forward(x));
        let x = silu(self.fc1.forward(x));
        let x = self.head_dropout.forward(x);

        real_part(self.fc2.forward(x))
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn on_learning_rate_drop(&mut self) {
        self.update_dropout_rates();
    }

    fn quaternion_state(&self) -> Option<QuaternionState> {
        Some(QuaternionState {
            dropout_rates: self.schedule.0.rates.to_vec(),
        })
    }

    fn restore_quaternion_state(&mut self, state: &QuaternionState) {
        let Ok(rates) = <[f64; 5]>::try_from(state.dropout_rates.as_slice()) else {
            log::warn!(
                "ignoring quaternion state with {} dropout rates",
                state.dropout_rates.len()
            );
            return;
        };
        self.schedule.0.rates = rates;
        self.install_rates();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CpuBackend, cpu_device};

    fn tiny() -> QResNet34<CpuBackend> {
        QResNet34Config::new(10)
            .with_widths([4, 4, 8, 8, 8])
            .with_blocks([1, 2, 1, 1])
            .with_hidden_features(8)
            .init(&cpu_device())
    }

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn fresh_model_installs_initial_rates() {
        let model = tiny();
        assert_close(
            &model.installed_dropout_rates(),
            &[0.10, 0.15, 0.20, 0.20, 0.3],
        );
        assert_close(&model.dropout_rates(), &[0.10, 0.15, 0.20, 0.20, 0.25]);
    }

    #[test]
    fn update_raises_rates_and_reaches_blocks() {
        let mut model = tiny();

        model.update_dropout_rates();

        let expected = [0.15, 0.20, 0.25, 0.25, 0.30];
        assert_close(&model.dropout_rates(), &expected);
        assert_close(&model.installed_dropout_rates(), &expected);
    }

    #[test]
    fn repeated_updates_saturate_at_half() {
        let mut model = tiny();

        for _ in 0..20 {
            model.update_dropout_rates();
            assert!(model.dropout_rates().iter().all(|&rate| rate <= MAX_DROPOUT_RATE));
        }

        assert_close(&model.installed_dropout_rates(), &[0.5; 5]);
    }

    #[test]
    fn quaternion_state_round_trips_rates() {
        let mut source = tiny();
        source.update_dropout_rates();
        let state = source.quaternion_state().unwrap();

        let mut restored = tiny();
        restored.restore_quaternion_state(&state);

        assert_close(&restored.dropout_rates(), &source.dropout_rates());
        assert_close(
            &restored.installed_dropout_rates(),
            &source.installed_dropout_rates(),
        );
    }
}
