//! Image classifiers: a plain ResNet34 baseline and three quaternion networks.

pub mod qcifar;
pub mod qdensenet;
pub mod qresnet;
pub mod resnet;

use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::quaternion::QuaternionMapping;

pub use qcifar::{QuaternionCifarNet, QuaternionCifarNetConfig};
pub use qdensenet::{QuaternionDenseNet, QuaternionDenseNetConfig};
pub use qresnet::{DropoutSchedule, QResNet34, QResNet34Config};
pub use resnet::{ResNet34, ResNet34Config};

/// Mutable training-time state a quaternion model wants persisted next to its
/// weights (written as `quaternion_state` in `state.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuaternionState {
    /// Current dropout rates, stages first and classifier last.
    pub dropout_rates: Vec<f64>,
}

/// Common surface of every classifier the training loop drives.
pub trait ImageClassifier<B: Backend> {
    /// # Shapes
    ///   - Images `[batch, 3, height, width]`
    ///   - Output `[batch, num_classes]`
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    fn num_classes(&self) -> usize;

    /// Hook run by the training policy after the learning rate has dropped.
    fn on_learning_rate_drop(&mut self) {}

    fn quaternion_state(&self) -> Option<QuaternionState> {
        None
    }

    fn restore_quaternion_state(&mut self, _state: &QuaternionState) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    ResNet34,
    QResNet34,
    QuaternionDenseNet,
    QuaternionCifarNet,
}

impl Architecture {
    pub const ALL: [Architecture; 4] = [
        Self::ResNet34,
        Self::QResNet34,
        Self::QuaternionDenseNet,
        Self::QuaternionCifarNet,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ResNet34 => "resnet34",
            Self::QResNet34 => "qresnet34",
            Self::QuaternionDenseNet => "qdensenet",
            Self::QuaternionCifarNet => "qcifar",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|arch| arch.name() == s)
            .ok_or_else(|| {
                format!("unknown architecture '{s}' (expected resnet34, qresnet34, qdensenet or qcifar)")
            })
    }
}

/// Run-level model selection; each architecture keeps its own defaults.
#[derive(Config, Debug)]
pub struct ModelConfig {
    pub architecture: Architecture,
    #[config(default = 10)]
    pub num_classes: usize,
    #[config(default = "QuaternionMapping::Poincare")]
    pub mapping: QuaternionMapping,
}

impl ModelConfig {
    pub fn resnet34(&self) -> ResNet34Config {
        ResNet34Config::new(self.num_classes)
    }

    pub fn qresnet34(&self) -> QResNet34Config {
        QResNet34Config::new(self.num_classes).with_mapping(self.mapping)
    }

    /// The dense network always lifts its input with the raw mapping.
    pub fn densenet(&self) -> QuaternionDenseNetConfig {
        QuaternionDenseNetConfig::new(self.num_classes)
    }

    pub fn cifar_net(&self) -> QuaternionCifarNetConfig {
        QuaternionCifarNetConfig::new(self.num_classes).with_mapping(self.mapping)
    }
}
