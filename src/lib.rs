//! Quaternion convolutional networks for CIFAR-10 on burn.

// Quaternion field layout, Hamilton-product layers and structural ops
pub mod quaternion;

// Classifiers built from those layers, plus a real-valued baseline
pub mod model;

// CIFAR-10 reading, augmentation and batching
pub mod data;

// Epoch loops, schedules, checkpoints and logs
pub mod training;

pub mod device;
pub mod error;

pub use error::{Error, Result};
pub use model::{Architecture, ImageClassifier, ModelConfig};
pub use quaternion::QuaternionMapping;
