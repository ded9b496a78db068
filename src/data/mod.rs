//! CIFAR-10 loading, augmentation and batching.

pub mod augment;
pub mod autoaugment;
pub mod batcher;
pub mod cifar;
pub mod transform;

pub use augment::{AugmentVariant, CifarItem, MultiAugmentDataset};
pub use autoaugment::{AugmentOp, AutoAugment};
pub use batcher::{CifarBatch, CifarBatcher};
pub use cifar::{Cifar10Dataset, ImageItem};
pub use transform::{Cutout, Normalize, RandomCrop, RandomHorizontalFlip, RgbImage, Transform};
