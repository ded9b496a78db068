use burn::{data::dataloader::batcher::Batcher, prelude::*};

use super::augment::CifarItem;
use super::cifar::{CHANNELS, IMAGE_SIZE};

#[derive(Clone, Default)]
pub struct CifarBatcher {}

#[derive(Clone, Debug)]
pub struct CifarBatch<B: Backend> {
    /// `[batch, 3, 32, 32]`, already normalized.
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, CifarItem, CifarBatch<B>> for CifarBatcher {
    fn batch(&self, items: Vec<CifarItem>, device: &B::Device) -> CifarBatch<B> {
        let images = items
            .iter()
            .map(|item| TensorData::new(item.image.clone(), [1, CHANNELS, IMAGE_SIZE, IMAGE_SIZE]))
            .map(|data| Tensor::<B, 4>::from_data(data.convert::<B::FloatElem>(), device))
            .collect();

        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data([(item.label as i64).elem::<B::IntElem>()], device)
            })
            .collect();

        CifarBatch {
            images: Tensor::cat(images, 0),
            targets: Tensor::cat(targets, 0),
        }
    }
}
