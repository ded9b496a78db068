use burn::data::dataset::Dataset;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::autoaugment::AutoAugment;
use super::cifar::{IMAGE_SIZE, ImageItem};
use super::transform::{Cutout, Normalize, RandomCrop, RandomHorizontalFlip, RgbImage, Transform};

/// A normalized image ready for batching.
#[derive(Debug, Clone, PartialEq)]
pub struct CifarItem {
    /// Channel-planar `[3, 32, 32]` values.
    pub image: Vec<f32>,
    pub label: usize,
}

/// Which transform pipeline an index goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AugmentVariant {
    /// Crop, flip, normalize.
    Weak,
    /// Crop, flip, AutoAugment, normalize, Cutout.
    Strong,
    /// Normalize only.
    Test,
}

/// Serves every base image `augmentations_per_image` times per epoch.
///
/// Training indices are a seeded shuffle of the repeated base indices, fixed at
/// construction. Index `i` takes the weak pipeline when
/// `i % augmentations_per_image == 0` and the strong one otherwise, with its
/// randomness seeded from `i`, so `get(i)` is reproducible regardless of which
/// loader worker asks for it.
pub struct MultiAugmentDataset<D> {
    dataset: D,
    augmentations_per_image: usize,
    indices: Option<Vec<usize>>,
    crop: RandomCrop,
    flip: RandomHorizontalFlip,
    autoaugment: AutoAugment,
    normalize: Normalize,
    cutout: Cutout,
}

impl<D: Dataset<ImageItem>> MultiAugmentDataset<D> {
    pub fn train(dataset: D, augmentations_per_image: usize, seed: u64) -> Self {
        assert!(augmentations_per_image > 0, "need at least one augmentation per image");
        let mut indices: Vec<usize> = (0..dataset.len())
            .flat_map(|index| std::iter::repeat_n(index, augmentations_per_image))
            .collect();
        indices.shuffle(&mut StdRng::seed_from_u64(seed));
        log::debug!(
            "{} base images x {augmentations_per_image} augmentations",
            dataset.len()
        );

        Self::build(dataset, augmentations_per_image, Some(indices))
    }

    /// Identity indexing with the test transform.
    pub fn eval(dataset: D) -> Self {
        Self::build(dataset, 1, None)
    }

    fn build(dataset: D, augmentations_per_image: usize, indices: Option<Vec<usize>>) -> Self {
        Self {
            dataset,
            augmentations_per_image,
            indices,
            crop: RandomCrop::new(IMAGE_SIZE, 4),
            flip: RandomHorizontalFlip::default(),
            autoaugment: AutoAugment,
            normalize: Normalize::cifar10(),
            cutout: Cutout::new(1, 16),
        }
    }

    pub fn augmentations_per_image(&self) -> usize {
        self.augmentations_per_image
    }

    /// Base dataset index served at `index`.
    pub fn base_index(&self, index: usize) -> Option<usize> {
        match &self.indices {
            Some(indices) => indices.get(index).copied(),
            None => (index < self.dataset.len()).then_some(index),
        }
    }

    pub fn variant(&self, index: usize) -> Option<AugmentVariant> {
        if index >= self.len() {
            return None;
        }
        Some(match self.indices {
            None => AugmentVariant::Test,
            Some(_) if index % self.augmentations_per_image == 0 => AugmentVariant::Weak,
            Some(_) => AugmentVariant::Strong,
        })
    }

    fn transform(&self, item: &ImageItem, index: usize, variant: AugmentVariant) -> Vec<f32> {
        let image = RgbImage::from_item(item);
        if variant == AugmentVariant::Test {
            return self.normalize.apply(&image);
        }

        let mut rng = StdRng::seed_from_u64(index as u64);
        let image = self.crop.apply(image, &mut rng);
        let mut image = self.flip.apply(image, &mut rng);
        if variant == AugmentVariant::Strong {
            image = self.autoaugment.apply(image, &mut rng);
        }

        let mut values = self.normalize.apply(&image);
        if variant == AugmentVariant::Strong {
            self.cutout.apply(&mut values, image.height, image.width, &rng);
        }
        values
    }
}

impl<D: Dataset<ImageItem>> Dataset<CifarItem> for MultiAugmentDataset<D> {
    fn get(&self, index: usize) -> Option<CifarItem> {
        let variant = self.variant(index)?;
        let item = self.dataset.get(self.base_index(index)?)?;

        Some(CifarItem {
            image: self.transform(&item, index, variant),
            label: item.label,
        })
    }

    fn len(&self) -> usize {
        match &self.indices {
            Some(indices) => indices.len(),
            None => self.dataset.len(),
        }
    }
}
