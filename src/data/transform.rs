//! Image transforms for the CIFAR pipeline.
//!
//! Geometric and color transforms work on `u8` images; [`Normalize`] turns an
//! image into channel-planar `f32` values and [`Cutout`] runs on those.

use rand::{Rng, rngs::StdRng};

use super::cifar::{CHANNELS, IMAGE_SIZE, ImageItem};

pub const CIFAR10_MEAN: [f32; 3] = [0.4914, 0.4822, 0.4465];
pub const CIFAR10_STD: [f32; 3] = [0.2023, 0.1994, 0.2010];

/// Channel-planar RGB image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl RgbImage {
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Self {
        assert_eq!(
            pixels.len(),
            CHANNELS * width * height,
            "pixel buffer does not match a {width}x{height} RGB image"
        );
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn from_item(item: &ImageItem) -> Self {
        Self::new(IMAGE_SIZE, IMAGE_SIZE, item.pixels.clone())
    }

    pub fn plane_len(&self) -> usize {
        self.width * self.height
    }

    pub fn get(&self, channel: usize, y: usize, x: usize) -> u8 {
        self.pixels[channel * self.plane_len() + y * self.width + x]
    }

    pub fn plane(&self, channel: usize) -> &[u8] {
        let len = self.plane_len();
        &self.pixels[channel * len..(channel + 1) * len]
    }

    pub fn plane_mut(&mut self, channel: usize) -> &mut [u8] {
        let len = self.plane_len();
        &mut self.pixels[channel * len..(channel + 1) * len]
    }

    /// Rec. 601 luma, rounded like PIL's `L` conversion.
    pub fn grayscale(&self) -> Vec<u8> {
        (0..self.plane_len())
            .map(|i| {
                let r = f32::from(self.pixels[i]);
                let g = f32::from(self.pixels[self.plane_len() + i]);
                let b = f32::from(self.pixels[2 * self.plane_len() + i]);
                (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

/// A randomized image-to-image transform. Randomness always comes from the
/// caller's RNG so per-sample seeding makes results reproducible.
pub trait Transform: Send + Sync {
    fn apply(&self, image: RgbImage, rng: &mut StdRng) -> RgbImage;
}

/// Zero-pads by `padding` on each side and crops a random `size x size` window.
#[derive(Debug, Clone)]
pub struct RandomCrop {
    pub size: usize,
    pub padding: usize,
}

impl RandomCrop {
    pub fn new(size: usize, padding: usize) -> Self {
        Self { size, padding }
    }
}

impl Transform for RandomCrop {
    fn apply(&self, image: RgbImage, rng: &mut StdRng) -> RgbImage {
        let padded_h = image.height + 2 * self.padding;
        let padded_w = image.width + 2 * self.padding;
        assert!(
            self.size <= padded_h && self.size <= padded_w,
            "crop {} exceeds padded image {padded_w}x{padded_h}",
            self.size
        );
        let top = rng.random_range(0..=padded_h - self.size);
        let left = rng.random_range(0..=padded_w - self.size);

        let mut pixels = vec![0u8; CHANNELS * self.size * self.size];
        for c in 0..CHANNELS {
            for y in 0..self.size {
                let src_y = (top + y).checked_sub(self.padding);
                for x in 0..self.size {
                    let src_x = (left + x).checked_sub(self.padding);
                    if let (Some(sy), Some(sx)) = (src_y, src_x) {
                        if sy < image.height && sx < image.width {
                            pixels[(c * self.size + y) * self.size + x] = image.get(c, sy, sx);
                        }
                    }
                }
            }
        }
        RgbImage::new(self.size, self.size, pixels)
    }
}

#[derive(Debug, Clone)]
pub struct RandomHorizontalFlip {
    pub probability: f64,
}

impl Default for RandomHorizontalFlip {
    fn default() -> Self {
        Self { probability: 0.5 }
    }
}

impl Transform for RandomHorizontalFlip {
    fn apply(&self, mut image: RgbImage, rng: &mut StdRng) -> RgbImage {
        if rng.random::<f64>() >= self.probability {
            return image;
        }
        let width = image.width;
        for row in image.pixels.chunks_exact_mut(width) {
            row.reverse();
        }
        image
    }
}

/// `u8` image to normalized `f32`, channel-planar.
#[derive(Debug, Clone)]
pub struct Normalize {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalize {
    pub fn cifar10() -> Self {
        Self {
            mean: CIFAR10_MEAN,
            std: CIFAR10_STD,
        }
    }

    pub fn apply(&self, image: &RgbImage) -> Vec<f32> {
        let plane = image.plane_len();
        image
            .pixels
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let c = i / plane;
                (f32::from(p) / 255.0 - self.mean[c]) / self.std[c]
            })
            .collect()
    }
}

/// Zeroes `n_holes` square patches of side `length` (clipped at the border).
///
/// Positions are drawn from a clone of the caller's RNG, leaving the caller's
/// stream where it was.
#[derive(Debug, Clone)]
pub struct Cutout {
    pub n_holes: usize,
    pub length: usize,
}

impl Cutout {
    pub fn new(n_holes: usize, length: usize) -> Self {
        Self { n_holes, length }
    }

    pub fn apply(&self, values: &mut [f32], height: usize, width: usize, rng: &StdRng) {
        let plane = height * width;
        assert_eq!(values.len() % plane, 0, "buffer is not a stack of {height}x{width} planes");
        let channels = values.len() / plane;
        let half = self.length / 2;
        let mut rng = rng.clone();

        for _ in 0..self.n_holes {
            let y = rng.random_range(0..height);
            let x = rng.random_range(0..width);
            let (y1, y2) = (y.saturating_sub(half), (y + half).min(height));
            let (x1, x2) = (x.saturating_sub(half), (x + half).min(width));

            for c in 0..channels {
                for row in y1..y2 {
                    let start = c * plane + row * width;
                    values[start + x1..start + x2].fill(0.0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn gradient(size: usize) -> RgbImage {
        let pixels = (0..CHANNELS * size * size).map(|i| (i % 251) as u8).collect();
        RgbImage::new(size, size, pixels)
    }

    #[test]
    fn crop_keeps_size_and_pads_with_zeros() {
        let image = RgbImage::new(4, 4, vec![255; CHANNELS * 16]);
        let crop = RandomCrop::new(4, 4);

        let mut saw_padding = false;
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..16 {
            let out = crop.apply(image.clone(), &mut rng);
            assert_eq!((out.width, out.height), (4, 4));
            saw_padding |= out.pixels.contains(&0);
        }
        assert!(saw_padding);
    }

    #[test]
    fn flip_mirrors_each_row() {
        let image = gradient(3);
        let flip = RandomHorizontalFlip { probability: 1.0 };

        let out = flip.apply(image.clone(), &mut StdRng::seed_from_u64(0));

        for c in 0..CHANNELS {
            for y in 0..3 {
                for x in 0..3 {
                    assert_eq!(out.get(c, y, x), image.get(c, y, 2 - x));
                }
            }
        }
    }

    #[test]
    fn normalize_uses_per_channel_statistics() {
        let image = RgbImage::new(1, 1, vec![255, 0, 128]);

        let values = Normalize::cifar10().apply(&image);

        assert!((values[0] - (1.0 - 0.4914) / 0.2023).abs() < 1e-5);
        assert!((values[1] - (-0.4822 / 0.1994)).abs() < 1e-5);
        assert!((values[2] - (128.0 / 255.0 - 0.4465) / 0.2010).abs() < 1e-5);
    }

    #[test]
    fn cutout_leaves_caller_rng_untouched() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut reference = rng.clone();
        let mut values = vec![1.0f32; CHANNELS * 32 * 32];

        Cutout::new(1, 16).apply(&mut values, 32, 32, &rng);

        assert_eq!(rng.random::<u64>(), reference.random::<u64>());
        let zeros = values.iter().filter(|&&v| v == 0.0).count();
        assert!(zeros > 0 && zeros % CHANNELS == 0);
        assert!(zeros <= CHANNELS * 16 * 16);
    }

    #[test]
    fn cutout_is_reproducible_for_equal_rngs() {
        let rng = StdRng::seed_from_u64(5);
        let mut a = vec![1.0f32; CHANNELS * 8 * 8];
        let mut b = a.clone();

        Cutout::new(2, 4).apply(&mut a, 8, 8, &rng);
        Cutout::new(2, 4).apply(&mut b, 8, 8, &rng);

        assert_eq!(a, b);
    }
}
