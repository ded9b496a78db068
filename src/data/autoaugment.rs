//! The CIFAR-10 AutoAugment policy: 25 two-step sub-policies over 10
//! magnitude bins, one sub-policy picked per image.

use rand::{Rng, rngs::StdRng};

use super::transform::{RgbImage, Transform};

const NUM_BINS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AugmentOp {
    ShearX,
    ShearY,
    TranslateX,
    TranslateY,
    Rotate,
    Brightness,
    Color,
    Contrast,
    Sharpness,
    Posterize,
    Solarize,
    AutoContrast,
    Equalize,
    Invert,
}

impl AugmentOp {
    /// Magnitude for `bin`; `None` for ops that take no magnitude.
    fn magnitude(self, bin: usize, width: usize) -> Option<f32> {
        let t = bin as f32 / (NUM_BINS - 1) as f32;
        match self {
            Self::ShearX | Self::ShearY => Some(0.3 * t),
            Self::TranslateX | Self::TranslateY => Some(150.0 / 331.0 * width as f32 * t),
            Self::Rotate => Some(30.0 * t),
            Self::Brightness | Self::Color | Self::Contrast | Self::Sharpness => Some(0.9 * t),
            Self::Posterize => Some(8.0 - (bin as f32 / ((NUM_BINS - 1) as f32 / 4.0)).round()),
            Self::Solarize => Some(255.0 * (1.0 - t)),
            Self::AutoContrast | Self::Equalize | Self::Invert => None,
        }
    }

    fn signed(self) -> bool {
        matches!(
            self,
            Self::ShearX
                | Self::ShearY
                | Self::TranslateX
                | Self::TranslateY
                | Self::Rotate
                | Self::Brightness
                | Self::Color
                | Self::Contrast
                | Self::Sharpness
        )
    }

    pub fn apply(self, image: RgbImage, magnitude: f32) -> RgbImage {
        match self {
            Self::ShearX => affine(&image, |x, y| (x + magnitude * y, y)),
            Self::ShearY => affine(&image, |x, y| (x, y + magnitude * x)),
            Self::TranslateX => {
                let shift = magnitude.round();
                affine(&image, |x, y| (x - shift, y))
            }
            Self::TranslateY => {
                let shift = magnitude.round();
                affine(&image, |x, y| (x, y - shift))
            }
            Self::Rotate => rotate(&image, magnitude),
            Self::Brightness => {
                let black = vec![0u8; image.pixels.len()];
                blend(image, &black, 1.0 + magnitude)
            }
            Self::Color => {
                let gray = image.grayscale();
                let degenerate = [gray.as_slice(), gray.as_slice(), gray.as_slice()].concat();
                blend(image, &degenerate, 1.0 + magnitude)
            }
            Self::Contrast => {
                let gray = image.grayscale();
                let mean = gray.iter().map(|&v| f32::from(v)).sum::<f32>() / gray.len() as f32;
                let degenerate = vec![(mean + 0.5).floor() as u8; image.pixels.len()];
                blend(image, &degenerate, 1.0 + magnitude)
            }
            Self::Sharpness => {
                let degenerate = smooth(&image);
                blend(image, &degenerate, 1.0 + magnitude)
            }
            Self::Posterize => posterize(image, magnitude as u32),
            Self::Solarize => solarize(image, magnitude),
            Self::AutoContrast => autocontrast(image),
            Self::Equalize => equalize(image),
            Self::Invert => map_pixels(image, |v| 255 - v),
        }
    }
}

/// `(op, probability, magnitude bin)`; the bin is ignored by magnitude-free ops.
pub type SubPolicy = [(AugmentOp, f64, usize); 2];

pub const CIFAR10_POLICY: [SubPolicy; 25] = {
    use AugmentOp::*;
    [
        [(Invert, 0.1, 0), (Contrast, 0.2, 6)],
        [(Rotate, 0.7, 2), (TranslateX, 0.3, 9)],
        [(Sharpness, 0.8, 1), (Sharpness, 0.9, 3)],
        [(ShearY, 0.5, 8), (TranslateY, 0.7, 9)],
        [(AutoContrast, 0.5, 0), (Equalize, 0.9, 0)],
        [(ShearY, 0.2, 7), (Posterize, 0.3, 7)],
        [(Color, 0.4, 3), (Brightness, 0.6, 7)],
        [(Sharpness, 0.3, 9), (Brightness, 0.7, 9)],
        [(Equalize, 0.6, 0), (Equalize, 0.5, 0)],
        [(Contrast, 0.6, 7), (Sharpness, 0.6, 5)],
        [(Color, 0.7, 7), (TranslateX, 0.5, 8)],
        [(Equalize, 0.3, 0), (AutoContrast, 0.4, 0)],
        [(TranslateY, 0.4, 3), (Sharpness, 0.2, 6)],
        [(Brightness, 0.9, 6), (Color, 0.2, 8)],
        [(Solarize, 0.5, 2), (Invert, 0.0, 0)],
        [(Equalize, 0.2, 0), (AutoContrast, 0.6, 0)],
        [(Equalize, 0.2, 0), (Equalize, 0.6, 0)],
        [(Color, 0.9, 9), (Equalize, 0.6, 0)],
        [(AutoContrast, 0.8, 0), (Solarize, 0.2, 8)],
        [(Brightness, 0.1, 3), (Color, 0.7, 0)],
        [(Solarize, 0.4, 5), (AutoContrast, 0.9, 0)],
        [(TranslateY, 0.9, 9), (TranslateY, 0.7, 9)],
        [(AutoContrast, 0.9, 0), (Solarize, 0.4, 3)],
        [(Equalize, 0.8, 0), (Invert, 0.1, 0)],
        [(TranslateY, 0.7, 9), (AutoContrast, 0.9, 0)],
    ]
};

#[derive(Debug, Clone, Default)]
pub struct AutoAugment;

impl Transform for AutoAugment {
    fn apply(&self, mut image: RgbImage, rng: &mut StdRng) -> RgbImage {
        let policy = &CIFAR10_POLICY[rng.random_range(0..CIFAR10_POLICY.len())];
        let probs: [f64; 2] = [rng.random(), rng.random()];
        let negate: [bool; 2] = [rng.random(), rng.random()];

        for (step, &(op, probability, bin)) in policy.iter().enumerate() {
            if probs[step] > probability {
                continue;
            }
            let mut magnitude = op.magnitude(bin, image.width).unwrap_or(0.0);
            if op.signed() && negate[step] {
                magnitude = -magnitude;
            }
            image = op.apply(image, magnitude);
        }
        image
    }
}

fn map_pixels(mut image: RgbImage, f: impl Fn(u8) -> u8) -> RgbImage {
    for p in &mut image.pixels {
        *p = f(*p);
    }
    image
}

/// `degenerate + factor * (image - degenerate)`, clamped to `u8`.
fn blend(mut image: RgbImage, degenerate: &[u8], factor: f32) -> RgbImage {
    for (p, &d) in image.pixels.iter_mut().zip(degenerate) {
        let d = f32::from(d);
        *p = (d + factor * (f32::from(*p) - d)).round().clamp(0.0, 255.0) as u8;
    }
    image
}

/// Nearest-neighbour resampling; `source(x, y)` maps an output pixel to the
/// input position it reads. Out-of-bounds reads are black.
fn affine(image: &RgbImage, source: impl Fn(f32, f32) -> (f32, f32)) -> RgbImage {
    let (w, h) = (image.width, image.height);
    let mut pixels = vec![0u8; image.pixels.len()];
    for y in 0..h {
        for x in 0..w {
            let (sx, sy) = source(x as f32, y as f32);
            let (sx, sy) = (sx.round(), sy.round());
            if sx < 0.0 || sy < 0.0 || sx >= w as f32 || sy >= h as f32 {
                continue;
            }
            for c in 0..3 {
                pixels[(c * h + y) * w + x] = image.get(c, sy as usize, sx as usize);
            }
        }
    }
    RgbImage::new(w, h, pixels)
}

/// Rotates counter-clockwise by `degrees` about the image center.
fn rotate(image: &RgbImage, degrees: f32) -> RgbImage {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let cx = (image.width as f32 - 1.0) / 2.0;
    let cy = (image.height as f32 - 1.0) / 2.0;
    affine(image, |x, y| {
        let (dx, dy) = (x - cx, y - cy);
        (cx + cos * dx - sin * dy, cy + sin * dx + cos * dy)
    })
}

/// PIL's SMOOTH kernel `[[1,1,1],[1,5,1],[1,1,1]] / 13`; border pixels are kept.
fn smooth(image: &RgbImage) -> Vec<u8> {
    let (w, h) = (image.width, image.height);
    let mut out = image.pixels.clone();
    if w < 3 || h < 3 {
        return out;
    }
    for c in 0..3 {
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let mut sum = 0u32;
                for dy in 0..3 {
                    for dx in 0..3 {
                        let weight = if dx == 1 && dy == 1 { 5 } else { 1 };
                        sum += weight * u32::from(image.get(c, y + dy - 1, x + dx - 1));
                    }
                }
                out[(c * h + y) * w + x] = ((sum as f32) / 13.0).round() as u8;
            }
        }
    }
    out
}

fn posterize(image: RgbImage, bits: u32) -> RgbImage {
    let bits = bits.clamp(1, 8);
    let mask = !((1u16 << (8 - bits)) - 1) as u8;
    map_pixels(image, |v| v & mask)
}

fn solarize(image: RgbImage, threshold: f32) -> RgbImage {
    map_pixels(image, |v| if f32::from(v) >= threshold { 255 - v } else { v })
}

/// Stretches every channel to the full `0..=255` range.
fn autocontrast(mut image: RgbImage) -> RgbImage {
    for c in 0..3 {
        let plane = image.plane_mut(c);
        let lo = plane.iter().copied().min().unwrap_or(0);
        let hi = plane.iter().copied().max().unwrap_or(255);
        if hi <= lo {
            continue;
        }
        let scale = 255.0 / f32::from(hi - lo);
        for p in plane.iter_mut() {
            *p = (f32::from(*p - lo) * scale).round().clamp(0.0, 255.0) as u8;
        }
    }
    image
}

/// Per-channel histogram equalization with PIL's lookup-table rule.
fn equalize(mut image: RgbImage) -> RgbImage {
    for c in 0..3 {
        let mut histogram = [0usize; 256];
        for &p in image.plane(c) {
            histogram[usize::from(p)] += 1;
        }
        let last = histogram.iter().rev().find(|&&n| n > 0).copied().unwrap_or(0);
        let total: usize = histogram.iter().sum();
        let step = (total - last) / 255;
        if step == 0 {
            continue;
        }

        let mut lut = [0u8; 256];
        let mut cumulative = step / 2;
        for (value, count) in histogram.iter().enumerate() {
            lut[value] = (cumulative / step).min(255) as u8;
            cumulative += count;
        }
        for p in image.plane_mut(c) {
            *p = lut[usize::from(*p)];
        }
    }
    image
}
