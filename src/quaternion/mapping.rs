use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

const NORM_EPSILON: f64 = 1e-12;

/// Policy turning an RGB pixel into one quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuaternionMapping {
    /// `(0, r, g, b)`: a pure quaternion carrying the normalized channels.
    RawNormalized,
    /// `(Y, r, g, b)` with the Rec. 601 luma as real part.
    Luminance,
    /// Imaginary part squashed into the unit ball with `tanh(|v|) v / |v|`,
    /// real part `1 - |imag|^2`.
    Poincare,
}

impl QuaternionMapping {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RawNormalized => "raw_normalized",
            Self::Luminance => "luminance",
            Self::Poincare => "poincare",
        }
    }
}

impl fmt::Display for QuaternionMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QuaternionMapping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw_normalized" | "raw" => Ok(Self::RawNormalized),
            "luminance" => Ok(Self::Luminance),
            "poincare" => Ok(Self::Poincare),
            other => Err(format!(
                "unknown mapping '{other}' (expected raw_normalized, luminance or poincare)"
            )),
        }
    }
}

/// Lifts `[B, 3, H, W]` RGB images into a one-channel quaternion field
/// `[B, 1, 4, H, W]`.
pub fn lift_rgb<B: Backend>(images: Tensor<B, 4>, mapping: QuaternionMapping) -> Tensor<B, 5> {
    let [_, channels, _, _] = images.dims();
    assert_eq!(channels, 3, "expected RGB images with 3 channels, got {channels}");

    let red = images.clone().narrow(1, 0, 1);
    let green = images.clone().narrow(1, 1, 1);
    let blue = images.narrow(1, 2, 1);

    let [real, i, j, k] = match mapping {
        QuaternionMapping::RawNormalized => [red.zeros_like(), red, green, blue],
        QuaternionMapping::Luminance => {
            let luma = red.clone() * 0.299 + green.clone() * 0.587 + blue.clone() * 0.114;
            [luma, red, green, blue]
        }
        QuaternionMapping::Poincare => {
            let squared = red.clone() * red.clone()
                + green.clone() * green.clone()
                + blue.clone() * blue.clone();
            let norm = (squared + NORM_EPSILON).sqrt();
            let scale = norm.clone().tanh() / norm;
            let i = red * scale.clone();
            let j = green * scale.clone();
            let k = blue * scale;
            let radius = i.clone() * i.clone() + j.clone() * j.clone() + k.clone() * k.clone();
            let real = radius.neg() + 1.0;
            [real, i, j, k]
        }
    };

    Tensor::stack(vec![real, i, j, k], 2)
}
