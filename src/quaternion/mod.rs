//! Quaternion field tensors and the layers that operate on them.
//!
//! A quaternion field is a 5-D tensor `[batch, channels, 4, height, width]`
//! whose axis 2 holds the `(real, i, j, k)` components in that order. Every
//! layer in this module keeps that axis in place and never reorders it.
//!
//! Hamilton products are computed on a *component-major* view
//! `[batch, 4 * channels, ...]`, where the real parts of all channels come
//! first, then all `i` parts, and so on. In that view a quaternion weight
//! `W = Wr + Wi i + Wj j + Wk k` acting on `x` is one real block matrix
//!
//! ```text
//! | Wr -Wi -Wj -Wk |
//! | Wi  Wr -Wk  Wj |
//! | Wj  Wk  Wr -Wi |
//! | Wk -Wj  Wi  Wr |
//! ```

pub mod activation;
pub mod conv;
pub mod dropout;
pub mod linear;
pub mod mapping;
pub mod norm;
pub mod pool;

use burn::prelude::*;

pub use activation::{QuaternionPRelu, QuaternionPReluConfig, split_relu, split_silu};
pub use conv::{QConv2d, QConv2dConfig};
pub use dropout::{QuaternionDropout, QuaternionDropoutConfig};
pub use linear::{QLinear, QLinearConfig};
pub use mapping::{QuaternionMapping, lift_rgb};
pub use norm::{QuaternionBatchNorm, QuaternionBatchNormConfig};
pub use pool::{QuaternionAdaptiveAvgPool, QuaternionAvgPool, QuaternionMaxPool};

/// Size of the component axis.
pub const QUATERNION_COMPONENTS: usize = 4;

/// Panics unless `x` is laid out as `[batch, channels, 4, height, width]`.
pub fn assert_quaternion_field<B: Backend>(x: &Tensor<B, 5>) {
    let dims = x.dims();
    assert_eq!(
        dims[2], QUATERNION_COMPONENTS,
        "expected quaternion format with 4 components, got shape {dims:?}"
    );
}

/// `[B, C, 4, H, W]` -> `[B, 4 * C, H, W]` with all real parts first.
pub fn to_component_major<B: Backend>(x: Tensor<B, 5>) -> Tensor<B, 4> {
    assert_quaternion_field(&x);
    let [batch, channels, components, height, width] = x.dims();
    x.swap_dims(1, 2)
        .reshape([batch, components * channels, height, width])
}

/// Inverse of [`to_component_major`].
pub fn from_component_major<B: Backend>(x: Tensor<B, 4>, channels: usize) -> Tensor<B, 5> {
    let [batch, features, height, width] = x.dims();
    assert_eq!(
        features,
        QUATERNION_COMPONENTS * channels,
        "component-major tensor has {features} features, expected 4 x {channels}"
    );
    x.reshape([batch, QUATERNION_COMPONENTS, channels, height, width])
        .swap_dims(1, 2)
}

/// Flattens a quaternion field into `[B, C * H * W * 4]` keeping the four
/// components of each quaternion adjacent.
pub fn flatten_field<B: Backend>(x: Tensor<B, 5>) -> Tensor<B, 2> {
    assert_quaternion_field(&x);
    let [batch, channels, components, height, width] = x.dims();
    x.swap_dims(2, 3)
        .swap_dims(3, 4)
        .reshape([batch, channels * height * width * components])
}

/// Takes `[B, n * 4]` interleaved quaternions and returns the `[B, n]` real parts.
pub fn real_part<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let [batch, features] = x.dims();
    assert_eq!(
        features % QUATERNION_COMPONENTS,
        0,
        "{features} features do not form whole quaternions"
    );
    let count = features / QUATERNION_COMPONENTS;
    x.reshape([batch, count, QUATERNION_COMPONENTS])
        .narrow(2, 0, 1)
        .reshape([batch, count])
}

/// Assembles the real block matrix of a quaternion weight.
///
/// Each part has shape `[out, in, ...]`; the result is `[4 * out, 4 * in, ...]`.
pub(crate) fn hamilton_matrix<B: Backend, const D: usize>(
    r: Tensor<B, D>,
    i: Tensor<B, D>,
    j: Tensor<B, D>,
    k: Tensor<B, D>,
) -> Tensor<B, D> {
    let row_r = Tensor::cat(
        vec![r.clone(), i.clone().neg(), j.clone().neg(), k.clone().neg()],
        1,
    );
    let row_i = Tensor::cat(vec![i.clone(), r.clone(), k.clone().neg(), j.clone()], 1);
    let row_j = Tensor::cat(vec![j.clone(), k.clone(), r.clone(), i.clone().neg()], 1);
    let row_k = Tensor::cat(vec![k, j.neg(), i, r], 1);

    Tensor::cat(vec![row_r, row_i, row_j, row_k], 0)
}

/// Scalar Hamilton product `a * b` on `(real, i, j, k)` tuples.
pub fn hamilton_product(a: [f32; 4], b: [f32; 4]) -> [f32; 4] {
    let [a1, b1, c1, d1] = a;
    let [a2, b2, c2, d2] = b;
    [
        a1 * a2 - b1 * b2 - c1 * c2 - d1 * d2,
        a1 * b2 + b1 * a2 + c1 * d2 - d1 * c2,
        a1 * c2 - b1 * d2 + c1 * a2 + d1 * b2,
        a1 * d2 + b1 * c2 - c1 * b2 + d1 * a2,
    ]
}
