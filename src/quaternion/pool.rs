//! Spatial pooling applied independently to each quaternion component.

use burn::{
    nn::{
        PaddingConfig2d,
        pool::{
            AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig, MaxPool2d,
            MaxPool2dConfig,
        },
    },
    prelude::*,
};

use super::{QUATERNION_COMPONENTS, assert_quaternion_field};

/// Folds the component axis into the batch axis, pools, and unfolds it again.
fn pool_components<B: Backend>(
    x: Tensor<B, 5>,
    pool: impl FnOnce(Tensor<B, 4>) -> Tensor<B, 4>,
) -> Tensor<B, 5> {
    assert_quaternion_field(&x);
    let [batch, channels, components, height, width] = x.dims();

    let folded = x
        .swap_dims(1, 2)
        .reshape([batch * components, channels, height, width]);
    let pooled = pool(folded);
    let [_, _, out_height, out_width] = pooled.dims();

    pooled
        .reshape([batch, QUATERNION_COMPONENTS, channels, out_height, out_width])
        .swap_dims(1, 2)
}

#[derive(Module, Clone, Debug)]
pub struct QuaternionMaxPool {
    pool: MaxPool2d,
}

impl QuaternionMaxPool {
    pub fn new(kernel_size: usize, stride: usize, padding: usize) -> Self {
        let pool = MaxPool2dConfig::new([kernel_size, kernel_size])
            .with_strides([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .init();
        Self { pool }
    }

    pub fn forward<B: Backend>(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        pool_components(x, |folded| self.pool.forward(folded))
    }
}

#[derive(Module, Clone, Debug)]
pub struct QuaternionAvgPool {
    pool: AvgPool2d,
}

impl QuaternionAvgPool {
    pub fn new(kernel_size: usize, stride: usize) -> Self {
        let pool = AvgPool2dConfig::new([kernel_size, kernel_size])
            .with_strides([stride, stride])
            .init();
        Self { pool }
    }

    pub fn forward<B: Backend>(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        pool_components(x, |folded| self.pool.forward(folded))
    }
}

/// Adaptive average pooling to a fixed `size x size` grid per component.
#[derive(Module, Clone, Debug)]
pub struct QuaternionAdaptiveAvgPool {
    pool: AdaptiveAvgPool2d,
}

impl QuaternionAdaptiveAvgPool {
    pub fn new(size: usize) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([size, size]).init(),
        }
    }

    /// Global average pooling (`1 x 1` output).
    pub fn global() -> Self {
        Self::new(1)
    }

    pub fn forward<B: Backend>(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        pool_components(x, |folded| self.pool.forward(folded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CpuBackend, cpu_device};
    use burn::tensor::Distribution;

    fn component(x: &Tensor<CpuBackend, 5>, index: usize) -> Tensor<CpuBackend, 4> {
        let [batch, channels, _, height, width] = x.dims();
        x.clone()
            .narrow(2, index, 1)
            .reshape([batch, channels, height, width])
    }

    fn assert_commutes(pooled: Tensor<CpuBackend, 5>, expected: impl Fn(usize) -> Tensor<CpuBackend, 4>) {
        for q in 0..QUATERNION_COMPONENTS {
            let lhs = component(&pooled, q).into_data().to_vec::<f32>().unwrap();
            let rhs = expected(q).into_data().to_vec::<f32>().unwrap();
            assert_eq!(lhs, rhs, "component {q} differs");
        }
    }

    #[test]
    fn max_pool_commutes_with_component_axis() {
        let device = cpu_device();
        let x = Tensor::<CpuBackend, 5>::random([2, 3, 4, 6, 6], Distribution::Default, &device);
        let pool = QuaternionMaxPool::new(2, 2, 1);
        let plain = MaxPool2dConfig::new([2, 2])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let pooled = pool.forward(x.clone());

        assert_eq!(pooled.dims(), [2, 3, 4, 4, 4]);
        assert_commutes(pooled, |q| plain.forward(component(&x, q)));
    }

    #[test]
    fn avg_pool_commutes_with_component_axis() {
        let device = cpu_device();
        let x = Tensor::<CpuBackend, 5>::random([1, 2, 4, 4, 4], Distribution::Default, &device);
        let pool = QuaternionAvgPool::new(2, 2);
        let plain = AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        let pooled = pool.forward(x.clone());

        assert_eq!(pooled.dims(), [1, 2, 4, 2, 2]);
        assert_commutes(pooled, |q| plain.forward(component(&x, q)));
    }

    #[test]
    fn adaptive_pool_commutes_with_component_axis() {
        let device = cpu_device();
        let x = Tensor::<CpuBackend, 5>::random([2, 2, 4, 5, 5], Distribution::Default, &device);
        let plain = AdaptiveAvgPool2dConfig::new([2, 2]).init();

        let pooled = QuaternionAdaptiveAvgPool::new(2).forward(x.clone());

        assert_eq!(pooled.dims(), [2, 2, 4, 2, 2]);
        assert_commutes(pooled, |q| plain.forward(component(&x, q)));

        let global = QuaternionAdaptiveAvgPool::global().forward(x);
        assert_eq!(global.dims(), [2, 2, 4, 1, 1]);
    }

    #[test]
    #[should_panic(expected = "expected quaternion format")]
    fn pooling_rejects_wrong_component_count() {
        let x = Tensor::<CpuBackend, 5>::zeros([1, 1, 2, 4, 4], &cpu_device());
        QuaternionMaxPool::new(2, 2, 0).forward(x);
    }
}
