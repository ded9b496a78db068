//! Quaternion batch normalization: every `(channel, component)` pair gets its
//! own statistics and affine parameters.

use burn::{
    nn::{BatchNorm, BatchNormConfig},
    prelude::*,
};

use super::{QUATERNION_COMPONENTS, assert_quaternion_field};

#[derive(Config, Debug)]
pub struct QuaternionBatchNormConfig {
    pub channels: usize,
    #[config(default = 1e-5)]
    pub epsilon: f64,
    #[config(default = 0.1)]
    pub momentum: f64,
}

impl QuaternionBatchNormConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> QuaternionBatchNorm<B> {
        let norm = BatchNormConfig::new(self.channels * QUATERNION_COMPONENTS)
            .with_epsilon(self.epsilon)
            .with_momentum(self.momentum)
            .init(device);
        QuaternionBatchNorm {
            norm,
            channels: self.channels,
        }
    }
}

/// Independent quaternion batch norm: statistics and affine parameters per
/// `(channel, component)` pair.
#[derive(Module, Debug)]
pub struct QuaternionBatchNorm<B: Backend> {
    pub norm: BatchNorm<B, 2>,
    channels: usize,
}

impl<B: Backend> QuaternionBatchNorm<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        assert_quaternion_field(&x);
        let [batch, channels, components, height, width] = x.dims();
        assert_eq!(
            channels, self.channels,
            "batch norm built for {} channels, got {channels}",
            self.channels
        );

        let features = x.reshape([batch, channels * components, height, width]);
        self.norm
            .forward(features)
            .reshape([batch, channels, components, height, width])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CpuAutodiffBackend, CpuBackend, cpu_device};
    use burn::tensor::Distribution;

    #[test]
    fn training_output_has_zero_mean_unit_variance_per_component() {
        let device = cpu_device();
        let norm = QuaternionBatchNormConfig::new(2).init::<CpuAutodiffBackend>(&device);
        let x = Tensor::<CpuAutodiffBackend, 5>::random(
            [8, 2, 4, 3, 3],
            Distribution::Normal(3.0, 2.0),
            &device,
        );

        let out = norm.forward(x);

        let flat = out.swap_dims(0, 1).swap_dims(1, 2).reshape([2 * 4, 8 * 3 * 3]);
        let means = flat.clone().mean_dim(1).into_data().to_vec::<f32>().unwrap();
        let vars = flat.var_bias(1).into_data().to_vec::<f32>().unwrap();
        for (mean, var) in means.iter().zip(vars) {
            assert!(mean.abs() < 1e-4, "mean {mean}");
            assert!((var - 1.0).abs() < 1e-2, "var {var}");
        }
    }

    #[test]
    fn training_updates_running_statistics() {
        let device = cpu_device();
        let norm = QuaternionBatchNormConfig::new(1).init::<CpuAutodiffBackend>(&device);
        let x = Tensor::<CpuAutodiffBackend, 5>::full([2, 1, 4, 2, 2], 5.0, &device);

        let _ = norm.forward(x);

        // momentum 0.1 from mean 0 / var 1 towards batch mean 5 / var 0
        let mean = norm.norm.running_mean.value_sync().into_data().to_vec::<f32>().unwrap();
        let var = norm.norm.running_var.value_sync().into_data().to_vec::<f32>().unwrap();
        assert_eq!(mean.len(), 4);
        for (m, v) in mean.iter().zip(&var) {
            assert!((m - 0.5).abs() < 1e-5, "mean {m}");
            assert!((v - 0.9).abs() < 1e-5, "var {v}");
        }
    }

    #[test]
    fn inference_uses_running_statistics() {
        let device = cpu_device();
        let norm = QuaternionBatchNormConfig::new(1).init::<CpuBackend>(&device);
        let x = Tensor::<CpuBackend, 5>::full([1, 1, 4, 2, 2], 3.0, &device);

        let values = norm.forward(x).into_data().to_vec::<f32>().unwrap();

        // running mean 0, running var 1
        for v in values {
            assert!((v - 3.0).abs() < 1e-4);
        }
    }
}
