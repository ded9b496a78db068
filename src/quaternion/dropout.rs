use burn::{prelude::*, tensor::Distribution};

use super::assert_quaternion_field;

#[derive(Config, Debug)]
pub struct QuaternionDropoutConfig {
    /// Probability of zeroing a whole quaternion.
    pub prob: f64,
}

impl QuaternionDropoutConfig {
    pub fn init(&self) -> QuaternionDropout {
        QuaternionDropout::new(self.prob)
    }
}

/// Dropout that zeroes the four components of a quaternion together.
///
/// One Bernoulli mask `[B, C, 1, H, W]` is drawn per forward call and
/// broadcast over the component axis. Inactive on non-autodiff backends,
/// which is what `Module::valid()` hands back for evaluation.
#[derive(Module, Clone, Debug)]
pub struct QuaternionDropout {
    pub prob: f64,
}

impl QuaternionDropout {
    pub fn new(prob: f64) -> Self {
        assert!(
            (0.0..1.0).contains(&prob),
            "dropout probability must be in [0, 1), got {prob}"
        );
        Self { prob }
    }

    pub fn set_prob(&mut self, prob: f64) {
        *self = Self::new(prob);
    }

    pub fn forward<B: Backend>(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        assert_quaternion_field(&x);
        if !B::ad_enabled() || self.prob == 0.0 {
            return x;
        }

        let [batch, channels, _, height, width] = x.dims();
        let dropped = Tensor::<B, 5>::random(
            [batch, channels, 1, height, width],
            Distribution::Bernoulli(self.prob),
            &x.device(),
        );
        let keep = dropped.neg() + 1.0;

        x * keep / (1.0 - self.prob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CpuAutodiffBackend, CpuBackend, cpu_device};

    #[test]
    fn mask_is_shared_by_all_components() {
        let device = cpu_device();
        let x = Tensor::<CpuAutodiffBackend, 5>::ones([3, 4, 4, 5, 5], &device);
        let dropout = QuaternionDropout::new(0.5);

        let values = dropout.forward(x).into_data().to_vec::<f32>().unwrap();

        let plane = 5 * 5;
        let mut kept = 0;
        for unit in 0..3 * 4 {
            let base = unit * 4 * plane;
            for pos in 0..plane {
                let real = values[base + pos];
                assert!(real == 0.0 || (real - 2.0).abs() < 1e-6, "unexpected value {real}");
                for q in 1..4 {
                    assert_eq!(values[base + q * plane + pos], real);
                }
                if real != 0.0 {
                    kept += 1;
                }
            }
        }
        // 300 units at p = 0.5: all-or-nothing would be astronomically unlikely
        assert!(kept > 0 && kept < 3 * 4 * plane);
    }

    #[test]
    fn inactive_without_autodiff() {
        let device = cpu_device();
        let x = Tensor::<CpuBackend, 5>::ones([2, 2, 4, 3, 3], &device);

        let out = QuaternionDropout::new(0.9).forward(x.clone());

        assert_eq!(
            out.into_data().to_vec::<f32>().unwrap(),
            x.into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn zero_probability_is_identity() {
        let device = cpu_device();
        let x = Tensor::<CpuAutodiffBackend, 5>::ones([1, 2, 4, 2, 2], &device);

        let out = QuaternionDropout::new(0.0).forward(x.clone());

        assert_eq!(
            out.into_data().to_vec::<f32>().unwrap(),
            x.into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn set_prob_updates_rate() {
        let mut dropout = QuaternionDropoutConfig::new(0.1).init();
        dropout.set_prob(0.35);
        assert_eq!(dropout.prob, 0.35);
    }
}
