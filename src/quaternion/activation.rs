//! Split activations: the nonlinearity acts on each component separately.

use burn::{
    module::Param,
    prelude::*,
    tensor::activation::{relu, silu},
};

use super::assert_quaternion_field;

pub fn split_silu<B: Backend>(x: Tensor<B, 5>) -> Tensor<B, 5> {
    assert_quaternion_field(&x);
    silu(x)
}

pub fn split_relu<B: Backend>(x: Tensor<B, 5>) -> Tensor<B, 5> {
    assert_quaternion_field(&x);
    relu(x)
}

#[derive(Config, Debug)]
pub struct QuaternionPReluConfig {
    pub channels: usize,
    #[config(default = 0.25)]
    pub alpha: f64,
}

impl QuaternionPReluConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> QuaternionPRelu<B> {
        QuaternionPRelu {
            alpha: Param::from_tensor(Tensor::full([self.channels], self.alpha, device)),
        }
    }
}

/// Parametric ReLU with one learnable slope per quaternion channel, shared by
/// the four components.
#[derive(Module, Debug)]
pub struct QuaternionPRelu<B: Backend> {
    pub alpha: Param<Tensor<B, 1>>,
}

impl<B: Backend> QuaternionPRelu<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        assert_quaternion_field(&x);
        let [_, channels, _, _, _] = x.dims();
        let alpha = self.alpha.val().reshape([1, channels, 1, 1, 1]);

        let negative = x.clone().lower_elem(0.0);
        x.clone().mask_where(negative, x * alpha)
    }
}
