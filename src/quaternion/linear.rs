use burn::{module::Param, prelude::*, tensor::Distribution};

use super::{QUATERNION_COMPONENTS, hamilton_matrix};

#[derive(Config, Debug)]
pub struct QLinearConfig {
    /// Input quaternions.
    pub in_features: usize,
    /// Output quaternions.
    pub out_features: usize,
    #[config(default = true)]
    pub bias: bool,
}

impl QLinearConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> QLinear<B> {
        let fan_in = QUATERNION_COMPONENTS * self.in_features;
        let bound = (6.0 / fan_in as f64).sqrt();
        let part = || {
            Param::from_tensor(Tensor::random(
                [self.out_features, self.in_features],
                Distribution::Uniform(-bound, bound),
                device,
            ))
        };

        QLinear {
            weight_r: part(),
            weight_i: part(),
            weight_j: part(),
            weight_k: part(),
            bias: self.bias.then(|| {
                Param::from_tensor(Tensor::zeros(
                    [QUATERNION_COMPONENTS * self.out_features],
                    device,
                ))
            }),
            in_features: self.in_features,
            out_features: self.out_features,
        }
    }
}

/// Quaternion dense layer on interleaved `[batch, n * 4]` features.
#[derive(Module, Debug)]
pub struct QLinear<B: Backend> {
    pub weight_r: Param<Tensor<B, 2>>,
    pub weight_i: Param<Tensor<B, 2>>,
    pub weight_j: Param<Tensor<B, 2>>,
    pub weight_k: Param<Tensor<B, 2>>,
    pub bias: Option<Param<Tensor<B, 1>>>,
    in_features: usize,
    out_features: usize,
}

impl<B: Backend> QLinear<B> {
    /// # Shapes
    ///   - Input `[batch, in * 4]`, quaternion components adjacent
    ///   - Output `[batch, out * 4]`, same layout
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, features] = x.dims();
        assert_eq!(
            features,
            self.in_features * QUATERNION_COMPONENTS,
            "quaternion dense layer expects {} x 4 features, got {features}",
            self.in_features
        );

        let input = x
            .reshape([batch, self.in_features, QUATERNION_COMPONENTS])
            .swap_dims(1, 2)
            .reshape([batch, QUATERNION_COMPONENTS * self.in_features]);
        let weight = hamilton_matrix(
            self.weight_r.val(),
            self.weight_i.val(),
            self.weight_j.val(),
            self.weight_k.val(),
        );

        let mut output = input.matmul(weight.transpose());
        if let Some(bias) = &self.bias {
            output = output + bias.val().unsqueeze();
        }

        output
            .reshape([batch, QUATERNION_COMPONENTS, self.out_features])
            .swap_dims(1, 2)
            .reshape([batch, self.out_features * QUATERNION_COMPONENTS])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CpuBackend, cpu_device};
    use crate::quaternion::hamilton_product;

    #[test]
    fn dense_layer_sums_hamilton_products() {
        let device = cpu_device();
        let mut layer = QLinearConfig::new(2, 1)
            .with_bias(false)
            .init::<CpuBackend>(&device);
        let w0 = [1.0, 0.5, -0.5, 2.0];
        let w1 = [-1.0, 0.0, 3.0, 0.25];
        let part = |q: usize| {
            Param::from_tensor(Tensor::from_data(
                TensorData::new(vec![w0[q], w1[q]], [1, 2]),
                &device,
            ))
        };
        layer.weight_r = part(0);
        layer.weight_i = part(1);
        layer.weight_j = part(2);
        layer.weight_k = part(3);

        let x0 = [0.5, 1.0, -2.0, 1.5];
        let x1 = [2.0, -1.0, 0.0, 1.0];
        let input = Tensor::from_data(
            TensorData::new([x0, x1].concat(), [1, 8]),
            &device,
        );

        let values = layer.forward(input).into_data().to_vec::<f32>().unwrap();

        let a = hamilton_product(w0, x0);
        let b = hamilton_product(w1, x1);
        for q in 0..4 {
            assert!((values[q] - (a[q] + b[q])).abs() < 1e-5);
        }
    }

    #[test]
    fn bias_is_added_per_component() {
        let device = cpu_device();
        let mut layer = QLinearConfig::new(1, 2).init::<CpuBackend>(&device);
        layer.bias = Some(Param::from_tensor(Tensor::from_data(
            [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
            &device,
        )));
        let input = Tensor::<CpuBackend, 2>::zeros([1, 4], &device);

        let values = layer.forward(input).into_data().to_vec::<f32>().unwrap();

        // component-major bias [r0 r1 i0 i1 j0 j1 k0 k1] comes back interleaved
        assert_eq!(values, vec![1.0, 3.0, 5.0, 7.0, 2.0, 4.0, 6.0, 8.0]);
    }
}
