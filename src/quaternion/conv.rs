use burn::{
    module::Param,
    prelude::*,
    tensor::{Distribution, module::conv2d, ops::ConvOptions},
};

use super::{
    QUATERNION_COMPONENTS, assert_quaternion_field, from_component_major, hamilton_matrix,
    to_component_major,
};

#[derive(Config, Debug)]
pub struct QConv2dConfig {
    /// `[in, out]` quaternion channels.
    pub channels: [usize; 2],
    pub kernel_size: usize,
    #[config(default = 1)]
    pub stride: usize,
    #[config(default = 0)]
    pub padding: usize,
    #[config(default = true)]
    pub bias: bool,
}

impl QConv2dConfig {
    /// Weights are uniform with a He-style bound over the real fan-in
    /// `4 * in * k * k` of each output component.
    pub fn init<B: Backend>(&self, device: &B::Device) -> QConv2d<B> {
        let [in_channels, out_channels] = self.channels;
        let k = self.kernel_size;
        let fan_in = QUATERNION_COMPONENTS * in_channels * k * k;
        let bound = (6.0 / fan_in as f64).sqrt();
        let part = || {
            Param::from_tensor(Tensor::random(
                [out_channels, in_channels, k, k],
                Distribution::Uniform(-bound, bound),
                device,
            ))
        };

        QConv2d {
            weight_r: part(),
            weight_i: part(),
            weight_j: part(),
            weight_k: part(),
            bias: self.bias.then(|| {
                Param::from_tensor(Tensor::zeros(
                    [QUATERNION_COMPONENTS * out_channels],
                    device,
                ))
            }),
            in_channels,
            out_channels,
            stride: self.stride,
            padding: self.padding,
        }
    }
}

/// Quaternion convolution: every output quaternion is the sum of Hamilton
/// products between kernel quaternions and input quaternions.
#[derive(Module, Debug)]
pub struct QConv2d<B: Backend> {
    pub weight_r: Param<Tensor<B, 4>>,
    pub weight_i: Param<Tensor<B, 4>>,
    pub weight_j: Param<Tensor<B, 4>>,
    pub weight_k: Param<Tensor<B, 4>>,
    /// Component-major bias `[4 * out]`.
    pub bias: Option<Param<Tensor<B, 1>>>,
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    padding: usize,
}

impl<B: Backend> QConv2d<B> {
    /// # Shapes
    ///   - Input `[batch, in, 4, height, width]`
    ///   - Output `[batch, out, 4, height_out, width_out]`
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        assert_quaternion_field(&x);
        let [_, channels, _, _, _] = x.dims();
        assert_eq!(
            channels, self.in_channels,
            "quaternion conv expects {} input channels, got {channels}",
            self.in_channels
        );

        let weight = hamilton_matrix(
            self.weight_r.val(),
            self.weight_i.val(),
            self.weight_j.val(),
            self.weight_k.val(),
        );
        let options = ConvOptions::new(
            [self.stride, self.stride],
            [self.padding, self.padding],
            [1, 1],
            1,
        );
        let output = conv2d(
            to_component_major(x),
            weight,
            self.bias.as_ref().map(|bias| bias.val()),
            options,
        );

        from_component_major(output, self.out_channels)
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}
