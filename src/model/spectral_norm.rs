use burn::{
    module::{Module, Param, RunningState},
    nn::{conv::Conv2dConfig, PaddingConfig2d},
    prelude::*,
    tensor::{module::conv2d, ops::ConvOptions, Distribution},
};

const EPS: f64 = 1e-12;

/// Configuration for a [`SpectralNormConv2d`].
#[derive(Config, Debug)]
pub struct SpectralNormConv2dConfig {
    pub channels: [usize; 2],
    #[config(default = "[4, 4]")]
    pub kernel_size: [usize; 2],
    #[config(default = "[1, 1]")]
    pub stride: [usize; 2],
    #[config(default = "[1, 1]")]
    pub padding: [usize; 2],
    #[config(default = true)]
    pub bias: bool,
}

/// 2D convolution whose weight is divided by an estimate of its largest
/// singular value before every use.
///
/// The estimate is kept as a pair of running vectors `u` / `v`. When the
/// backend tracks gradients, each forward pass refines them with one step of
/// power iteration; otherwise the cached vectors are used as is.
#[derive(Module, Debug)]
pub struct SpectralNormConv2d<B: Backend> {
    weight: Param<Tensor<B, 4>>,
    bias: Option<Param<Tensor<B, 1>>>,
    u: RunningState<Tensor<B, 2>>,
    v: RunningState<Tensor<B, 2>>,
    stride: [usize; 2],
    padding: [usize; 2],
}

impl SpectralNormConv2dConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SpectralNormConv2d<B> {
        let conv = Conv2dConfig::new(self.channels, self.kernel_size)
            .with_stride(self.stride)
            .with_padding(PaddingConfig2d::Explicit(self.padding[0], self.padding[1]))
            .with_bias(self.bias)
            .init(device);

        let weight_mat = weight_matrix(conv.weight.val()).detach();
        let [rows, _] = weight_mat.dims();
        let u = normalize(Tensor::random(
            [rows, 1],
            Distribution::Normal(0.0, 1.0),
            device,
        ));
        let v = normalize(weight_mat.transpose().matmul(u.clone()));

        SpectralNormConv2d {
            weight: conv.weight,
            bias: conv.bias,
            u: RunningState::new(u),
            v: RunningState::new(v),
            stride: self.stride,
            padding: self.padding,
        }
    }
}

impl<B: Backend> SpectralNormConv2d<B> {
    /// # Shapes
    ///
    /// - input: `[batch, channels_in, height, width]`
    /// - output: `[batch, channels_out, height_out, width_out]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let weight = self.normalized_weight();
        let bias = self.bias.as_ref().map(|bias| bias.val());

        conv2d(
            input,
            weight,
            bias,
            ConvOptions::new(self.stride, self.padding, [1, 1], 1),
        )
    }

    /// The convolution weight scaled by `1 / sigma`.
    pub fn normalized_weight(&self) -> Tensor<B, 4> {
        let weight = self.weight.val();
        let device = weight.device();
        let weight_mat = weight_matrix(weight.clone());

        let (u, v) = match B::ad_enabled() {
            true => {
                let u = self.u.value_sync().to_device(&device);
                let (u, v) = power_iteration(weight_mat.clone().detach(), u);
                self.u.update(u.clone());
                self.v.update(v.clone());
                (u, v)
            }
            false => (
                self.u.value().to_device(&device),
                self.v.value().to_device(&device),
            ),
        };

        let sigma = u.transpose().matmul(weight_mat.matmul(v));
        weight.div(sigma.reshape([1, 1, 1, 1]))
    }
}

/// One power-iteration step on `w` starting from the left vector `u`.
///
/// Returns the refreshed `(u, v)` pair, both unit length, so that
/// `uᵀ·w·v` approximates the largest singular value of `w`.
pub fn power_iteration<B: Backend>(
    w: Tensor<B, 2>,
    u: Tensor<B, 2>,
) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let v = normalize(w.clone().transpose().matmul(u));
    let u = normalize(w.matmul(v.clone()));

    (u, v)
}

fn weight_matrix<B: Backend>(weight: Tensor<B, 4>) -> Tensor<B, 2> {
    let [out, channels, kh, kw] = weight.dims();
    weight.reshape([out, channels * kh * kw])
}

fn normalize<B: Backend>(vector: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = vector.clone().powf_scalar(2.0).sum_dim(0).sqrt();
    vector.div(norm.add_scalar(EPS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MyBackend;
    use burn::backend::Autodiff;

    type MyAutodiffBackend = Autodiff<MyBackend>;

    #[test]
    fn power_iteration_finds_largest_singular_value() {
        let device = Default::default();
        let w = Tensor::<MyBackend, 2>::from_floats([[3.0, 0.0], [0.0, 1.0]], &device);
        let u0 = Tensor::<MyBackend, 2>::from_floats([[1.0], [1.0]], &device);

        let u = (0..29).fold(u0, |u, _| power_iteration(w.clone(), u).0);
        let (u, v) = power_iteration(w.clone(), u);
        let sigma = u
            .transpose()
            .matmul(w.matmul(v))
            .into_scalar()
            .elem::<f32>();

        assert!((sigma - 3.0).abs() < 1e-4, "sigma = {sigma}");
    }

    #[test]
    fn training_mode_converges_to_unit_spectral_norm() {
        let device = Default::default();
        let mut conv = SpectralNormConv2dConfig::new([2, 2])
            .with_kernel_size([1, 1])
            .with_padding([0, 0])
            .with_bias(false)
            .init::<MyAutodiffBackend>(&device);
        conv.weight = Param::from_tensor(
            Tensor::<MyAutodiffBackend, 2>::from_floats([[3.0, 0.0], [0.0, 1.0]], &device)
                .reshape([2, 2, 1, 1]),
        );

        let input = Tensor::<MyAutodiffBackend, 4>::ones([1, 2, 2, 2], &device);
        for _ in 0..20 {
            let _ = conv.forward(input.clone());
        }

        let normalized = conv
            .normalized_weight()
            .reshape([4])
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let expected = [1.0, 0.0, 0.0, 1.0 / 3.0];
        for (got, want) in normalized.iter().zip(expected) {
            assert!((got - want).abs() < 1e-3, "{normalized:?}");
        }
    }

    #[test]
    fn inference_mode_reuses_cached_estimate() {
        let device = Default::default();
        let conv = SpectralNormConv2dConfig::new([3, 4])
            .with_stride([2, 2])
            .init::<MyBackend>(&device);
        let input = Tensor::<MyBackend, 4>::random([1, 3, 8, 8], Distribution::Default, &device);

        let u_before = conv.u.value().into_data();
        let first = conv.forward(input.clone()).into_data();
        let second = conv.forward(input).into_data();

        assert_eq!(first, second);
        assert_eq!(u_before, conv.u.value().into_data());
    }

    #[test]
    fn output_shape_follows_stride() {
        let device = Default::default();
        let conv = SpectralNormConv2dConfig::new([3, 8])
            .with_stride([2, 2])
            .init::<MyBackend>(&device);
        let input = Tensor::<MyBackend, 4>::zeros([2, 3, 16, 16], &device);

        assert_eq!(conv.forward(input).dims(), [2, 8, 8, 8]);
    }
}
