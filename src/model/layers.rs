use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        InstanceNorm, InstanceNormConfig, LeakyRelu, LeakyReluConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};

use crate::model::spectral_norm::{SpectralNormConv2d, SpectralNormConv2dConfig};

/// Normalization variant of a [`ResidualBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResidualMode {
    /// Instance norms carry a learnable per-channel scale and shift.
    #[default]
    Affine,
    /// Normalization only, used by the source encoder and decoder path.
    Target,
}

impl ResidualMode {
    fn affine(self) -> bool {
        matches!(self, ResidualMode::Affine)
    }
}

pub(crate) fn conv2d<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    padding: usize,
    bias: bool,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(bias)
        .init(device)
}

fn instance_norm<B: Backend>(channels: usize, affine: bool, device: &B::Device) -> InstanceNorm<B> {
    InstanceNormConfig::new(channels)
        .with_affine(affine)
        .init(device)
}

/// Spectrally normalized 4x4 convolution followed by a leaky ReLU.
#[derive(Module, Debug)]
pub struct DiscBlock<B: Backend> {
    conv: SpectralNormConv2d<B>,
    lrelu: LeakyRelu,
}
impl<B: Backend> DiscBlock<B> {
    pub fn new(channels: [usize; 2], stride: usize, device: &B::Device) -> Self {
        let conv = SpectralNormConv2dConfig::new(channels)
            .with_stride([stride, stride])
            .init(device);
        let lrelu = LeakyReluConfig::new().with_negative_slope(0.01).init();

        Self { conv, lrelu }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv.forward(input);
        self.lrelu.forward(output)
    }
}

/// Convolution, instance norm, ReLU. The building block of both encoders.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: InstanceNorm<B>,
    relu: Relu,
}
impl<B: Backend> ConvBlock<B> {
    pub fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        padding: usize,
        affine: bool,
        device: &B::Device,
    ) -> Self {
        let conv = conv2d(channels, kernel, stride, padding, false, device);
        let norm = instance_norm(channels[1], affine, device);
        let relu = Relu::new();

        Self { conv, norm, relu }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv.forward(input);
        let output = self.norm.forward(output);
        self.relu.forward(output)
    }
}

/// Transposed 4x4 stride-2 convolution doubling the spatial size, followed by
/// a non-affine instance norm and ReLU.
#[derive(Module, Debug)]
pub struct UpBlock<B: Backend> {
    conv: ConvTranspose2d<B>,
    norm: InstanceNorm<B>,
    relu: Relu,
}
impl<B: Backend> UpBlock<B> {
    pub fn new(channels: [usize; 2], device: &B::Device) -> Self {
        let conv = ConvTranspose2dConfig::new(channels, [4, 4])
            .with_stride([2, 2])
            .with_padding([1, 1])
            .with_bias(false)
            .init(device);
        let norm = instance_norm(channels[1], false, device);
        let relu = Relu::new();

        Self { conv, norm, relu }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv.forward(input);
        let output = self.norm.forward(output);
        self.relu.forward(output)
    }
}

/// Positional normalization: every pixel is normalized across its channels.
#[derive(Module, Debug, Clone)]
pub struct Pono {
    epsilon: f64,
}
impl Pono {
    pub fn new() -> Self {
        Self { epsilon: 1e-5 }
    }

    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mean = input.clone().mean_dim(1);
        let centered = input.sub(mean);
        let var = centered.clone().powf_scalar(2.0).mean_dim(1);

        centered.div(var.add_scalar(self.epsilon).sqrt())
    }
}

impl Default for Pono {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: InstanceNorm<B>,
    conv2: Conv2d<B>,
    norm2: InstanceNorm<B>,
    relu: Relu,
}
impl<B: Backend> ResidualBlock<B> {
    pub fn new(channels: [usize; 2], mode: ResidualMode, device: &B::Device) -> Self {
        let affine = mode.affine();
        let conv1 = conv2d(channels, 3, 1, 1, false, device);
        let norm1 = instance_norm(channels[1], affine, device);
        let conv2 = conv2d([channels[1], channels[1]], 3, 1, 1, false, device);
        let norm2 = instance_norm(channels[1], affine, device);
        let relu = Relu::new();

        Self {
            conv1,
            norm1,
            conv2,
            norm2,
            relu,
        }
    }

    /// The residual branch alone, without the skip connection.
    pub fn main(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv1.forward(input);
        let output = self.norm1.forward(output);
        let output = self.relu.forward(output);
        let output = self.conv2.forward(output);
        self.norm2.forward(output)
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.main(input.clone());
        input.add(output)
    }
}

/// Residual block whose two stages are positionally normalized and then
/// modulated by `(gamma + 1) * x + beta`, with gamma and beta predicted from a
/// conditioning tensor.
#[derive(Module, Debug)]
pub struct StyleResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    beta1: Conv2d<B>,
    gamma1: Conv2d<B>,
    conv2: Conv2d<B>,
    beta2: Conv2d<B>,
    gamma2: Conv2d<B>,
    pono: Pono,
    relu: Relu,
}
impl<B: Backend> StyleResidualBlock<B> {
    pub fn new(channels: [usize; 2], device: &B::Device) -> Self {
        let [dim_in, dim_out] = channels;

        Self {
            conv1: conv2d(channels, 3, 1, 1, false, device),
            beta1: conv2d(channels, 3, 1, 1, true, device),
            gamma1: conv2d(channels, 3, 1, 1, true, device),
            conv2: conv2d([dim_out, dim_out], 3, 1, 1, false, device),
            beta2: conv2d([dim_in, dim_out], 3, 1, 1, true, device),
            gamma2: conv2d([dim_in, dim_out], 3, 1, 1, true, device),
            pono: Pono::new(),
            relu: Relu::new(),
        }
    }

    /// `input` is `[batch, dim_in, h, w]`, `style` is `[batch, dim_in, h, w]`.
    pub fn forward(&self, input: Tensor<B, 4>, style: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.pono.forward(self.conv1.forward(input.clone()));
        let output = modulate(
            output,
            self.gamma1.forward(style.clone()),
            self.beta1.forward(style.clone()),
        );

        let output = self.relu.forward(output);
        let output = self.pono.forward(self.conv2.forward(output));
        let output = modulate(
            output,
            self.gamma2.forward(style.clone()),
            self.beta2.forward(style),
        );

        input.add(output)
    }
}

fn modulate<B: Backend>(x: Tensor<B, 4>, gamma: Tensor<B, 4>, beta: Tensor<B, 4>) -> Tensor<B, 4> {
    gamma.add_scalar(1.0).mul(x).add(beta)
}
