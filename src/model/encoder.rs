use burn::{module::Module, nn::conv::Conv2d, prelude::*};

use crate::{
    error::{self, ensure_positive},
    model::layers::{conv2d, ConvBlock, ResidualBlock, ResidualMode},
};

/// Down-sampling image encoder shared by MDNet (reference image) and TNetDown
/// (source image).
///
/// A 7x7 stem, two stride-2 stages doubling the channels, then a bottleneck of
/// residual blocks. The output has `4 * conv_dim` channels at a quarter of the
/// input resolution.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    stem: ConvBlock<B>,
    down: Vec<ConvBlock<B>>,
    bottlenecks: Vec<ResidualBlock<B>>,
}
impl<B: Backend> Encoder<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.stem.forward(input);
        let output = self
            .down
            .iter()
            .fold(output, |output, block| block.forward(output));

        self.bottlenecks
            .iter()
            .fold(output, |output, block| block.forward(output))
    }
}

#[derive(Config, Debug)]
pub struct EncoderConfig {
    #[config(default = 64)]
    pub conv_dim: usize,
    #[config(default = 3)]
    pub repeat_num: usize,
    /// Learnable scale/shift on every instance norm.
    #[config(default = true)]
    pub affine: bool,
}
impl EncoderConfig {
    /// Reference encoder: affine instance norms throughout.
    pub fn md_net(conv_dim: usize, repeat_num: usize) -> Self {
        Self::new()
            .with_conv_dim(conv_dim)
            .with_repeat_num(repeat_num)
            .with_affine(true)
    }

    /// Source encoder: no learned normalization bias anywhere.
    pub fn t_net_down(conv_dim: usize, repeat_num: usize) -> Self {
        Self::new()
            .with_conv_dim(conv_dim)
            .with_repeat_num(repeat_num)
            .with_affine(false)
    }

    pub fn validate(&self) -> error::Result<()> {
        ensure_positive("conv_dim", self.conv_dim)?;
        ensure_positive("repeat_num", self.repeat_num)
    }

    pub fn out_channels(&self) -> usize {
        self.conv_dim * 4
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Encoder<B> {
        let stem = ConvBlock::new([3, self.conv_dim], 7, 1, 3, self.affine, device);

        let mut curr_dim = self.conv_dim;
        let mut down = Vec::with_capacity(2);
        for _ in 0..2 {
            down.push(ConvBlock::new(
                [curr_dim, curr_dim * 2],
                4,
                2,
                1,
                self.affine,
                device,
            ));
            curr_dim *= 2;
        }

        let mode = match self.affine {
            true => ResidualMode::Affine,
            false => ResidualMode::Target,
        };
        let bottlenecks = (0..self.repeat_num)
            .map(|_| ResidualBlock::new([curr_dim, curr_dim], mode, device))
            .collect();

        Encoder {
            stem,
            down,
            bottlenecks,
        }
    }
}

/// Two parallel 1x1 convolutions predicting per-pixel `gamma` and `beta` maps.
#[derive(Module, Debug)]
pub struct GetMatrix<B: Backend> {
    get_gamma: Conv2d<B>,
    get_beta: Conv2d<B>,
}
impl<B: Backend> GetMatrix<B> {
    pub fn new(channels: [usize; 2], device: &B::Device) -> Self {
        Self {
            get_gamma: conv2d(channels, 1, 1, 0, false, device),
            get_beta: conv2d(channels, 1, 1, 0, false, device),
        }
    }

    /// Returns `(gamma, beta)`, each `[batch, dim_out, h, w]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let gamma = self.get_gamma.forward(input.clone());
        let beta = self.get_beta.forward(input);

        (gamma, beta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MyBackend;
    use burn::tensor::Distribution;

    #[test]
    fn encoder_quarters_resolution() {
        let device = Default::default();
        let config = EncoderConfig::md_net(4, 1);
        let encoder = config.init::<MyBackend>(&device);
        let input = Tensor::<MyBackend, 4>::random([2, 3, 32, 24], Distribution::Default, &device);

        assert_eq!(encoder.forward(input).dims(), [2, config.out_channels(), 8, 6]);
    }

    #[test]
    fn t_net_down_has_no_normalization_parameters() {
        let device = Default::default();
        let conv_dim = 4;
        let repeat_num = 2;
        let md_net = EncoderConfig::md_net(conv_dim, repeat_num).init::<MyBackend>(&device);
        let t_net = EncoderConfig::t_net_down(conv_dim, repeat_num).init::<MyBackend>(&device);

        // Stem, two down stages and two norms per bottleneck block.
        let norm_channels = conv_dim + 2 * conv_dim + 4 * conv_dim + repeat_num * 2 * 4 * conv_dim;
        assert_eq!(md_net.num_params() - t_net.num_params(), 2 * norm_channels);
    }

    #[test]
    fn get_matrix_returns_single_channel_maps() {
        let device = Default::default();
        let matrix = GetMatrix::<MyBackend>::new([16, 1], &device);
        let input = Tensor::<MyBackend, 4>::zeros([3, 16, 5, 5], &device);

        let (gamma, beta) = matrix.forward(input);
        assert_eq!(gamma.dims(), [3, 1, 5, 5]);
        assert_eq!(beta.dims(), [3, 1, 5, 5]);
        assert_eq!(matrix.num_params(), 2 * 16);
    }
}
