use burn::{module::Module, prelude::*};

use crate::{
    error::{self, ensure_positive},
    model::{
        layers::DiscBlock,
        spectral_norm::{SpectralNormConv2d, SpectralNormConv2dConfig},
    },
};

const KERNEL: usize = 4;
const PADDING: usize = 1;

/// PatchGAN discriminator: classifies overlapping image patches and returns
/// one raw logit per patch.
#[derive(Module, Debug)]
pub struct NLayerDiscriminator<B: Backend> {
    blocks: Vec<DiscBlock<B>>,
    out_layer: SpectralNormConv2d<B>,
}
impl<B: Backend> NLayerDiscriminator<B> {
    /// # Shapes
    ///
    /// - input: `[batch, input_nc, height, width]`
    /// - output: `[batch, 1, patches_h, patches_w]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self
            .blocks
            .iter()
            .fold(input, |output, block| block.forward(output));

        self.out_layer.forward(output)
    }
}

#[derive(Config, Debug)]
pub struct NLayerDiscriminatorConfig {
    pub input_nc: usize,
    #[config(default = 64)]
    pub ndf: usize,
    #[config(default = 3)]
    pub n_layers: usize,
}
impl NLayerDiscriminatorConfig {
    pub fn validate(&self) -> error::Result<()> {
        ensure_positive("input_nc", self.input_nc)?;
        ensure_positive("ndf", self.ndf)?;
        ensure_positive("n_layers", self.n_layers)
    }

    /// Side length of the patch map produced for a square input of `input`
    /// pixels, or `None` when the input is too small for `n_layers` stages.
    pub fn output_size(&self, input: usize) -> Option<usize> {
        let strided = (0..self.n_layers).try_fold(input, |size, _| conv_out(size, 2))?;
        conv_out(strided, 1).and_then(|size| conv_out(size, 1))
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> NLayerDiscriminator<B> {
        let mut blocks = Vec::with_capacity(self.n_layers + 1);
        blocks.push(DiscBlock::new([self.input_nc, self.ndf], 2, device));

        let mut nf_mult = 1;
        for n in 1..self.n_layers {
            let nf_mult_prev = nf_mult;
            nf_mult = channel_mult(n);
            blocks.push(DiscBlock::new(
                [self.ndf * nf_mult_prev, self.ndf * nf_mult],
                2,
                device,
            ));
        }

        let nf_mult_prev = nf_mult;
        nf_mult = channel_mult(self.n_layers);
        blocks.push(DiscBlock::new(
            [self.ndf * nf_mult_prev, self.ndf * nf_mult],
            1,
            device,
        ));

        let out_layer = SpectralNormConv2dConfig::new([self.ndf * nf_mult, 1])
            .with_bias(false)
            .init(device);

        let discriminator = NLayerDiscriminator { blocks, out_layer };
        tracing::debug!(
            input_nc = self.input_nc,
            ndf = self.ndf,
            n_layers = self.n_layers,
            params = discriminator.num_params(),
            "built NLayerDiscriminator"
        );

        discriminator
    }
}

fn channel_mult(n: usize) -> usize {
    1 << n.min(3)
}

fn conv_out(input: usize, stride: usize) -> Option<usize> {
    let span = (input + 2 * PADDING).checked_sub(KERNEL)?;
    Some(span / stride + 1)
}
