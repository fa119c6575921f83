use burn::{
    module::Module,
    nn::conv::Conv2d,
    prelude::*,
    tensor::activation::{softmax, tanh},
};

use crate::{
    error::{self, ensure_positive, PsganError},
    model::{
        encoder::{Encoder, EncoderConfig, GetMatrix},
        layers::{conv2d, ResidualBlock, ResidualMode, UpBlock},
    },
};

/// Sharpens the feature correlation before the softmax.
const CORRELATION_SCALE: f64 = 200.0;
/// Logit offset applied to source/reference pairs rejected by the consistency mask.
const MASK_PENALTY: f64 = 100.0;

/// Optional inputs steering the source/reference correspondence.
///
/// Positional embeddings are `[batch, channels, height * width]` and are
/// appended to the flattened features before correlation. The consistency
/// mask is `[batch, src_locations, ref_locations]`, 1 for valid pairs and 0
/// for pairs to suppress. `mask_x` / `mask_y` are region masks for the source
/// and reference; they are carried along for callers but do not take part in
/// the forward computation.
#[derive(Debug, Clone)]
pub struct TransferGuidance<B: Backend> {
    pub x_p: Option<Tensor<B, 3>>,
    pub y_p: Option<Tensor<B, 3>>,
    pub consistency_mask: Option<Tensor<B, 3>>,
    pub mask_x: Option<Tensor<B, 4>>,
    pub mask_y: Option<Tensor<B, 4>>,
}

impl<B: Backend> Default for TransferGuidance<B> {
    fn default() -> Self {
        Self {
            x_p: None,
            y_p: None,
            consistency_mask: None,
            mask_x: None,
            mask_y: None,
        }
    }
}

impl<B: Backend> TransferGuidance<B> {
    pub fn with_positional(mut self, x_p: Tensor<B, 3>, y_p: Tensor<B, 3>) -> Self {
        self.x_p = Some(x_p);
        self.y_p = Some(y_p);
        self
    }

    pub fn with_consistency_mask(mut self, mask: Tensor<B, 3>) -> Self {
        self.consistency_mask = Some(mask);
        self
    }

    pub fn with_region_masks(mut self, mask_x: Tensor<B, 4>, mask_y: Tensor<B, 4>) -> Self {
        self.mask_x = Some(mask_x);
        self.mask_y = Some(mask_y);
        self
    }

    fn check(
        &self,
        batch: usize,
        src_locations: usize,
        ref_locations: usize,
    ) -> error::Result<()> {
        let x_channels = check_positional("x_p", self.x_p.as_ref(), batch, src_locations)?;
        let y_channels = check_positional("y_p", self.y_p.as_ref(), batch, ref_locations)?;
        if x_channels != y_channels {
            return Err(PsganError::ShapeMismatch {
                context: "positional embedding channels",
                expected: vec![x_channels],
                actual: vec![y_channels],
            });
        }

        if let Some(mask) = &self.consistency_mask {
            let expected = [batch, src_locations, ref_locations];
            if mask.dims() != expected {
                return Err(PsganError::ShapeMismatch {
                    context: "consistency_mask",
                    expected: expected.to_vec(),
                    actual: mask.dims().to_vec(),
                });
            }
        }

        Ok(())
    }
}

fn check_positional<B: Backend>(
    context: &'static str,
    embedding: Option<&Tensor<B, 3>>,
    batch: usize,
    locations: usize,
) -> error::Result<usize> {
    let Some(embedding) = embedding else {
        return Ok(0);
    };

    let [emb_batch, channels, emb_locations] = embedding.dims();
    if emb_batch != batch || emb_locations != locations {
        return Err(PsganError::ShapeMismatch {
            context,
            expected: vec![batch, channels, locations],
            actual: vec![emb_batch, channels, emb_locations],
        });
    }

    Ok(channels)
}

/// Source images must be RGB with sides that are positive multiples of 4, so
/// that the two stride-2 stages and the two upsamplers restore the input size.
fn check_source<B: Backend>(source: &Tensor<B, 4>) -> error::Result<()> {
    let [batch, channels, height, width] = source.dims();
    let fits = |side: usize| side > 0 && side % 4 == 0;
    if channels != 3 || !fits(height) || !fits(width) {
        return Err(PsganError::ShapeMismatch {
            context: "source image",
            expected: vec![batch, 3, round_up(height), round_up(width)],
            actual: source.dims().to_vec(),
        });
    }

    Ok(())
}

fn round_up(side: usize) -> usize {
    side.next_multiple_of(4).max(4)
}

/// Makeup-apply network.
///
/// Encodes the source image, aligns it with the encoded reference through a
/// soft correspondence matrix, transfers the reference's per-location
/// makeup statistics onto the source grid and decodes the result.
#[derive(Module, Debug)]
pub struct MaNet<B: Backend> {
    encoder: Encoder<B>,
    simple_spade: GetMatrix<B>,
    bottlenecks: Vec<ResidualBlock<B>>,
    upsamplers: Vec<UpBlock<B>>,
    img_reg: Conv2d<B>,
    w: f64,
}
impl<B: Backend> MaNet<B> {
    /// Returns the generated image `[batch, 3, h, w]` and the correspondence
    /// matrix `[batch, src_locations, ref_locations]`.
    ///
    /// # Panics
    ///
    /// On incompatible guidance shapes. Use [`MaNet::try_forward`] to get an
    /// error instead.
    pub fn forward(
        &self,
        source: Tensor<B, 4>,
        style: Tensor<B, 4>,
        guidance: TransferGuidance<B>,
    ) -> (Tensor<B, 4>, Tensor<B, 3>) {
        let features = self.encoder.forward(source);
        self.transfer(features, style, guidance)
    }

    pub fn try_forward(
        &self,
        source: Tensor<B, 4>,
        style: Tensor<B, 4>,
        guidance: TransferGuidance<B>,
    ) -> error::Result<(Tensor<B, 4>, Tensor<B, 3>)> {
        check_source(&source)?;
        let features = self.encoder.forward(source);

        let [batch, channels, height, width] = features.dims();
        let [style_batch, style_channels, style_height, style_width] = style.dims();
        if [style_batch, style_channels] != [batch, channels] {
            return Err(PsganError::ShapeMismatch {
                context: "reference features",
                expected: vec![batch, channels, style_height, style_width],
                actual: style.dims().to_vec(),
            });
        }
        guidance.check(batch, height * width, style_height * style_width)?;

        Ok(self.transfer(features, style, guidance))
    }

    fn transfer(
        &self,
        features: Tensor<B, 4>,
        style: Tensor<B, 4>,
        guidance: TransferGuidance<B>,
    ) -> (Tensor<B, 4>, Tensor<B, 3>) {
        let [batch, channels, height, width] = features.dims();
        let [_, style_channels, style_height, style_width] = style.dims();

        let x_flat = features
            .clone()
            .reshape([batch, channels, height * width])
            .mul_scalar(self.w);
        let x_flat = append_positional(x_flat, guidance.x_p);
        let y_flat = style
            .clone()
            .reshape([batch, style_channels, style_height * style_width])
            .mul_scalar(self.w);
        let y_flat = append_positional(y_flat, guidance.y_p);

        let logits = x_flat
            .swap_dims(1, 2)
            .matmul(y_flat)
            .mul_scalar(CORRELATION_SCALE);
        let logits = match guidance.consistency_mask {
            Some(mask) => logits.sub(mask.neg().add_scalar(1.0).mul_scalar(MASK_PENALTY)),
            None => logits,
        };
        let attention = softmax(logits, 2);

        let (gamma, beta) = self.simple_spade.forward(style);
        let gamma = gather(attention.clone(), gamma, [batch, height, width]);
        let beta = gather(attention.clone(), beta, [batch, height, width]);
        let output = features.mul(gamma.add_scalar(1.0)).add(beta);

        let output = self
            .bottlenecks
            .iter()
            .fold(output, |output, block| block.forward(output));
        let output = self
            .upsamplers
            .iter()
            .fold(output, |output, block| block.forward(output));
        let output = self.img_reg.forward(output);

        (tanh(output), attention)
    }
}

fn append_positional<B: Backend>(
    features: Tensor<B, 3>,
    embedding: Option<Tensor<B, 3>>,
) -> Tensor<B, 3> {
    match embedding {
        Some(embedding) => Tensor::cat(vec![features, embedding], 1),
        None => features,
    }
}

/// Moves a single-channel reference field onto the source grid:
/// every source location takes the attention-weighted sum of the field.
fn gather<B: Backend>(
    attention: Tensor<B, 3>,
    field: Tensor<B, 4>,
    [batch, height, width]: [usize; 3],
) -> Tensor<B, 4> {
    let [_, _, field_height, field_width] = field.dims();
    attention
        .matmul(field.reshape([batch, field_height * field_width, 1]))
        .reshape([batch, 1, height, width])
}

#[derive(Config, Debug)]
pub struct MaNetConfig {
    #[config(default = 64)]
    pub conv_dim: usize,
    #[config(default = 3)]
    pub repeat_num: usize,
    /// Scale applied to both feature sets before correlation.
    #[config(default = 0.01)]
    pub w: f64,
}
impl MaNetConfig {
    pub fn validate(&self) -> error::Result<()> {
        ensure_positive("conv_dim", self.conv_dim)?;
        ensure_positive("repeat_num", self.repeat_num)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> MaNet<B> {
        let encoder = EncoderConfig::t_net_down(self.conv_dim, self.repeat_num).init(device);
        let mut curr_dim = self.conv_dim * 4;
        let simple_spade = GetMatrix::new([curr_dim, 1], device);

        let bottlenecks = (0..self.repeat_num)
            .map(|_| ResidualBlock::new([curr_dim, curr_dim], ResidualMode::Target, device))
            .collect();

        let mut upsamplers = Vec::with_capacity(2);
        for _ in 0..2 {
            upsamplers.push(UpBlock::new([curr_dim, curr_dim / 2], device));
            curr_dim /= 2;
        }
        let img_reg = conv2d([curr_dim, 3], 7, 1, 3, false, device);

        MaNet {
            encoder,
            simple_spade,
            bottlenecks,
            upsamplers,
            img_reg,
            w: self.w,
        }
    }
}

/// PSGAN generator with attentive makeup morphing: encodes the reference
/// with MDNet and hands the result to [`MaNet`].
#[derive(Module, Debug)]
pub struct GeneratorPsganAttention<B: Backend> {
    ma_net: MaNet<B>,
    md_net: Encoder<B>,
}
impl<B: Backend> GeneratorPsganAttention<B> {
    /// `source` and `reference` are `[batch, 3, h, w]` images in `[-1, 1]`.
    pub fn forward(
        &self,
        source: Tensor<B, 4>,
        reference: Tensor<B, 4>,
        guidance: TransferGuidance<B>,
    ) -> (Tensor<B, 4>, Tensor<B, 3>) {
        let style = self.md_net.forward(reference);
        self.ma_net.forward(source, style, guidance)
    }

    pub fn try_forward(
        &self,
        source: Tensor<B, 4>,
        reference: Tensor<B, 4>,
        guidance: TransferGuidance<B>,
    ) -> error::Result<(Tensor<B, 4>, Tensor<B, 3>)> {
        check_source(&source)?;
        let [batch, ..] = source.dims();
        let [ref_batch, ref_channels, ref_height, ref_width] = reference.dims();
        if ref_batch != batch || ref_channels != 3 {
            return Err(PsganError::ShapeMismatch {
                context: "reference image",
                expected: vec![batch, 3, ref_height, ref_width],
                actual: reference.dims().to_vec(),
            });
        }

        let style = self.md_net.forward(reference);
        self.ma_net.try_forward(source, style, guidance)
    }
}

#[derive(Config, Debug)]
pub struct GeneratorPsganAttentionConfig {
    #[config(default = 64)]
    pub conv_dim: usize,
    #[config(default = 3)]
    pub repeat_num: usize,
}
impl GeneratorPsganAttentionConfig {
    pub fn validate(&self) -> error::Result<()> {
        ensure_positive("conv_dim", self.conv_dim)?;
        ensure_positive("repeat_num", self.repeat_num)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> GeneratorPsganAttention<B> {
        let ma_net = MaNetConfig::new()
            .with_conv_dim(self.conv_dim)
            .with_repeat_num(self.repeat_num)
            .init(device);
        let md_net = EncoderConfig::md_net(self.conv_dim, self.repeat_num).init(device);

        let generator = GeneratorPsganAttention { ma_net, md_net };
        tracing::debug!(
            conv_dim = self.conv_dim,
            repeat_num = self.repeat_num,
            params = generator.num_params(),
            "built GeneratorPSGANAttention"
        );

        generator
    }
}
