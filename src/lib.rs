pub mod config;
pub mod error;
pub mod model;
pub mod registry;
pub mod utils;

pub use error::PsganError;
pub use model::{
    discriminator::{NLayerDiscriminator, NLayerDiscriminatorConfig},
    generator::{
        GeneratorPsganAttention, GeneratorPsganAttentionConfig, MaNet, MaNetConfig,
        TransferGuidance,
    },
    Psgan, PsganConfig,
};

use burn::{
    backend::NdArray,
    tensor::{Device, Tensor, TensorData},
};
use wasm_bindgen::prelude::*;

type MyBackend = NdArray<f32>;

/// Makeup transfer entry point for the browser.
#[wasm_bindgen]
pub struct MakeupTransfer {
    generator: GeneratorPsganAttention<MyBackend>,
    device: Device<MyBackend>,
}

#[wasm_bindgen]
impl MakeupTransfer {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        let device = Default::default();
        let generator = GeneratorPsganAttentionConfig::new().init(&device);

        Self { generator, device }
    }

    /// Applies the makeup of `reference` to `source`.
    ///
    /// Both images are interleaved RGB buffers of `width * height * 3` values
    /// in `0..=255`. The result uses the same layout.
    #[wasm_bindgen]
    pub fn transfer(
        &self,
        source: Vec<f32>,
        reference: Vec<f32>,
        width: usize,
        height: usize,
    ) -> Result<Vec<f32>, JsValue> {
        check_buffers(source.len(), reference.len(), width, height)
            .map_err(|err| JsValue::from_str(&err.to_string()))?;

        let source = self.to_tensor(source, width, height);
        let reference = self.to_tensor(reference, width, height);

        let (output, _) = self
            .generator
            .try_forward(source, reference, TransferGuidance::default())
            .map_err(|err| JsValue::from_str(&err.to_string()))?;
        let output: Tensor<MyBackend, 3> = output.squeeze(0);

        let data = output
            .permute([1, 2, 0])
            .into_data()
            .iter::<f32>()
            .map(|c| 255.0 * ((c + 1.0) / 2.0))
            .collect::<Vec<_>>();

        Ok(data)
    }

    fn to_tensor(&self, image: Vec<f32>, width: usize, height: usize) -> Tensor<MyBackend, 4> {
        let image = image
            .into_iter()
            .map(|c| c / 127.5 - 1.0)
            .collect::<Vec<_>>();

        Tensor::<MyBackend, 3>::from_data(TensorData::new(image, [height, width, 3]), &self.device)
            .permute([2, 0, 1])
            .unsqueeze()
    }
}

/// Both sides must be positive multiples of 4 and each buffer must hold
/// `width * height * 3` values.
fn check_buffers(
    source_len: usize,
    reference_len: usize,
    width: usize,
    height: usize,
) -> error::Result<()> {
    if width == 0 || height == 0 || width % 4 != 0 || height % 4 != 0 {
        return Err(PsganError::InvalidInput(format!(
            "image sides must be positive multiples of 4, got {width}x{height}"
        )));
    }

    let expected = width * height * 3;
    if source_len != expected || reference_len != expected {
        return Err(PsganError::InvalidInput(format!(
            "expected {expected} values per image, got {source_len} and {reference_len}"
        )));
    }

    Ok(())
}

impl Default for MakeupTransfer {
    fn default() -> Self {
        Self::new()
    }
}
