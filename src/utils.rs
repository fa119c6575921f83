use burn::prelude::*;
use image::{imageops::FilterType, RgbImage};
use std::path::Path;

use crate::error::Result;

/// Loads an RGB image and resizes it to `size` x `size`.
pub fn load_image<P: AsRef<Path>>(path: P, size: u32) -> Result<RgbImage> {
    let image = image::open(path)?.to_rgb8();
    Ok(image::imageops::resize(&image, size, size, FilterType::Triangle))
}

/// Converts an image into a `[3, height, width]` tensor with values in `[-1, 1]`.
pub fn image_to_tensor<B: Backend>(image: &RgbImage, device: &B::Device) -> Tensor<B, 3> {
    let (width, height) = image.dimensions();
    let pixels = image
        .pixels()
        .flat_map(|pixel| pixel.0)
        .map(|c| c as f32 / 127.5 - 1.0)
        .collect::<Vec<_>>();

    // Pixels come out interleaved as [height, width, channel].
    Tensor::<B, 3>::from_data(
        TensorData::new(pixels, [height as usize, width as usize, 3]),
        device,
    )
    .permute([2, 0, 1])
}

/// Converts a `[3, height, width]` tensor with values in `[-1, 1]` back into an image.
pub fn tensor_to_image<B: Backend>(tensor: Tensor<B, 3>) -> RgbImage {
    let [_, height, width] = tensor.dims();
    let pixels = tensor
        .permute([1, 2, 0])
        .into_data()
        .iter::<f32>()
        .map(to_pixel)
        .collect::<Vec<_>>();

    let mut image = RgbImage::new(width as u32, height as u32);
    for (pixel, rgb) in image.pixels_mut().zip(pixels.chunks_exact(3)) {
        pixel.0 = [rgb[0], rgb[1], rgb[2]];
    }
    image
}

/// Maps a value in `[-1, 1]` to an 8-bit channel value.
pub fn to_pixel(value: f32) -> u8 {
    (255.0 * (value.clamp(-1.0, 1.0) + 1.0) / 2.0).round() as u8
}

/// Saves a `[3, height, width]` tensor as an image file.
pub fn save_image<B: Backend, Q: AsRef<Path>>(tensor: Tensor<B, 3>, path: Q) -> Result<()> {
    tensor_to_image(tensor).save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MyBackend;
    use image::Rgb;

    #[test]
    fn image_tensor_conversion_keeps_pixels() {
        let device = Default::default();
        let mut image = RgbImage::new(3, 2);
        image.put_pixel(0, 0, Rgb([0, 128, 255]));
        image.put_pixel(2, 1, Rgb([10, 20, 30]));

        let tensor = image_to_tensor::<MyBackend>(&image, &device);
        assert_eq!(tensor.dims(), [3, 2, 3]);

        let restored = tensor_to_image(tensor);
        for (before, after) in image.pixels().zip(restored.pixels()) {
            for (a, b) in before.0.iter().zip(after.0) {
                assert!((*a as i16 - b as i16).abs() <= 1, "{before:?} vs {after:?}");
            }
        }
    }

    #[test]
    fn pixel_mapping_clamps_out_of_range_values() {
        assert_eq!(to_pixel(-2.0), 0);
        assert_eq!(to_pixel(-1.0), 0);
        assert_eq!(to_pixel(1.0), 255);
        assert_eq!(to_pixel(3.0), 255);
    }
}
