//! Utility functions for detector input preparation

use crate::error::DetectError;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};

const PAD_VALUE: u8 = 114;

/// Geometry of a letterbox resize, used to map boxes back to the source image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Map a point from network input space back to source pixels
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resize `image` into a `size`x`size` canvas keeping its aspect ratio
pub fn letterbox(image: &DynamicImage, size: u32) -> Result<(RgbImage, Letterbox), DetectError> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(DetectError::Decode("Image has zero dimensions".to_string()));
    }
    if size == 0 {
        return Err(DetectError::Inference("Input size cannot be zero".to_string()));
    }

    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);

    let resized = imageops::resize(&image.to_rgb8(), new_w, new_h, FilterType::Triangle);

    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    Ok((
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    ))
}

/// Convert packed RGB into a normalized `[3, H, W]` float buffer
pub fn rgb_to_chw(image: &RgbImage) -> Vec<f32> {
    let plane = (image.width() * image.height()) as usize;
    let mut chw = vec![0.0f32; plane * 3];
    for (idx, pixel) in image.pixels().enumerate() {
        chw[idx] = pixel[0] as f32 / 255.0;
        chw[plane + idx] = pixel[1] as f32 / 255.0;
        chw[2 * plane + idx] = pixel[2] as f32 / 255.0;
    }
    chw
}
