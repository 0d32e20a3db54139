//! Image codec adapter.
//!
//! Converts between transport text (base64), encoded raster bytes and the
//! float planes used by the pipeline. Everything here is stateless.

use crate::error::{BridgeError, Result};
use crate::tensor::{ImageTensor, MaskTensor, Selection};
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{ColorType, DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use serde::Serialize;
use std::io::Cursor;

/// Whether a raster carries an alpha plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelMode {
    Rgb,
    Rgba,
    /// Anything else (grayscale, luma+alpha, ...); coerced to RGB on selection
    Other,
}

impl ChannelMode {
    pub fn of(image: &DynamicImage) -> Self {
        match image.color() {
            ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => ChannelMode::Rgb,
            ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => ChannelMode::Rgba,
            _ => ChannelMode::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelMode::Rgb => "RGB",
            ChannelMode::Rgba => "RGBA",
            ChannelMode::Other => "OTHER",
        }
    }
}

/// Decode raster bytes (PNG, JPEG or WEBP)
pub fn decode(bytes: &[u8]) -> Result<(DynamicImage, ChannelMode)> {
    let image = image::load_from_memory(bytes).map_err(|e| BridgeError::Decode(e.to_string()))?;
    let mode = ChannelMode::of(&image);
    Ok((image, mode))
}

/// Encode a raster as PNG.
///
/// Float rasters are narrowed to 8 bits first since PNG has no float
/// sample type.
pub fn encode(image: &DynamicImage) -> Result<Vec<u8>> {
    let narrowed;
    let image = match image.color() {
        ColorType::Rgb32F => {
            narrowed = DynamicImage::ImageRgb8(image.to_rgb8());
            &narrowed
        }
        ColorType::Rgba32F => {
            narrowed = DynamicImage::ImageRgba8(image.to_rgba8());
            &narrowed
        }
        _ => image,
    };

    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| BridgeError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

pub fn to_transport_text(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Inverse of [`to_transport_text`]. ASCII whitespace (line wrapping) is ignored.
pub fn from_transport_text(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| BridgeError::Decode(format!("invalid base64: {}", e)))
}

/// Decode transport text straight to a raster
pub fn decode_transport_text(text: &str) -> Result<(DynamicImage, ChannelMode)> {
    let bytes = from_transport_text(text)?;
    decode(&bytes)
}

/// Encode a raster as base64 PNG
pub fn encode_transport_text(image: &DynamicImage) -> Result<String> {
    encode(image).map(|png| to_transport_text(&png))
}

fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0) as u8
}

fn to_unit(value: u8) -> f32 {
    value as f32 / 255.0
}

/// Build an 8-bit raster from a float plane (1, 3 or 4 channels)
pub fn tensor_to_image(tensor: &ImageTensor) -> Result<DynamicImage> {
    if !tensor.is_well_formed() {
        return Err(BridgeError::Encode(format!(
            "tensor data length {} does not match {}x{}x{}",
            tensor.data.len(),
            tensor.width,
            tensor.height,
            tensor.channels
        )));
    }

    let bytes: Vec<u8> = tensor.data.iter().copied().map(to_byte).collect();
    let (w, h) = (tensor.width, tensor.height);
    let image = match tensor.channels {
        1 => GrayImage::from_raw(w, h, bytes).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(w, h, bytes).map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(w, h, bytes).map(DynamicImage::ImageRgba8),
        n => {
            return Err(BridgeError::Encode(format!(
                "unsupported channel count: {}",
                n
            )))
        }
    };

    image.ok_or_else(|| BridgeError::Encode("buffer too small for dimensions".to_string()))
}

/// Split a raster into an RGB plane and a mask plane.
///
/// RGBA rasters give up their alpha as the mask; everything else is coerced
/// to RGB and paired with an all-zero mask.
pub fn split_planes(image: &DynamicImage) -> Selection {
    let (width, height) = (image.width(), image.height());

    match ChannelMode::of(image) {
        ChannelMode::Rgba => {
            let rgba = image.to_rgba8();
            let pixels = width as usize * height as usize;
            let mut rgb = Vec::with_capacity(pixels * 3);
            let mut alpha = Vec::with_capacity(pixels);
            for pixel in rgba.pixels() {
                let [r, g, b, a] = pixel.0;
                rgb.extend_from_slice(&[to_unit(r), to_unit(g), to_unit(b)]);
                alpha.push(to_unit(a));
            }
            (
                ImageTensor {
                    width,
                    height,
                    channels: 3,
                    data: rgb,
                },
                MaskTensor {
                    width,
                    height,
                    data: alpha,
                },
            )
        }
        ChannelMode::Rgb | ChannelMode::Other => {
            let rgb = image.to_rgb8();
            let data = rgb.as_raw().iter().copied().map(to_unit).collect();
            (
                ImageTensor {
                    width,
                    height,
                    channels: 3,
                    data,
                },
                MaskTensor::zeros(width, height),
            )
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};

    pub fn solid_rgb(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    pub fn solid_rgba(width: u32, height: u32, color: [u8; 4]) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(color)))
    }

    pub fn png_bytes(image: &DynamicImage) -> Vec<u8> {
        super::encode(image).unwrap()
    }
}
