//! Encoded raster images exchanged between the host, the capture loop and the stitcher.

use crate::analysis::{Rect, Size};
use crate::{Error, Result};
use base64::Engine as Base64Engine;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Cursor;

/// Output encodings supported by the stitcher.
///
/// `Png` is lossless and ignores the quality setting. `Jpeg` has no alpha
/// channel, so transparent pixels are flattened onto white before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
}

impl OutputFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }
}

/// An encoded image together with its pixel dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub data: Vec<u8>,
}

impl Raster {
    /// Wrap bytes produced by a host, sniffing the format and reading the
    /// header for dimensions without decoding pixel data.
    pub fn from_encoded(data: Vec<u8>) -> Result<Self> {
        let format = match image::guess_format(&data) {
            Ok(ImageFormat::Png) => OutputFormat::Png,
            Ok(ImageFormat::Jpeg) => OutputFormat::Jpeg,
            Ok(other) => {
                return Err(Error::DecodeError(format!(
                    "Unsupported raster format: {:?}",
                    other
                )))
            }
            Err(e) => return Err(Error::DecodeError(format!("Unrecognised raster: {}", e))),
        };

        let (width, height) = image::ImageReader::new(Cursor::new(&data))
            .with_guessed_format()
            .map_err(|e| Error::DecodeError(format!("Failed to read raster header: {}", e)))?
            .into_dimensions()
            .map_err(|e| Error::DecodeError(format!("Failed to read raster dimensions: {}", e)))?;

        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Encode RGBA pixels. `quality` is in `(0, 1]` and only affects JPEG.
    pub fn encode(pixels: &RgbaImage, format: OutputFormat, quality: f32) -> Result<Self> {
        let (width, height) = pixels.dimensions();
        let mut data = Vec::new();
        match format {
            OutputFormat::Png => {
                PngEncoder::new(&mut data)
                    .write_image(pixels.as_raw(), width, height, ExtendedColorType::Rgba8)
                    .map_err(|e| Error::EncodeError(format!("PNG encoding failed: {}", e)))?;
            }
            OutputFormat::Jpeg => {
                let flattened = flatten_onto_white(pixels);
                JpegEncoder::new_with_quality(&mut data, jpeg_quality(quality))
                    .write_image(flattened.as_raw(), width, height, ExtendedColorType::Rgb8)
                    .map_err(|e| Error::EncodeError(format!("JPEG encoding failed: {}", e)))?;
            }
        }

        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Decode into RGBA pixels.
    pub fn decode(&self) -> Result<RgbaImage> {
        let format = match self.format {
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Jpeg => ImageFormat::Jpeg,
        };
        let img = image::load_from_memory_with_format(&self.data, format)
            .map_err(|e| Error::DecodeError(format!("Failed to decode raster: {}", e)))?;
        Ok(img.into_rgba8())
    }

    /// Cut the part of a viewport raster covered by `rect`, where `rect` is in
    /// CSS pixels relative to the viewport origin. Rasters taken on high-DPI
    /// displays are scaled by their actual width over `viewport.width`.
    pub fn crop(&self, rect: &Rect, viewport: Size) -> Result<Raster> {
        let visible = rect
            .intersection(&Rect::from_size(viewport))
            .ok_or_else(|| Error::Other(format!("Rect {:?} lies outside the viewport", rect)))?;

        let scale = if viewport.width == 0 {
            1.0
        } else {
            self.width as f64 / viewport.width as f64
        };
        let x = ((visible.x as f64) * scale).floor() as u32;
        let y = ((visible.y as f64) * scale).floor() as u32;
        let w = ((visible.width as f64) * scale).round() as u32;
        let h = ((visible.height as f64) * scale).round() as u32;
        let w = w.min(self.width.saturating_sub(x));
        let h = h.min(self.height.saturating_sub(y));
        if w == 0 || h == 0 {
            return Err(Error::Other("Crop rectangle has zero width or height".into()));
        }

        let pixels = self.decode()?;
        let cropped = image::imageops::crop_imm(&pixels, x, y, w, h).to_image();
        Raster::encode(&cropped, OutputFormat::Png, 1.0)
    }

    /// `data:` URL for handing the image to a UI layer.
    pub fn to_data_url(&self) -> String {
        let b64 = Base64Engine::encode(&base64::engine::general_purpose::STANDARD, &self.data);
        format!("data:{};base64,{}", self.format.mime_type(), b64)
    }

    /// Hex SHA-256 of the encoded bytes.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.data))
    }
}

fn jpeg_quality(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

fn flatten_onto_white(pixels: &RgbaImage) -> RgbImage {
    let (width, height) = pixels.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let [r, g, b, a] = pixels.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}
