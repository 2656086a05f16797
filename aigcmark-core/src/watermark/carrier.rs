//! Carrier image handling.
//!
//! Carriers are always processed as 3-channel RGB; single-channel and
//! alpha images are expanded/flattened on load. Only one channel carries the
//! watermark.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader, RgbImage};
use ndarray::Array2;
use tracing::debug;

use crate::error::{Result, WatermarkError};

/// Color channel used for embedding.
///
/// Blue is the least perceptually significant channel of RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    fn index(self) -> usize {
        match self {
            Self::Red => 0,
            Self::Green => 1,
            Self::Blue => 2,
        }
    }
}

/// Channel that carries the watermark.
pub const EMBED_CHANNEL: Channel = Channel::Blue;

/// Encodings the engine writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Jpeg,
}

impl OutputFormat {
    /// JPEG stays JPEG; everything else is written losslessly as PNG.
    pub fn for_source(format: Option<ImageFormat>) -> Self {
        match format {
            Some(ImageFormat::Jpeg) => Self::Jpeg,
            _ => Self::Png,
        }
    }

    /// Pick a format from an explicit output path, falling back to `default`.
    pub fn for_path(path: &Path, default: Self) -> Self {
        match ImageFormat::from_path(path) {
            Ok(ImageFormat::Jpeg) => Self::Jpeg,
            Ok(ImageFormat::Png) => Self::Png,
            _ => default,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

/// A decoded carrier image.
#[derive(Debug, Clone)]
pub struct Carrier {
    image: RgbImage,
    format: Option<ImageFormat>,
}

impl Carrier {
    /// Decode a carrier from disk, sniffing the format from its content.
    pub fn open(path: &Path) -> Result<Self> {
        let reader = ImageReader::open(path)?.with_guessed_format()?;
        let format = reader.format();
        let image = reader.decode().map_err(|e| {
            WatermarkError::DecodeError(format!("{}: {}", path.display(), e))
        })?;

        debug!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            format = ?format,
            "Decoded carrier"
        );
        Ok(Self::from_image(image, format))
    }

    pub fn from_image(image: DynamicImage, format: Option<ImageFormat>) -> Self {
        Self {
            image: image.to_rgb8(),
            format,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// One channel as a (rows, cols) float plane.
    pub fn channel_plane(&self, channel: Channel) -> Array2<f32> {
        let idx = channel.index();
        let (width, height) = self.image.dimensions();
        Array2::from_shape_fn((height as usize, width as usize), |(r, c)| {
            self.image.get_pixel(c as u32, r as u32)[idx] as f32
        })
    }

    /// Overwrite one channel from a plane, clipping to 0..=255 and rounding.
    pub fn set_channel(&mut self, channel: Channel, plane: &Array2<f32>) -> Result<()> {
        let idx = channel.index();
        let expected = (self.image.height() as usize, self.image.width() as usize);
        if plane.dim() != expected {
            return Err(WatermarkError::EmbeddingFailed(format!(
                "channel plane is {:?}, carrier is {:?}",
                plane.dim(),
                expected
            )));
        }
        for (x, y, pixel) in self.image.enumerate_pixels_mut() {
            let value = plane[[y as usize, x as usize]];
            pixel[idx] = value.clamp(0.0, 255.0).round() as u8;
        }
        Ok(())
    }

    /// Encode the carrier to `path`.
    pub fn save(&self, path: &Path, format: OutputFormat, jpeg_quality: u8) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let encoded = match format {
            OutputFormat::Png => self.image.write_to(&mut writer, ImageFormat::Png),
            OutputFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut writer, jpeg_quality);
                self.image.write_with_encoder(encoder)
            }
        };
        encoded.map_err(|e| {
            WatermarkError::EmbeddingFailed(format!(
                "failed to encode {}: {}",
                path.display(),
                e
            ))
        })?;
        writer.flush()?;
        Ok(())
    }
}
