//! Payload encoding.
//!
//! Converts a text string or a small reference image into a square payload
//! matrix plus the metadata record describing it.
//!
//! # Text
//!
//! UTF-8 bytes are written along the main diagonal, starting at a row offset
//! that centers the byte run in the matrix. Bytes beyond the matrix size are
//! dropped; the full text is still kept in the metadata.
//!
//! # Reference image
//!
//! The image is converted to grayscale (alpha, when present, weights the
//! intensity), min-max normalized, binarized at the mid-range cut and resized
//! with nearest-neighbor sampling. The decoded image is kept untouched as a
//! display copy because the embedded matrix is lossy.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use tracing::{debug, info, warn};

use crate::error::MAX_MATRIX_SIZE;
use crate::metadata::{PayloadKind, WatermarkMetadata};

/// Binarization cut applied after min-max normalization.
const BINARY_THRESHOLD: u8 = 127;

/// Square matrix of payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadMatrix {
    cells: GrayImage,
}

impl PayloadMatrix {
    /// The 1x1 zero matrix used when no payload is supplied.
    pub fn empty() -> Self {
        Self::zeros(1)
    }

    /// A `size` x `size` matrix of zeros.
    pub fn zeros(size: u32) -> Self {
        Self {
            cells: GrayImage::new(size, size),
        }
    }

    pub fn from_image(cells: GrayImage) -> Self {
        Self { cells }
    }

    pub fn rows(&self) -> u32 {
        self.cells.height()
    }

    pub fn cols(&self) -> u32 {
        self.cells.width()
    }

    /// (rows, cols)
    pub fn shape(&self) -> [u32; 2] {
        [self.rows(), self.cols()]
    }

    pub fn get(&self, row: u32, col: u32) -> u8 {
        self.cells.get_pixel(col, row)[0]
    }

    pub fn set(&mut self, row: u32, col: u32, value: u8) {
        self.cells.put_pixel(col, row, Luma([value]));
    }

    /// Number of cells carrying a nonzero byte.
    pub fn nonzero_count(&self) -> usize {
        self.cells.pixels().filter(|p| p[0] != 0).count()
    }

    /// Bytes along the main diagonal.
    pub fn diagonal(&self) -> Vec<u8> {
        let n = self.rows().min(self.cols());
        (0..n).map(|i| self.get(i, i)).collect()
    }

    /// Nearest-neighbor resample to `cols` x `rows`.
    pub fn resized(&self, rows: u32, cols: u32) -> Self {
        if rows == self.rows() && cols == self.cols() {
            return self.clone();
        }
        Self {
            cells: imageops::resize(&self.cells, cols, rows, FilterType::Nearest),
        }
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.cells
    }
}

/// Output of the payload encoder.
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub matrix: PayloadMatrix,
    /// Metadata draft; storage locators and strength are filled in at embed time.
    pub metadata: WatermarkMetadata,
    /// Untouched decoded reference image, for image payloads.
    pub display_copy: Option<DynamicImage>,
}

impl EncodedPayload {
    pub fn kind(&self) -> PayloadKind {
        self.metadata.payload_kind
    }
}

/// Payload encoder configuration and computation.
#[derive(Debug, Clone)]
pub struct PayloadEncoder {
    matrix_size: u32,
}

impl Default for PayloadEncoder {
    fn default() -> Self {
        Self::new(MAX_MATRIX_SIZE)
    }
}

impl PayloadEncoder {
    /// Create an encoder producing matrices of side `min(max_size, 32)`.
    pub fn new(max_size: u32) -> Self {
        Self {
            matrix_size: max_size.clamp(1, MAX_MATRIX_SIZE),
        }
    }

    pub fn matrix_size(&self) -> u32 {
        self.matrix_size
    }

    /// Encode whichever payload is available.
    ///
    /// A decodable reference image always wins over text. An undecodable
    /// reference image falls back to the text, and no payload at all yields
    /// the 1x1 zero matrix with kind `none`.
    pub fn encode(&self, text: Option<&str>, reference_image: Option<&Path>) -> EncodedPayload {
        if let Some(path) = reference_image {
            match image::open(path) {
                Ok(image) => {
                    info!(path = %path.display(), "Encoding image payload");
                    return self.encode_image(image);
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Reference image could not be decoded, falling back to text"
                    );
                }
            }
        }

        match text {
            Some(text) => self.encode_text(text),
            None => {
                warn!("No payload supplied, embedding empty watermark");
                Self::encode_empty()
            }
        }
    }

    /// The empty payload.
    pub fn encode_empty() -> EncodedPayload {
        let matrix = PayloadMatrix::empty();
        let metadata = WatermarkMetadata::new(PayloadKind::Empty, matrix.shape());
        EncodedPayload {
            matrix,
            metadata,
            display_copy: None,
        }
    }

    /// Place the UTF-8 bytes of `text` along the centered diagonal.
    pub fn encode_text(&self, text: &str) -> EncodedPayload {
        let size = self.matrix_size;
        let bytes = text.as_bytes();
        let mut matrix = PayloadMatrix::zeros(size);

        let start = if bytes.len() < size as usize {
            (size as usize - bytes.len()) / 2
        } else {
            0
        };
        if bytes.len() > size as usize {
            debug!(
                bytes = bytes.len(),
                kept = size,
                "Text payload truncated to matrix size"
            );
        }
        for (i, byte) in bytes.iter().take(size as usize).enumerate() {
            let pos = (start + i) as u32;
            matrix.set(pos, pos, *byte);
        }

        let mut metadata = WatermarkMetadata::new(PayloadKind::Text, matrix.shape());
        metadata.text = Some(text.to_string());
        metadata.text_length = Some(bytes.len());
        metadata.matrix_size = Some(size);

        EncodedPayload {
            matrix,
            metadata,
            display_copy: None,
        }
    }

    /// Binarize and resize a decoded reference image.
    pub fn encode_image(&self, image: DynamicImage) -> EncodedPayload {
        let size = self.matrix_size;
        let binary = binarize(&image);
        let cells = if binary.width() != size || binary.height() != size {
            imageops::resize(&binary, size, size, FilterType::Nearest)
        } else {
            binary
        };
        let matrix = PayloadMatrix::from_image(cells);

        let mut metadata = WatermarkMetadata::new(PayloadKind::Image, matrix.shape());
        metadata.matrix_size = Some(size);

        EncodedPayload {
            matrix,
            metadata,
            display_copy: Some(image),
        }
    }
}

/// Grayscale, alpha-weight, min-max normalize and threshold an image.
fn binarize(image: &DynamicImage) -> GrayImage {
    let (width, height) = (image.width(), image.height());

    let intensities: Vec<f32> = if image.color().has_alpha() {
        image
            .to_luma_alpha8()
            .pixels()
            .map(|p| (p[0] as f32 * (p[1] as f32 / 255.0)).floor())
            .collect()
    } else {
        image.to_luma8().pixels().map(|p| p[0] as f32).collect()
    };

    let (min, max) = intensities
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;

    let pixels = intensities
        .into_iter()
        .map(|v| {
            let normalized = if range > f32::EPSILON {
                ((v - min) * 255.0 / range).round()
            } else {
                0.0
            };
            if normalized > BINARY_THRESHOLD as f32 {
                255
            } else {
                0
            }
        })
        .collect();

    // Length always matches width * height.
    GrayImage::from_raw(width, height, pixels).unwrap_or_else(|| GrayImage::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn checkerboard(size: u32) -> DynamicImage {
        let img = RgbImage::from_fn(size, size, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_empty_payload() {
        let encoded = PayloadEncoder::default().encode(None, None);
        assert_eq!(encoded.kind(), PayloadKind::Empty);
        assert_eq!(encoded.matrix.shape(), [1, 1]);
        assert_eq!(encoded.matrix.nonzero_count(), 0);
        assert!(encoded.display_copy.is_none());
    }

    #[test]
    fn test_text_is_centered_on_diagonal() {
        let encoded = PayloadEncoder::default().encode_text("AIGC");
        assert_eq!(encoded.kind(), PayloadKind::Text);
        assert_eq!(encoded.matrix.shape(), [32, 32]);

        // (32 - 4) / 2 = 14
        assert_eq!(encoded.matrix.get(14, 14), b'A');
        assert_eq!(encoded.matrix.get(15, 15), b'I');
        assert_eq!(encoded.matrix.get(16, 16), b'G');
        assert_eq!(encoded.matrix.get(17, 17), b'C');
        assert_eq!(encoded.matrix.nonzero_count(), 4);
        assert_eq!(encoded.matrix.get(14, 15), 0);

        assert_eq!(encoded.metadata.text.as_deref(), Some("AIGC"));
        assert_eq!(encoded.metadata.text_length, Some(4));
        assert_eq!(encoded.metadata.matrix_size, Some(32));
    }

    #[test]
    fn test_text_truncation_is_deterministic() {
        let long = "The quick brown fox jumps over the lazy dog, twice over";
        let encoder = PayloadEncoder::default();
        let first = encoder.encode_text(long);
        let second = encoder.encode_text(long);

        assert_eq!(first.matrix, second.matrix);
        assert_eq!(first.matrix.diagonal(), &long.as_bytes()[..32]);
        // Metadata keeps the full text.
        assert_eq!(first.metadata.text.as_deref(), Some(long));
        assert_eq!(first.metadata.text_length, Some(long.len()));
    }

    #[test]
    fn test_text_exactly_matrix_size_starts_at_zero() {
        let encoder = PayloadEncoder::new(8);
        let encoded = encoder.encode_text("abcdefgh");
        assert_eq!(encoded.matrix.diagonal(), b"abcdefgh");
    }

    #[test]
    fn test_empty_text_still_text_kind() {
        let encoded = PayloadEncoder::default().encode(Some(""), None);
        assert_eq!(encoded.kind(), PayloadKind::Text);
        assert_eq!(encoded.matrix.nonzero_count(), 0);
        assert!(encoded.metadata.is_empty_text());
    }

    #[test]
    fn test_matrix_size_is_capped() {
        assert_eq!(PayloadEncoder::new(64).matrix_size(), 32);
        assert_eq!(PayloadEncoder::new(16).matrix_size(), 16);
    }

    #[test]
    fn test_image_is_binarized_and_resized() {
        let encoded = PayloadEncoder::default().encode_image(checkerboard(64));
        assert_eq!(encoded.kind(), PayloadKind::Image);
        assert_eq!(encoded.matrix.shape(), [32, 32]);
        assert!(encoded
            .matrix
            .as_image()
            .pixels()
            .all(|p| p[0] == 0 || p[0] == 255));
        let ones = encoded.matrix.nonzero_count();
        assert!(ones > 400 && ones < 624, "checkerboard should be about half set: {ones}");

        // Display copy is the untouched decoded image.
        let display = encoded.display_copy.expect("display copy");
        assert_eq!(display.width(), 64);
    }

    #[test]
    fn test_constant_image_binarizes_to_zero() {
        let white = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 255, 255])));
        let encoded = PayloadEncoder::default().encode_image(white);
        assert_eq!(encoded.matrix.nonzero_count(), 0);
    }

    #[test]
    fn test_alpha_weights_intensity() {
        // White everywhere, but the left half is fully transparent.
        let img = RgbaImage::from_fn(32, 32, |x, _| {
            if x < 16 {
                Rgba([255, 255, 255, 0])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        let encoded = PayloadEncoder::default().encode_image(DynamicImage::ImageRgba8(img));
        assert_eq!(encoded.matrix.get(0, 0), 0);
        assert_eq!(encoded.matrix.get(0, 31), 255);
        assert_eq!(encoded.matrix.nonzero_count(), 16 * 32);
    }

    #[test]
    fn test_undecodable_reference_falls_back_to_text() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("ref.png");
        std::fs::write(&bogus, b"definitely not a png").unwrap();

        let encoded = PayloadEncoder::default().encode(Some("fallback"), Some(&bogus));
        assert_eq!(encoded.kind(), PayloadKind::Text);
        assert_eq!(encoded.metadata.text.as_deref(), Some("fallback"));

        let missing = dir.path().join("missing.png");
        let encoded = PayloadEncoder::default().encode(None, Some(&missing));
        assert_eq!(encoded.kind(), PayloadKind::Empty);
    }

    #[test]
    fn test_image_takes_priority_over_text() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.png");
        checkerboard(16).save(&reference).unwrap();

        let encoded = PayloadEncoder::default().encode(Some("ignored"), Some(&reference));
        assert_eq!(encoded.kind(), PayloadKind::Image);
        assert!(encoded.metadata.text.is_none());
    }

    #[test]
    fn test_matrix_resize_nearest() {
        let mut matrix = PayloadMatrix::zeros(4);
        matrix.set(0, 0, 200);
        let big = matrix.resized(8, 8);
        assert_eq!(big.shape(), [8, 8]);
        assert_eq!(big.get(0, 0), 200);
        assert_eq!(big.get(1, 1), 200);
        assert_eq!(big.get(7, 7), 0);
    }
}
