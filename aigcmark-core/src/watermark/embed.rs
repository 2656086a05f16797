//! Additive embedding into the low-frequency sub-band.

use ndarray::Array2;
use tracing::debug;

use super::carrier::{Carrier, Channel, EMBED_CHANNEL};
use super::wavelet;
use crate::error::{Result, WatermarkError};
use crate::payload::PayloadMatrix;

/// Where and how much of a payload matrix landed in the sub-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedPlacement {
    /// (rows, cols) of the approximation sub-band
    pub subband: (usize, usize),
    /// (rows, cols) of the matrix after fitting
    pub matrix: (usize, usize),
    /// (row, col) of the matrix origin inside the sub-band
    pub offset: (usize, usize),
    /// Number of coefficients that were raised
    pub marked: usize,
}

/// Fit a `rows` x `cols` matrix into a `band_rows` x `band_cols` sub-band.
///
/// Uses a single uniform scale that never enlarges the matrix.
pub fn fit_matrix(rows: usize, cols: usize, band_rows: usize, band_cols: usize) -> (usize, usize) {
    let scale_rows = (band_rows as f64 / rows as f64).min(1.0);
    let scale_cols = (band_cols as f64 / cols as f64).min(1.0);
    let scale = scale_rows.min(scale_cols);
    let fitted_rows = ((rows as f64 * scale) as usize).max(1);
    let fitted_cols = ((cols as f64 * scale) as usize).max(1);
    (fitted_rows, fitted_cols)
}

/// Origin that centers `size` samples inside `extent`.
pub fn centered_offset(extent: usize, size: usize) -> usize {
    extent.saturating_sub(size) / 2
}

/// Embeds payload matrices into one channel of a carrier.
#[derive(Debug, Clone)]
pub struct CoefficientEmbedder {
    strength: f32,
    blend_factor: f32,
    channel: Channel,
}

impl CoefficientEmbedder {
    pub fn new(strength: f32, blend_factor: f32) -> Self {
        Self {
            strength,
            blend_factor,
            channel: EMBED_CHANNEL,
        }
    }

    pub fn strength(&self) -> f32 {
        self.strength
    }

    /// Embed `matrix` into the carrier in place.
    ///
    /// Every nonzero cell raises its approximation coefficient by
    /// `strength * value`; zero cells are left alone, so embedding never
    /// lowers a coefficient.
    pub fn embed(&self, carrier: &mut Carrier, matrix: &PayloadMatrix) -> Result<EmbedPlacement> {
        let original = carrier.channel_plane(self.channel);
        let (rows, cols) = original.dim();

        let mut bands = wavelet::decompose(&original)
            .map_err(|e| WatermarkError::EmbeddingFailed(e.to_string()))?;
        let (band_rows, band_cols) = bands.dim();

        let (fit_rows, fit_cols) = fit_matrix(
            matrix.rows() as usize,
            matrix.cols() as usize,
            band_rows,
            band_cols,
        );
        let fitted = matrix.resized(fit_rows as u32, fit_cols as u32);
        let row_offset = centered_offset(band_rows, fit_rows);
        let col_offset = centered_offset(band_cols, fit_cols);

        let mut marked = 0;
        for i in 0..fit_rows.min(band_rows) {
            for j in 0..fit_cols.min(band_cols) {
                let value = fitted.get(i as u32, j as u32);
                if value > 0 {
                    bands.ll[[row_offset + i, col_offset + j]] += self.strength * value as f32;
                    marked += 1;
                }
            }
        }

        let rebuilt = wavelet::reconstruct(&bands)
            .map_err(|e| WatermarkError::EmbeddingFailed(e.to_string()))?;
        if rebuilt.dim() != (rows, cols) {
            debug!(
                rebuilt = ?rebuilt.dim(),
                original = ?(rows, cols),
                "Correcting reconstruction size"
            );
        }
        let rebuilt = wavelet::fit_to_shape(rebuilt, rows, cols);

        let blended = self.blend(&original, rebuilt);
        carrier.set_channel(self.channel, &blended)?;

        let placement = EmbedPlacement {
            subband: (band_rows, band_cols),
            matrix: (fit_rows, fit_cols),
            offset: (row_offset, col_offset),
            marked,
        };
        debug!(?placement, strength = self.strength, "Embedded payload matrix");
        Ok(placement)
    }

    /// Clip the reconstruction and mix it with the original channel.
    fn blend(&self, original: &Array2<f32>, rebuilt: Array2<f32>) -> Array2<f32> {
        let clipped = rebuilt.mapv(|v| v.clamp(0.0, 255.0));
        clipped * self.blend_factor + original * (1.0 - self.blend_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};

    fn flat_carrier(width: u32, height: u32, blue: u8) -> Carrier {
        let img = RgbImage::from_pixel(width, height, Rgb([120, 130, blue]));
        Carrier::from_image(DynamicImage::ImageRgb8(img), None)
    }

    #[test]
    fn test_fit_matrix_never_enlarges() {
        assert_eq!(fit_matrix(32, 32, 128, 128), (32, 32));
        assert_eq!(fit_matrix(32, 32, 16, 20), (16, 16));
        assert_eq!(fit_matrix(32, 32, 40, 8), (8, 8));
        assert_eq!(fit_matrix(1, 1, 3, 3), (1, 1));
    }

    #[test]
    fn test_centered_offset() {
        assert_eq!(centered_offset(128, 32), 48);
        assert_eq!(centered_offset(33, 32), 0);
        assert_eq!(centered_offset(10, 32), 0);
    }

    #[test]
    fn test_zero_matrix_leaves_carrier_unchanged() {
        let mut carrier = flat_carrier(64, 48, 90);
        let before = carrier.image().clone();
        let placement = CoefficientEmbedder::new(50.0, 0.85)
            .embed(&mut carrier, &PayloadMatrix::zeros(32))
            .unwrap();
        assert_eq!(placement.marked, 0);
        assert_eq!(carrier.image(), &before);
    }

    #[test]
    fn test_embedding_only_raises_blue_in_center() {
        let mut carrier = flat_carrier(128, 128, 60);
        let mut matrix = PayloadMatrix::zeros(32);
        matrix.set(0, 0, 255);

        let placement = CoefficientEmbedder::new(50.0, 0.85)
            .embed(&mut carrier, &matrix)
            .unwrap();
        assert_eq!(placement.subband, (64, 64));
        assert_eq!(placement.offset, (16, 16));
        assert_eq!(placement.marked, 1);

        // Sub-band cell (16, 16) covers pixels (32..34, 32..34).
        let marked = carrier.image().get_pixel(32, 32);
        assert_eq!(marked[0], 120, "red must be untouched");
        assert_eq!(marked[1], 130, "green must be untouched");
        // 0.85 * 255 + 0.15 * 60 = 225.75
        assert_eq!(marked[2], 226);
        assert_eq!(carrier.image().get_pixel(33, 33)[2], 226);

        for (x, y, pixel) in carrier.image().enumerate_pixels() {
            if x >= 34 || y >= 34 || x < 32 || y < 32 {
                assert_eq!(pixel[2], 60, "pixel ({x}, {y}) changed");
            }
        }
    }

    #[test]
    fn test_odd_sized_carrier_keeps_dimensions() {
        let mut carrier = flat_carrier(37, 23, 80);
        let encoder = crate::payload::PayloadEncoder::default();
        let payload = encoder.encode_text("hi");
        let placement = CoefficientEmbedder::new(50.0, 0.85)
            .embed(&mut carrier, &payload.matrix)
            .unwrap();
        assert_eq!(placement.subband, (12, 19));
        assert_eq!(placement.matrix, (12, 12));
        assert_eq!(carrier.width(), 37);
        assert_eq!(carrier.height(), 23);
    }
}
