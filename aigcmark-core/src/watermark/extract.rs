//! Blind extraction from the low-frequency sub-band.
//!
//! Used only when no metadata source survives. Embedding never lowers a
//! coefficient, so a marked cell shows up as an approximation coefficient
//! well above the carrier around it. Each cell is read relative to a
//! baseline, the median of a ring of coefficients just outside the read
//! window, so only what the embedder added is measured and not the overall
//! brightness of the channel. Both an occupancy ratio and a mean-square
//! floor are required before a detection is declared.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use ndarray::{s, Array2};
use tracing::debug;

use super::carrier::{Carrier, Channel, EMBED_CHANNEL};
use super::embed::centered_offset;
use super::wavelet;
use crate::error::{Result, WatermarkError, MAX_MATRIX_SIZE};
use crate::payload::PayloadMatrix;

/// Highest confidence a blind detection can report.
pub const MAX_BLIND_CONFIDENCE: f64 = 0.8;

/// Occupancy accepted by the lenient image probe.
pub const LENIENT_OCCUPANCY: f64 = 0.05;

/// Side length of the upscaled viewable result.
pub const VIEWABLE_SIZE: u32 = 256;

/// Width of the white frame around the viewable result.
pub const VIEWABLE_BORDER: u32 = 5;

const SMOOTHING_SIGMA: f32 = 0.8;

/// What a blind pass read out of a carrier.
#[derive(Debug, Clone)]
pub struct ExtractedSignal {
    pub matrix: PayloadMatrix,
    pub nonzero: usize,
    pub total: usize,
    /// Coefficient level the window was read against.
    pub baseline: f32,
    /// Mean of the squared recovered cell values.
    pub mean_square: f64,
    pub confidence: f64,
    pub detected: bool,
}

impl ExtractedSignal {
    pub fn occupancy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.nonzero as f64 / self.total as f64
        }
    }
}

/// Blind extractor for the low-frequency sub-band.
#[derive(Debug, Clone)]
pub struct SignalExtractor {
    strength: f32,
    min_occupancy: f64,
    signal_floor: f64,
    channel: Channel,
}

impl SignalExtractor {
    pub fn new(strength: f32, min_occupancy: f64, signal_floor: f64) -> Self {
        Self {
            strength,
            min_occupancy,
            signal_floor,
            channel: EMBED_CHANNEL,
        }
    }

    /// Extractor for the mis-tagged image probe: 5% occupancy, no floor.
    pub fn lenient(strength: f32) -> Self {
        Self::new(strength, LENIENT_OCCUPANCY, 0.0)
    }

    /// Read the centered window of the approximation sub-band.
    pub fn extract(&self, carrier: &Carrier) -> Result<ExtractedSignal> {
        let plane = carrier.channel_plane(self.channel);
        let bands = wavelet::decompose(&plane)
            .map_err(|e| WatermarkError::RecoveryFailed(e.to_string()))?;
        let (band_rows, band_cols) = bands.dim();

        let size = (MAX_MATRIX_SIZE as usize)
            .min(band_rows / 2)
            .min(band_cols / 2);
        if size == 0 {
            debug!(band_rows, band_cols, "Sub-band too small for blind extraction");
            return Ok(ExtractedSignal {
                matrix: PayloadMatrix::empty(),
                nonzero: 0,
                total: 0,
                baseline: 0.0,
                mean_square: 0.0,
                confidence: 0.0,
                detected: false,
            });
        }

        let row_offset = centered_offset(band_rows, size);
        let col_offset = centered_offset(band_cols, size);
        let baseline = ring_baseline(&bands.ll, row_offset, col_offset, size);
        let cut = self.strength / 2.0;

        let mut matrix = PayloadMatrix::zeros(size as u32);
        let mut nonzero = 0usize;
        let mut square_sum = 0.0f64;
        for i in 0..size {
            for j in 0..size {
                let residual = bands.ll[[row_offset + i, col_offset + j]] - baseline;
                if residual > cut {
                    let value = (residual / self.strength).floor().clamp(0.0, 255.0) as u8;
                    matrix.set(i as u32, j as u32, value);
                    nonzero += 1;
                    square_sum += f64::from(value) * f64::from(value);
                }
            }
        }

        let total = size * size;
        let occupancy = nonzero as f64 / total as f64;
        let mean_square = square_sum / total as f64;
        let detected = occupancy >= self.min_occupancy && mean_square > self.signal_floor;
        let confidence = if detected {
            occupancy.min(MAX_BLIND_CONFIDENCE)
        } else {
            0.0
        };

        debug!(
            size,
            baseline,
            nonzero,
            occupancy,
            mean_square,
            detected,
            "Blind extraction finished"
        );

        Ok(ExtractedSignal {
            matrix,
            nonzero,
            total,
            baseline,
            mean_square,
            confidence,
            detected,
        })
    }
}

/// Median of the coefficients in a ring around the `size` window at
/// (`row`, `col`). The ring is a quarter of the window wide, clipped to the
/// sub-band. Returns 0 when the window fills the whole sub-band.
fn ring_baseline(ll: &Array2<f32>, row: usize, col: usize, size: usize) -> f32 {
    let (rows, cols) = ll.dim();
    let width = (size / 4).max(1);
    let top = row.saturating_sub(width);
    let left = col.saturating_sub(width);
    let bottom = (row + size + width).min(rows);
    let right = (col + size + width).min(cols);

    let mut ring: Vec<f32> = ll
        .slice(s![top..bottom, left..right])
        .indexed_iter()
        .filter(|&((r, c), _)| {
            let (r, c) = (r + top, c + left);
            !((row..row + size).contains(&r) && (col..col + size).contains(&c))
        })
        .map(|(_, &v)| v)
        .collect();
    if ring.is_empty() {
        return 0.0;
    }

    ring.sort_by(f32::total_cmp);
    let mid = ring.len() / 2;
    if ring.len() % 2 == 0 {
        (ring[mid - 1] + ring[mid]) / 2.0
    } else {
        ring[mid]
    }
}

/// Turn a recovered matrix into a viewable binary image.
///
/// Min-max normalize, upscale to 256x256 (nearest), smooth lightly, binarize
/// with Otsu's threshold and frame with a white border.
pub fn render_viewable(matrix: &PayloadMatrix) -> GrayImage {
    let cells = matrix.as_image();
    let (min, max) = cells
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    let range = f32::from(max.saturating_sub(min));

    let mut normalized = cells.clone();
    for pixel in normalized.pixels_mut() {
        let v = if range > 0.0 {
            (f32::from(pixel[0] - min) * 255.0 / range).round()
        } else {
            0.0
        };
        pixel[0] = v as u8;
    }

    let upscaled = imageops::resize(
        &normalized,
        VIEWABLE_SIZE,
        VIEWABLE_SIZE,
        FilterType::Nearest,
    );
    let smoothed = imageops::blur(&upscaled, SMOOTHING_SIGMA);

    let threshold = otsu_threshold(smoothed.as_raw());
    let side = VIEWABLE_SIZE + 2 * VIEWABLE_BORDER;
    let mut framed = GrayImage::from_pixel(side, side, Luma([255]));
    for (x, y, pixel) in smoothed.enumerate_pixels() {
        let value = if pixel[0] > threshold { 255 } else { 0 };
        framed.put_pixel(x + VIEWABLE_BORDER, y + VIEWABLE_BORDER, Luma([value]));
    }
    framed
}

/// Threshold maximizing between-class variance of a grey histogram.
fn otsu_threshold(grey: &[u8]) -> u8 {
    let mut hist = [0u32; 256];
    for &p in grey {
        hist[p as usize] += 1;
    }

    let total = grey.len() as f64;
    let sum_all: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * f64::from(count))
        .sum();

    let mut best_threshold = 0u8;
    let mut best_variance = 0.0f64;
    let mut weight_bg = 0.0f64;
    let mut sum_bg = 0.0f64;

    for (t, &count) in hist.iter().enumerate() {
        weight_bg += f64::from(count);
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }

        sum_bg += t as f64 * f64::from(count);
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_all - sum_bg) / weight_fg;

        let between = weight_bg * weight_fg * (mean_bg - mean_fg) * (mean_bg - mean_fg);
        if between > best_variance {
            best_variance = between;
            best_threshold = t as u8;
        }
    }

    best_threshold
}
