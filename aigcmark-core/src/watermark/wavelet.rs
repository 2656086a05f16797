//! Single-level 2-D Haar wavelet transform.
//!
//! Orthonormal Haar filters (`(a + b) / sqrt(2)`, `(a - b) / sqrt(2)`) applied
//! along rows, then columns. Odd dimensions are handled with symmetric
//! extension: the last sample is mirrored, so a sub-band has
//! `ceil(n / 2)` samples along each axis and the reconstruction may be one
//! sample larger than the input. Callers trim it back with [`fit_to_shape`].

use std::f32::consts::FRAC_1_SQRT_2;

use ndarray::{s, Array2, ArrayView1, ArrayViewMut1};

use crate::error::{Result, WatermarkError};

/// The four sub-bands of a one-level decomposition.
#[derive(Debug, Clone)]
pub struct Subbands {
    /// Approximation (low/low).
    pub ll: Array2<f32>,
    /// Horizontal detail (low along rows, high along columns).
    pub lh: Array2<f32>,
    /// Vertical detail (high along rows, low along columns).
    pub hl: Array2<f32>,
    /// Diagonal detail.
    pub hh: Array2<f32>,
}

impl Subbands {
    /// (rows, cols) of each sub-band.
    pub fn dim(&self) -> (usize, usize) {
        self.ll.dim()
    }
}

/// Decompose a plane into its four sub-bands.
pub fn decompose(plane: &Array2<f32>) -> Result<Subbands> {
    let (rows, cols) = plane.dim();
    if rows == 0 || cols == 0 {
        return Err(WatermarkError::TransformError(format!(
            "cannot decompose an empty {}x{} plane",
            rows, cols
        )));
    }

    let half_rows = rows.div_ceil(2);
    let half_cols = cols.div_ceil(2);

    // Rows: split every row into low and high halves.
    let mut low = Array2::<f32>::zeros((rows, half_cols));
    let mut high = Array2::<f32>::zeros((rows, half_cols));
    for ((src, lo), hi) in plane
        .rows()
        .into_iter()
        .zip(low.rows_mut())
        .zip(high.rows_mut())
    {
        analyze(src, lo, hi);
    }

    // Columns of each half.
    let mut ll = Array2::<f32>::zeros((half_rows, half_cols));
    let mut lh = Array2::<f32>::zeros((half_rows, half_cols));
    for ((src, lo), hi) in low
        .columns()
        .into_iter()
        .zip(ll.columns_mut())
        .zip(lh.columns_mut())
    {
        analyze(src, lo, hi);
    }

    let mut hl = Array2::<f32>::zeros((half_rows, half_cols));
    let mut hh = Array2::<f32>::zeros((half_rows, half_cols));
    for ((src, lo), hi) in high
        .columns()
        .into_iter()
        .zip(hl.columns_mut())
        .zip(hh.columns_mut())
    {
        analyze(src, lo, hi);
    }

    Ok(Subbands { ll, lh, hl, hh })
}

/// Inverse transform. The result has twice the sub-band dimensions.
pub fn reconstruct(bands: &Subbands) -> Result<Array2<f32>> {
    let dim = bands.ll.dim();
    if bands.lh.dim() != dim || bands.hl.dim() != dim || bands.hh.dim() != dim {
        return Err(WatermarkError::TransformError(
            "sub-bands must share the same dimensions".to_string(),
        ));
    }
    let (half_rows, half_cols) = dim;
    if half_rows == 0 || half_cols == 0 {
        return Err(WatermarkError::TransformError(
            "cannot reconstruct from empty sub-bands".to_string(),
        ));
    }

    let rows = half_rows * 2;
    let cols = half_cols * 2;

    let mut low = Array2::<f32>::zeros((rows, half_cols));
    for ((lo, hi), dst) in bands
        .ll
        .columns()
        .into_iter()
        .zip(bands.lh.columns())
        .zip(low.columns_mut())
    {
        synthesize(lo, hi, dst);
    }

    let mut high = Array2::<f32>::zeros((rows, half_cols));
    for ((lo, hi), dst) in bands
        .hl
        .columns()
        .into_iter()
        .zip(bands.hh.columns())
        .zip(high.columns_mut())
    {
        synthesize(lo, hi, dst);
    }

    let mut plane = Array2::<f32>::zeros((rows, cols));
    for ((lo, hi), dst) in low
        .rows()
        .into_iter()
        .zip(high.rows())
        .zip(plane.rows_mut())
    {
        synthesize(lo, hi, dst);
    }

    Ok(plane)
}

/// Trim or edge-extend a reconstructed plane to `rows` x `cols`.
pub fn fit_to_shape(plane: Array2<f32>, rows: usize, cols: usize) -> Array2<f32> {
    let (have_rows, have_cols) = plane.dim();
    if (have_rows, have_cols) == (rows, cols) {
        return plane;
    }
    if have_rows >= rows && have_cols >= cols {
        return plane.slice(s![..rows, ..cols]).to_owned();
    }
    if have_rows == 0 || have_cols == 0 {
        return Array2::zeros((rows, cols));
    }
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        plane[[r.min(have_rows - 1), c.min(have_cols - 1)]]
    })
}

fn analyze(signal: ArrayView1<f32>, mut low: ArrayViewMut1<f32>, mut high: ArrayViewMut1<f32>) {
    let n = signal.len();
    for i in 0..low.len() {
        let a = signal[2 * i];
        let b = if 2 * i + 1 < n { signal[2 * i + 1] } else { a };
        low[i] = (a + b) * FRAC_1_SQRT_2;
        high[i] = (a - b) * FRAC_1_SQRT_2;
    }
}

fn synthesize(low: ArrayView1<f32>, high: ArrayView1<f32>, mut out: ArrayViewMut1<f32>) {
    for i in 0..low.len() {
        out[2 * i] = (low[i] + high[i]) * FRAC_1_SQRT_2;
        out[2 * i + 1] = (low[i] - high[i]) * FRAC_1_SQRT_2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(rows: usize, cols: usize) -> Array2<f32> {
        Array2::from_shape_fn((rows, cols), |(r, c)| ((r * 7 + c * 3) % 256) as f32)
    }

    #[test]
    fn test_ll_is_twice_the_block_mean() {
        let plane = Array2::from_shape_vec((2, 2), vec![10.0, 20.0, 30.0, 40.0]).unwrap();
        let bands = decompose(&plane).unwrap();
        assert_eq!(bands.dim(), (1, 1));
        assert!((bands.ll[[0, 0]] - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_constant_plane_has_no_detail() {
        let plane = Array2::from_elem((8, 8), 100.0);
        let bands = decompose(&plane).unwrap();
        assert!(bands.ll.iter().all(|v| (v - 200.0).abs() < 1e-3));
        assert!(bands.lh.iter().all(|v| v.abs() < 1e-3));
        assert!(bands.hl.iter().all(|v| v.abs() < 1e-3));
        assert!(bands.hh.iter().all(|v| v.abs() < 1e-3));
    }

    #[test]
    fn test_roundtrip_even_dimensions() {
        let plane = ramp(16, 12);
        let bands = decompose(&plane).unwrap();
        let rebuilt = reconstruct(&bands).unwrap();
        assert_eq!(rebuilt.dim(), (16, 12));
        for (a, b) in plane.iter().zip(rebuilt.iter()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn test_odd_dimensions_grow_by_one_and_trim_back() {
        let plane = ramp(15, 9);
        let bands = decompose(&plane).unwrap();
        assert_eq!(bands.dim(), (8, 5));

        let rebuilt = reconstruct(&bands).unwrap();
        assert_eq!(rebuilt.dim(), (16, 10));

        let fitted = fit_to_shape(rebuilt, 15, 9);
        assert_eq!(fitted.dim(), (15, 9));
        for (a, b) in plane.iter().zip(fitted.iter()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn test_ll_change_spreads_over_block() {
        let plane = Array2::from_elem((4, 4), 50.0);
        let mut bands = decompose(&plane).unwrap();
        bands.ll[[0, 0]] += 20.0;
        let rebuilt = reconstruct(&bands).unwrap();
        for (r, c) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            assert!((rebuilt[[r, c]] - 60.0).abs() < 1e-3);
        }
        assert!((rebuilt[[2, 2]] - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_empty_plane_is_rejected() {
        let plane = Array2::<f32>::zeros((0, 4));
        assert!(decompose(&plane).is_err());
    }

    #[test]
    fn test_fit_to_shape_extends_edges() {
        let plane = Array2::from_shape_vec((1, 2), vec![1.0, 2.0]).unwrap();
        let fitted = fit_to_shape(plane, 2, 3);
        assert_eq!(fitted.dim(), (2, 3));
        assert_eq!(fitted[[1, 2]], 2.0);
        assert_eq!(fitted[[1, 0]], 1.0);
    }
}
