use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use crate::consts::{PARALLEL_PIXEL_THRESHOLD, WARP_SUBPIXEL_STEPS};
use crate::frame::Point;
use crate::stats::finite_min_max;

use super::transform::AffineTransform;

/// Resample `image` into the reference grid of `transform`.
///
/// `transform` maps frame coordinates onto reference coordinates; each output
/// pixel is sampled at its inverse image. Intensities are rescaled to [0, 1]
/// with the frame's finite min/max before interpolation and restored
/// afterwards. Pixels sampled outside the frame are NaN.
pub fn affine_warp(image: ArrayView2<'_, f32>, transform: &AffineTransform) -> Array2<f32> {
    let (h, w) = image.dim();
    let inverse = transform.inverse();
    let Some((lo, hi)) = finite_min_max(image.iter().copied()) else {
        return Array2::from_elem((h, w), f32::NAN);
    };
    if !inverse.is_valid() {
        return Array2::from_elem((h, w), f32::NAN);
    }

    let lo = lo as f64;
    let span = if hi as f64 > lo { hi as f64 - lo } else { 1.0 };
    let normalized = image.mapv(|v| (v as f64 - lo) / span);

    let fill_row = |row: usize, out: &mut [f32]| {
        for (col, v) in out.iter_mut().enumerate() {
            let src = inverse.apply(Point::new(col as f64, row as f64));
            *v = match bilinear_sample(&normalized, src.y, src.x) {
                Some(s) => (s * span + lo) as f32,
                None => f32::NAN,
            };
        }
    };

    let mut out = vec![0.0f32; h * w];
    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        out.par_chunks_mut(w.max(1))
            .enumerate()
            .for_each(|(row, chunk)| fill_row(row, chunk));
    } else {
        for (row, chunk) in out.chunks_mut(w.max(1)).enumerate() {
            fill_row(row, chunk);
        }
    }
    Array2::from_shape_vec((h, w), out).unwrap_or_else(|_| Array2::from_elem((h, w), f32::NAN))
}

/// Bilinear interpolation at (y, x) with fractional offsets quantized to
/// 1/32 pixel.
///
/// Neighbours with zero weight are ignored. Returns `None` when a weighted
/// neighbour lies outside the image; NaN neighbours propagate.
pub fn bilinear_sample(data: &Array2<f64>, y: f64, x: f64) -> Option<f64> {
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    let (h, w) = data.dim();
    let (x0, fx) = quantize(x);
    let (y0, fy) = quantize(y);

    let taps = [
        (y0, x0, (1.0 - fx) * (1.0 - fy)),
        (y0, x0 + 1, fx * (1.0 - fy)),
        (y0 + 1, x0, (1.0 - fx) * fy),
        (y0 + 1, x0 + 1, fx * fy),
    ];

    let mut acc = 0.0;
    for (r, c, weight) in taps {
        if weight == 0.0 {
            continue;
        }
        if r < 0 || c < 0 || r >= h as i64 || c >= w as i64 {
            return None;
        }
        acc += data[[r as usize, c as usize]] * weight;
    }
    Some(acc)
}

/// Integer part and fractional part rounded to the nearest 1/32.
fn quantize(v: f64) -> (i64, f64) {
    let steps = WARP_SUBPIXEL_STEPS as i64;
    let q = (v * WARP_SUBPIXEL_STEPS).round() as i64;
    (q.div_euclid(steps), q.rem_euclid(steps) as f64 / WARP_SUBPIXEL_STEPS)
}
