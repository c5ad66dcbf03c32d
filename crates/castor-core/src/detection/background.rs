//! Spatially varying sky background.
//!
//! The image is divided into a mesh of square cells. Each cell gets a
//! sigma-clipped background level (a mode estimate) and noise RMS; the mesh is
//! median-filtered to suppress cells dominated by bright sources, then
//! bilinearly interpolated back to full resolution.

use ndarray::Array2;
use rayon::prelude::*;

use crate::config::DetectionConfig;
use crate::consts::{BACKGROUND_CLIP_ITERATIONS, BACKGROUND_CLIP_SIGMA, PARALLEL_PIXEL_THRESHOLD};
use crate::stats::{mean_stddev, median_in_place};

#[derive(Clone, Debug)]
pub struct Background {
    back: Array2<f32>,
    global_back: f32,
    global_rms: f32,
}

impl Background {
    /// Estimate the background of `data`. Non-finite pixels are ignored.
    pub fn estimate(data: &Array2<f32>, config: &DetectionConfig) -> Self {
        let (h, w) = data.dim();
        let mesh = config.mesh_size.max(1);
        let ny = h.div_ceil(mesh).max(1);
        let nx = w.div_ceil(mesh).max(1);

        let cells: Vec<Option<(f64, f64)>> = (0..ny * nx)
            .into_par_iter()
            .map(|cell| {
                let (cy, cx) = (cell / nx, cell % nx);
                let mut values: Vec<f64> = Vec::with_capacity(mesh * mesh);
                for row in cy * mesh..((cy + 1) * mesh).min(h) {
                    for col in cx * mesh..((cx + 1) * mesh).min(w) {
                        let v = data[[row, col]];
                        if v.is_finite() {
                            values.push(v as f64);
                        }
                    }
                }
                cell_statistics(&mut values)
            })
            .collect();

        let (mut back_mesh, mut rms_mesh) = fill_missing_cells(&cells, ny, nx);
        if config.filter_size > 1 {
            back_mesh = median_filter(&back_mesh, config.filter_size);
            rms_mesh = median_filter(&rms_mesh, config.filter_size);
        }

        let global_back = back_mesh.mean().unwrap_or(0.0) as f32;
        let global_rms = rms_mesh.mean().unwrap_or(0.0) as f32;
        let back = interpolate_mesh(&back_mesh, (h, w), mesh);

        Self {
            back,
            global_back,
            global_rms,
        }
    }

    /// Full-resolution background map.
    pub fn back(&self) -> &Array2<f32> {
        &self.back
    }

    /// Mean background level over the mesh.
    pub fn global_back(&self) -> f32 {
        self.global_back
    }

    /// Mean background noise RMS over the mesh.
    pub fn global_rms(&self) -> f32 {
        self.global_rms
    }

    /// `data - background`.
    pub fn subtract(&self, data: &Array2<f32>) -> Array2<f32> {
        data - &self.back
    }
}

/// Clipped (background, rms) of one cell, `None` if it has no valid pixel.
fn cell_statistics(values: &mut Vec<f64>) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    for _ in 0..BACKGROUND_CLIP_ITERATIONS {
        let (_, std) = mean_stddev(values);
        let median = median_in_place(values.as_mut_slice())?;
        let lo = median - BACKGROUND_CLIP_SIGMA * std;
        let hi = median + BACKGROUND_CLIP_SIGMA * std;
        let before = values.len();
        values.retain(|&v| v >= lo && v <= hi);
        if values.len() == before || values.is_empty() {
            break;
        }
    }
    if values.is_empty() {
        return None;
    }

    let (mean, std) = mean_stddev(values);
    let median = median_in_place(values.as_mut_slice())?;
    // Mode estimate, unless the clipped distribution is strongly skewed.
    let back = if std > 0.0 && ((mean - median) / std).abs() < 0.3 {
        2.5 * median - 1.5 * mean
    } else {
        median
    };
    Some((back, std))
}

/// Replace cells without valid pixels by the mean of the valid ones.
fn fill_missing_cells(
    cells: &[Option<(f64, f64)>],
    ny: usize,
    nx: usize,
) -> (Array2<f64>, Array2<f64>) {
    let valid: Vec<(f64, f64)> = cells.iter().flatten().copied().collect();
    let n = valid.len().max(1) as f64;
    let fallback = (
        valid.iter().map(|c| c.0).sum::<f64>() / n,
        valid.iter().map(|c| c.1).sum::<f64>() / n,
    );

    let mut back = Array2::<f64>::zeros((ny, nx));
    let mut rms = Array2::<f64>::zeros((ny, nx));
    for (i, cell) in cells.iter().enumerate() {
        let (b, r) = cell.unwrap_or(fallback);
        back[[i / nx, i % nx]] = b;
        rms[[i / nx, i % nx]] = r;
    }
    (back, rms)
}

fn median_filter(mesh: &Array2<f64>, size: usize) -> Array2<f64> {
    let (ny, nx) = mesh.dim();
    let half = size / 2;
    let mut out = Array2::<f64>::zeros((ny, nx));
    let mut window = Vec::with_capacity(size * size);
    for y in 0..ny {
        for x in 0..nx {
            window.clear();
            for wy in y.saturating_sub(half)..(y + half + 1).min(ny) {
                for wx in x.saturating_sub(half)..(x + half + 1).min(nx) {
                    window.push(mesh[[wy, wx]]);
                }
            }
            out[[y, x]] = median_in_place(&mut window).unwrap_or(mesh[[y, x]]);
        }
    }
    out
}

/// Bilinear interpolation of the mesh between cell centres, clamped at the edges.
fn interpolate_mesh(mesh: &Array2<f64>, (h, w): (usize, usize), cell: usize) -> Array2<f32> {
    let (ny, nx) = mesh.dim();
    let axis_weights = |pos: usize, n: usize| -> (usize, usize, f64) {
        let t = ((pos as f64 + 0.5) / cell as f64 - 0.5).clamp(0.0, (n - 1) as f64);
        let i0 = t.floor() as usize;
        let i1 = (i0 + 1).min(n - 1);
        (i0, i1, t - i0 as f64)
    };

    let fill_row = |row: usize, out: &mut [f32]| {
        let (y0, y1, fy) = axis_weights(row, ny);
        for (col, v) in out.iter_mut().enumerate() {
            let (x0, x1, fx) = axis_weights(col, nx);
            let top = mesh[[y0, x0]] * (1.0 - fx) + mesh[[y0, x1]] * fx;
            let bottom = mesh[[y1, x0]] * (1.0 - fx) + mesh[[y1, x1]] * fx;
            *v = (top * (1.0 - fy) + bottom * fy) as f32;
        }
    };

    let mut back = vec![0.0f32; h * w];
    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        back.par_chunks_mut(w.max(1))
            .enumerate()
            .for_each(|(row, out)| fill_row(row, out));
    } else {
        for (row, out) in back.chunks_mut(w.max(1)).enumerate() {
            fill_row(row, out);
        }
    }
    Array2::from_shape_vec((h, w), back).unwrap_or_else(|_| Array2::zeros((h, w)))
}
