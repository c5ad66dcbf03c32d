//! Star-pattern transform estimation.
//!
//! Triangles are built from every control point and its nearest neighbours
//! and described by their side ratios, which do not change under translation,
//! rotation or scaling. Triangles of the frame and of the reference with
//! similar ratios give candidate point correspondences; each candidate yields
//! a similarity hypothesis, which is accepted once enough frame sources land
//! on a reference source. The accepted hypothesis is refined by least squares
//! over all its inliers.

use std::collections::BTreeSet;

use nalgebra::{DMatrix, DVector};
use ndarray::Array2;
use tracing::debug;

use crate::config::{DetectionConfig, RegistrationConfig};
use crate::consts::EPSILON;
use crate::detection::extract_sources;
use crate::error::GeometrySolverError;
use crate::frame::Point;

use super::transform::AffineTransform;

/// Estimator of the geometric transform between two sets of sources.
pub trait TransformSolver: Send + Sync {
    /// Control points of `image`, brightest first.
    fn find_sources(&self, image: &Array2<f32>) -> Vec<Point>;

    /// Transform mapping `sources` onto `reference`. Both lists are brightest first.
    fn estimate(
        &self,
        sources: &[Point],
        reference: &[Point],
    ) -> Result<AffineTransform, GeometrySolverError>;

    /// Detect the sources of `image`, then estimate its transform onto `reference`.
    fn estimate_image(
        &self,
        image: &Array2<f32>,
        reference: &[Point],
    ) -> Result<AffineTransform, GeometrySolverError> {
        self.estimate(&self.find_sources(image), reference)
    }
}

/// Triangle-asterism similarity solver.
#[derive(Clone, Debug, Default)]
pub struct AsterismSolver {
    config: RegistrationConfig,
}

impl AsterismSolver {
    pub fn new(config: RegistrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    /// Inliers needed to accept a hypothesis.
    fn required_matches(&self, n_sources: usize, n_reference: usize) -> usize {
        let available = (0.8 * n_sources.min(n_reference) as f64) as usize;
        self.config.min_matches.min(available).max(3)
    }

    /// Pairs (frame index, reference index) of sources that land within the
    /// pixel tolerance of a reference source under `transform`.
    fn inliers(
        &self,
        transform: &AffineTransform,
        sources: &[Point],
        reference: &[Point],
    ) -> Vec<(usize, usize)> {
        let tolerance = self.config.pixel_tolerance;
        sources
            .iter()
            .enumerate()
            .filter_map(|(i, &p)| {
                let q = transform.apply(p);
                reference
                    .iter()
                    .enumerate()
                    .map(|(j, r)| (j, q.distance(r)))
                    .filter(|&(_, d)| d <= tolerance)
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(j, _)| (i, j))
            })
            .collect()
    }
}

impl TransformSolver for AsterismSolver {
    fn find_sources(&self, image: &Array2<f32>) -> Vec<Point> {
        let detection = DetectionConfig {
            threshold_sigma: self.config.detection_sigma,
            min_area: self.config.min_area,
            ..DetectionConfig::default()
        };
        let catalog = extract_sources(image, &detection);
        catalog
            .iter()
            .rev()
            .take(self.config.max_control_points)
            .map(|s| s.position())
            .collect()
    }

    fn estimate(
        &self,
        sources: &[Point],
        reference: &[Point],
    ) -> Result<AffineTransform, GeometrySolverError> {
        let limit = self.config.max_control_points;
        let sources = &sources[..sources.len().min(limit)];
        let reference = &reference[..reference.len().min(limit)];
        let found = sources.len().min(reference.len());
        if found < 3 {
            return Err(GeometrySolverError::TooFewSources { found, required: 3 });
        }

        let k = self.config.asterism_neighbors;
        let source_triangles = build_triangles(sources, k);
        let reference_triangles = build_triangles(reference, k);
        if source_triangles.is_empty() || reference_triangles.is_empty() {
            return Err(GeometrySolverError::Degenerate);
        }

        let tolerance = self.config.invariant_tolerance;
        let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
        for (i, s) in source_triangles.iter().enumerate() {
            for (j, r) in reference_triangles.iter().enumerate() {
                if let Some(distance) = s.invariant_distance(r, tolerance) {
                    candidates.push((distance, i, j));
                }
            }
        }
        if candidates.is_empty() {
            return Err(GeometrySolverError::NoMatch);
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let required = self.required_matches(sources.len(), reference.len());
        let mut best = 0;
        for &(_, i, j) in &candidates {
            let s = &source_triangles[i];
            let r = &reference_triangles[j];
            let from: Vec<Point> = s.vertices.iter().map(|&v| sources[v]).collect();
            let to: Vec<Point> = r.vertices.iter().map(|&v| reference[v]).collect();
            let Ok(hypothesis) = fit_similarity(&from, &to) else {
                continue;
            };

            let inliers = self.inliers(&hypothesis, sources, reference);
            best = best.max(inliers.len());
            if inliers.len() < required {
                continue;
            }

            let (from, to): (Vec<Point>, Vec<Point>) = inliers
                .iter()
                .map(|&(a, b)| (sources[a], reference[b]))
                .unzip();
            let refined = fit_similarity(&from, &to).unwrap_or(hypothesis);
            debug!(
                inliers = inliers.len(),
                candidates = candidates.len(),
                scale = refined.scale(),
                rotation = refined.rotation(),
                "Transform accepted"
            );
            return if refined.is_valid() {
                Ok(refined)
            } else {
                Err(GeometrySolverError::NonFinite)
            };
        }

        Err(GeometrySolverError::TooFewInliers {
            found: best,
            required,
        })
    }
}

/// Triangle of three control points, vertices ordered by the opposite side
/// (shortest side first).
#[derive(Clone, Debug)]
struct Triangle {
    vertices: [usize; 3],
    /// Shortest and middle side lengths over the longest one.
    ratios: [f64; 2],
}

impl Triangle {
    fn new(indices: [usize; 3], points: &[Point]) -> Option<Self> {
        let p = indices.map(|i| points[i]);
        // Side opposite to each vertex.
        let mut sides = [
            (p[1].distance(&p[2]), indices[0]),
            (p[2].distance(&p[0]), indices[1]),
            (p[0].distance(&p[1]), indices[2]),
        ];
        sides.sort_by(|a, b| a.0.total_cmp(&b.0));
        let longest = sides[2].0;
        if sides[0].0 < EPSILON || sides[0].0 + sides[1].0 <= longest * 1.001 {
            return None;
        }
        Some(Self {
            vertices: [sides[0].1, sides[1].1, sides[2].1],
            ratios: [sides[0].0 / longest, sides[1].0 / longest],
        })
    }

    /// Euclidean distance between the invariants of two triangles, if each
    /// side ratio differs by less than `tolerance`.
    fn invariant_distance(&self, other: &Triangle, tolerance: f64) -> Option<f64> {
        let d0 = (self.ratios[0] - other.ratios[0]).abs();
        let d1 = (self.ratios[1] - other.ratios[1]).abs();
        (d0 < tolerance && d1 < tolerance).then(|| d0.hypot(d1))
    }
}

/// Triangles formed by every point and each pair among its `k - 1` nearest neighbours.
fn build_triangles(points: &[Point], k: usize) -> Vec<Triangle> {
    let mut seen = BTreeSet::new();
    for (i, p) in points.iter().enumerate() {
        let mut neighbours: Vec<(f64, usize)> = points
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(j, q)| (p.distance(q), j))
            .collect();
        neighbours.sort_by(|a, b| a.0.total_cmp(&b.0));
        let group: Vec<usize> = std::iter::once(i)
            .chain(neighbours.iter().take(k.max(3) - 1).map(|&(_, j)| j))
            .collect();

        for a in 0..group.len() {
            for b in a + 1..group.len() {
                for c in b + 1..group.len() {
                    let mut key = [group[a], group[b], group[c]];
                    key.sort_unstable();
                    seen.insert(key);
                }
            }
        }
    }
    seen.into_iter()
        .filter_map(|key| Triangle::new(key, points))
        .collect()
}

/// Least-squares similarity `x' = a x - b y + tx`, `y' = b x + a y + ty`.
pub fn fit_similarity(
    from: &[Point],
    to: &[Point],
) -> Result<AffineTransform, GeometrySolverError> {
    let n = from.len().min(to.len());
    if n < 2 {
        return Err(GeometrySolverError::TooFewSources {
            found: n,
            required: 2,
        });
    }

    let cx = from[..n].iter().map(|p| p.x).sum::<f64>() / n as f64;
    let cy = from[..n].iter().map(|p| p.y).sum::<f64>() / n as f64;
    let spread: f64 = from[..n]
        .iter()
        .map(|p| (p.x - cx).powi(2) + (p.y - cy).powi(2))
        .sum();
    if spread < EPSILON {
        return Err(GeometrySolverError::Degenerate);
    }

    let mut a = DMatrix::<f64>::zeros(2 * n, 4);
    let mut b = DVector::<f64>::zeros(2 * n);
    for (k, (p, q)) in from.iter().zip(to).take(n).enumerate() {
        a[(2 * k, 0)] = p.x;
        a[(2 * k, 1)] = -p.y;
        a[(2 * k, 2)] = 1.0;
        a[(2 * k + 1, 0)] = p.y;
        a[(2 * k + 1, 1)] = p.x;
        a[(2 * k + 1, 3)] = 1.0;
        b[2 * k] = q.x;
        b[2 * k + 1] = q.y;
    }

    let solution = a
        .svd(true, true)
        .solve(&b, EPSILON)
        .map_err(|_| GeometrySolverError::Degenerate)?;
    let transform = AffineTransform::from_matrix([
        [solution[0], -solution[1], solution[2]],
        [solution[1], solution[0], solution[3]],
    ]);
    if !transform.is_valid() {
        return Err(GeometrySolverError::NonFinite);
    }
    if transform.scale() < EPSILON {
        return Err(GeometrySolverError::Degenerate);
    }
    Ok(transform)
}
