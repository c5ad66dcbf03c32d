//! Threshold-and-label source extraction on a background-subtracted image.

use ndarray::{Array2, Zip};
use tracing::debug;

use crate::config::DetectionConfig;
use crate::error::{CastorError, Result};
use crate::frame::Point;
use crate::stats::finite_median;

use super::background::Background;
use super::components::label_regions;

/// One detected source.
///
/// Coordinates are 0-based pixel positions (`x` along columns). Moments and
/// flux are measured on the background-subtracted image over the pixels of the
/// detection region.
#[derive(Clone, Debug, PartialEq)]
pub struct Source {
    pub x: f64,
    pub y: f64,
    pub flux: f64,
    pub peak: f64,
    pub npix: usize,
    pub x2: f64,
    pub y2: f64,
    pub xy: f64,
    /// Semi-major axis of the moment ellipse.
    pub a: f64,
    /// Semi-minor axis of the moment ellipse.
    pub b: f64,
    /// Position angle of the major axis, radians counter-clockwise from +x.
    pub theta: f64,
    pub xmin: usize,
    pub xmax: usize,
    pub ymin: usize,
    pub ymax: usize,
}

impl Source {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Sources of one image, sorted ascending by flux.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceCatalog {
    sources: Vec<Source>,
}

impl SourceCatalog {
    pub fn new(sources: Vec<Source>) -> Self {
        Self { sources }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Source> {
        self.sources.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Source> {
        self.sources.iter()
    }

    pub fn coordinates(&self) -> Vec<Point> {
        self.sources.iter().map(Source::position).collect()
    }

    /// Sub-catalog of the given rows, in the given order. Out-of-range rows are skipped.
    pub fn select(&self, rows: &[usize]) -> SourceCatalog {
        SourceCatalog::new(
            rows.iter()
                .filter_map(|&i| self.sources.get(i).cloned())
                .collect(),
        )
    }

    pub fn into_vec(self) -> Vec<Source> {
        self.sources
    }
}

impl<'a> IntoIterator for &'a SourceCatalog {
    type Item = &'a Source;
    type IntoIter = std::slice::Iter<'a, Source>;

    fn into_iter(self) -> Self::IntoIter {
        self.sources.iter()
    }
}

/// Detect sources in `image`, ignoring non-finite pixels.
pub fn extract_sources(image: &Array2<f32>, config: &DetectionConfig) -> SourceCatalog {
    let valid = image.mapv(f32::is_finite);
    extract_valid(image, &valid, config)
}

/// Detect sources in `image`, considering only pixels where `valid` is true.
pub fn extract_sources_masked(
    image: &Array2<f32>,
    valid: &Array2<bool>,
    config: &DetectionConfig,
) -> Result<SourceCatalog> {
    if valid.dim() != image.dim() {
        return Err(CastorError::ShapeMismatch {
            expected: image.dim(),
            found: valid.dim(),
        });
    }
    let mut valid = valid.clone();
    Zip::from(&mut valid)
        .and(image)
        .for_each(|m, &v| *m = *m && v.is_finite());
    Ok(extract_valid(image, &valid, config))
}

/// Positions of the sources of `image`, in catalog (ascending flux) order.
pub fn source_coordinates(image: &Array2<f32>, config: &DetectionConfig) -> Vec<Point> {
    extract_sources(image, config).coordinates()
}

fn extract_valid(
    image: &Array2<f32>,
    valid: &Array2<bool>,
    config: &DetectionConfig,
) -> SourceCatalog {
    let Some(fill) = finite_median(
        image
            .iter()
            .zip(valid.iter())
            .filter(|(_, &ok)| ok)
            .map(|(&v, _)| v),
    ) else {
        return SourceCatalog::default();
    };

    // Invalid pixels take the median so they neither trigger detections nor
    // bias the background mesh.
    let mut filled = image.clone();
    Zip::from(&mut filled)
        .and(valid)
        .for_each(|v, &ok| {
            if !ok {
                *v = fill;
            }
        });

    let background = Background::estimate(&filled, config);
    let residual = background.subtract(&filled);
    let threshold = config.threshold_sigma * background.global_rms();
    let mask = residual.mapv(|v| v > threshold);
    let (labels, count) = label_regions(&mask);

    let mut regions = vec![RegionMoments::default(); count];
    for ((row, col), &label) in labels.indexed_iter() {
        if label > 0 {
            regions[label as usize - 1].add(col, row, residual[[row, col]] as f64);
        }
    }

    let mut sources: Vec<Source> = regions
        .iter()
        .filter(|r| r.npix >= config.min_area.max(1))
        .map(RegionMoments::to_source)
        .collect();
    sources.sort_by(|a, b| a.flux.total_cmp(&b.flux));

    debug!(
        regions = count,
        sources = sources.len(),
        global_rms = background.global_rms(),
        threshold,
        "Sources extracted"
    );
    SourceCatalog::new(sources)
}

/// Raw sums over the pixels of one labelled region.
#[derive(Clone, Debug)]
struct RegionMoments {
    npix: usize,
    sum: f64,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_yy: f64,
    sum_xy: f64,
    peak: f64,
    xmin: usize,
    xmax: usize,
    ymin: usize,
    ymax: usize,
}

impl Default for RegionMoments {
    fn default() -> Self {
        Self {
            npix: 0,
            sum: 0.0,
            sum_x: 0.0,
            sum_y: 0.0,
            sum_xx: 0.0,
            sum_yy: 0.0,
            sum_xy: 0.0,
            peak: f64::NEG_INFINITY,
            xmin: usize::MAX,
            xmax: 0,
            ymin: usize::MAX,
            ymax: 0,
        }
    }
}

impl RegionMoments {
    fn add(&mut self, col: usize, row: usize, value: f64) {
        let (x, y) = (col as f64, row as f64);
        self.npix += 1;
        self.sum += value;
        self.sum_x += value * x;
        self.sum_y += value * y;
        self.sum_xx += value * x * x;
        self.sum_yy += value * y * y;
        self.sum_xy += value * x * y;
        self.peak = self.peak.max(value);
        self.xmin = self.xmin.min(col);
        self.xmax = self.xmax.max(col);
        self.ymin = self.ymin.min(row);
        self.ymax = self.ymax.max(row);
    }

    fn to_source(&self) -> Source {
        let (x, y, x2, y2, xy) = if self.sum > 0.0 {
            let x = self.sum_x / self.sum;
            let y = self.sum_y / self.sum;
            (
                x,
                y,
                self.sum_xx / self.sum - x * x,
                self.sum_yy / self.sum - y * y,
                self.sum_xy / self.sum - x * y,
            )
        } else {
            // Centre of the bounding box when the region carries no flux.
            (
                (self.xmin + self.xmax) as f64 / 2.0,
                (self.ymin + self.ymax) as f64 / 2.0,
                0.0,
                0.0,
                0.0,
            )
        };

        let mid = (x2 + y2) / 2.0;
        let spread = (((x2 - y2) / 2.0).powi(2) + xy * xy).sqrt();
        Source {
            x,
            y,
            flux: self.sum,
            peak: self.peak,
            npix: self.npix,
            x2,
            y2,
            xy,
            a: (mid + spread).max(0.0).sqrt(),
            b: (mid - spread).max(0.0).sqrt(),
            theta: 0.5 * (2.0 * xy).atan2(x2 - y2),
            xmin: self.xmin,
            xmax: self.xmax,
            ymin: self.ymin,
            ymax: self.ymax,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(image: &mut Array2<f32>, cx: usize, cy: usize, amplitude: f32) {
        for dy in 0..3 {
            for dx in 0..3 {
                let w = if dx == 1 && dy == 1 { 1.0 } else { 0.5 };
                image[[cy + dy - 1, cx + dx - 1]] += amplitude * w;
            }
        }
    }

    fn noisy_field() -> Array2<f32> {
        // Deterministic low-amplitude pattern so the background RMS is not zero.
        Array2::from_shape_fn((64, 64), |(r, c)| {
            100.0 + ((r * 7 + c * 13) % 5) as f32 * 0.2
        })
    }

    #[test]
    fn test_catalog_sorted_by_flux() {
        let mut image = noisy_field();
        blob(&mut image, 10, 10, 500.0);
        blob(&mut image, 40, 20, 100.0);
        blob(&mut image, 30, 50, 1000.0);
        let catalog = extract_sources(&image, &DetectionConfig::default());

        assert_eq!(catalog.len(), 3);
        let fluxes: Vec<f64> = catalog.iter().map(|s| s.flux).collect();
        assert!(fluxes.windows(2).all(|w| w[0] <= w[1]));
        let brightest = catalog.get(2).unwrap();
        assert!((brightest.x - 30.0).abs() < 0.1);
        assert!((brightest.y - 50.0).abs() < 0.1);
        assert_eq!(brightest.npix, 9);
    }

    #[test]
    fn test_masked_pixels_do_not_crash_or_detect() {
        let mut image = noisy_field();
        blob(&mut image, 20, 20, 800.0);
        let mut valid = Array2::from_elem(image.dim(), true);
        for r in 40..60 {
            for c in 40..60 {
                image[[r, c]] = 1.0e6;
                valid[[r, c]] = false;
            }
        }
        let catalog = extract_sources_masked(&image, &valid, &DetectionConfig::default()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!((catalog.get(0).unwrap().x - 20.0).abs() < 0.1);
    }

    #[test]
    fn test_small_regions_dropped() {
        let mut image = noisy_field();
        image[[32, 32]] += 1000.0;
        let catalog = extract_sources(&image, &DetectionConfig::default());
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_all_invalid_gives_empty_catalog() {
        let image = Array2::from_elem((16, 16), f32::NAN);
        assert!(extract_sources(&image, &DetectionConfig::default()).is_empty());
    }

    #[test]
    fn test_mask_shape_checked() {
        let image = Array2::<f32>::zeros((4, 4));
        let valid = Array2::from_elem((3, 4), true);
        assert!(extract_sources_masked(&image, &valid, &DetectionConfig::default()).is_err());
    }
}
