use crate::frame::Point;

use super::extract::SourceCatalog;

/// For every query position, the catalog source(s) closest to it.
///
/// Returns the matched sources and their distances, ordered by query. A query
/// equidistant from several sources matches all of them (exact equality on
/// the minimum), so the result can be longer than `queries`. An empty catalog
/// matches nothing.
pub fn find_closest_sources(
    catalog: &SourceCatalog,
    queries: &[Point],
) -> (SourceCatalog, Vec<f64>) {
    let positions = catalog.coordinates();
    if positions.is_empty() {
        return (SourceCatalog::default(), Vec::new());
    }

    // distances[q][s]: one column of the catalog x query matrix per query.
    let distances: Vec<Vec<f64>> = queries
        .iter()
        .map(|q| {
            positions
                .iter()
                .map(|p| ((p.x - q.x).powi(2) + (p.y - q.y).powi(2)).sqrt())
                .collect()
        })
        .collect();

    let mut rows = Vec::with_capacity(queries.len());
    let mut matched = Vec::with_capacity(queries.len());
    for column in &distances {
        let min = column.iter().copied().fold(f64::INFINITY, f64::min);
        for (row, &d) in column.iter().enumerate() {
            if d == min {
                rows.push(row);
                matched.push(d);
            }
        }
    }

    (catalog.select(&rows), matched)
}
