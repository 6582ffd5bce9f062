//! Mean anomaly time series over one aquifer.
//!
//! Cells are the grid squares centred on the store's lat/lon coordinates.
//! A cell counts when at least `min_overlap` of its equal-area footprint
//! lies inside the aquifer; the series is the per-month mean over counted
//! cells, skipping missing values.

use geo::{Area, BooleanOps, BoundingRect, MultiPolygon, Rect, coord};
use ndarray::{Array3, Ix3};
use serde::Serialize;
use std::ops::Range;
use std::path::Path;

use crate::config::{GraceConfig, SeriesConfig};
use crate::export::geojson::{AquiferFeature, read_aquifers_geojson};
use crate::logging::{self, Stage};
use crate::model::{PrepError, Result};
use crate::projection::project_multipolygon;
use crate::store::TiledStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellOverlap {
    pub lat: f64,
    pub lon: f64,
    /// Share of the cell's area inside the aquifer, `0.0..=1.0`.
    pub fraction: f64,
}

/// Serialized as the `series` command output.
///
/// Months where every counted cell is missing are `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AquiferSeries {
    pub id: i64,
    pub n: String,
    pub time: Vec<f64>,
    pub anomaly_mean: Vec<Option<f64>>,
    pub uncertainty_mean: Vec<Option<f64>>,
    pub cells: Vec<CellOverlap>,
}

/// Series for aquifer `id` of the GeoJSON output, read from the tiled store.
pub fn aquifer_series(
    geojson_path: &Path,
    store_root: &Path,
    id: i64,
    series: &SeriesConfig,
    grace: &GraceConfig,
) -> Result<AquiferSeries> {
    let feature = read_aquifers_geojson(geojson_path)?
        .into_iter()
        .find(|f| f.id == id)
        .ok_or(PrepError::AquiferNotFound(id))?;
    let store = TiledStore::open(store_root)?;
    series_from_store(&store, &feature, series, grace)
}

pub fn series_from_store(
    store: &TiledStore,
    feature: &AquiferFeature,
    series: &SeriesConfig,
    grace: &GraceConfig,
) -> Result<AquiferSeries> {
    let bbox = feature
        .geometry
        .bounding_rect()
        .ok_or_else(|| PrepError::EmptyResult(format!("aquifer {} has no geometry", feature.id)))?;

    let time = to_vec(store, &grace.time_dimension)?;
    let lat = to_vec(store, &grace.lat_dimension)?;
    let lon = to_vec(store, &grace.lon_dimension)?;
    let cell_size = grid_step(&lat)
        .or_else(|| grid_step(&lon))
        .ok_or_else(|| PrepError::GridShape {
            variable: grace.lat_dimension.clone(),
            detail: "need two coordinates to infer the cell size".to_string(),
        })?;

    let margin = series.margin_cells as f64 * cell_size;
    let ys = index_window(&lat, bbox.min().y - margin, bbox.max().y + margin);
    let xs = index_window(&lon, bbox.min().x - margin, bbox.max().x + margin);
    let (Some(ys), Some(xs)) = (ys, xs) else {
        return Err(PrepError::EmptyResult(format!(
            "aquifer {} lies outside the grid",
            feature.id
        )));
    };

    let projected = project_multipolygon(&feature.geometry);
    let half = cell_size / 2.0;
    let mut kept = Vec::new();
    let mut cells = Vec::new();
    for (iy, y) in ys.clone().map(|i| (i, lat[i])) {
        for (ix, x) in xs.clone().map(|i| (i, lon[i])) {
            let fraction = overlap_fraction(&projected, x, y, half);
            if fraction >= series.min_overlap {
                kept.push((iy - ys.start, ix - xs.start));
                cells.push(CellOverlap { lat: y, lon: x, fraction });
            }
        }
    }
    logging::debug(
        Stage::Series,
        Some(&feature.name),
        &format!(
            "{} of {} cells in window meet overlap {}",
            kept.len(),
            ys.len() * xs.len(),
            series.min_overlap
        ),
    );
    if kept.is_empty() {
        logging::warn(
            Stage::Series,
            Some(&feature.name),
            "no cell meets the overlap threshold, series is empty",
        );
    }

    let window = [0..time.len(), ys, xs];
    let anomaly = read_field(store, &grace.anomaly_variable, &window)?;
    let uncertainty = read_field(store, &grace.uncertainty_variable, &window)?;

    Ok(AquiferSeries {
        id: feature.id,
        n: feature.name.clone(),
        anomaly_mean: mean_over_cells(&anomaly, &kept),
        uncertainty_mean: mean_over_cells(&uncertainty, &kept),
        time,
        cells,
    })
}

fn to_vec(store: &TiledStore, name: &str) -> Result<Vec<f64>> {
    Ok(store.read_array(name)?.iter().copied().collect())
}

fn read_field(store: &TiledStore, name: &str, window: &[Range<usize>]) -> Result<Array3<f64>> {
    Ok(store.read_window(name, window)?.into_dimensionality::<Ix3>()?)
}

fn grid_step(values: &[f64]) -> Option<f64> {
    match values {
        [a, b, ..] if a != b => Some((b - a).abs()),
        _ => None,
    }
}

/// Contiguous index range of the coordinates inside `lo..=hi`.
///
/// Works for ascending and descending coordinates.
fn index_window(values: &[f64], lo: f64, hi: f64) -> Option<Range<usize>> {
    let inside = |v: &f64| *v >= lo && *v <= hi;
    let first = values.iter().position(inside)?;
    let last = values.iter().rposition(inside)?;
    Some(first..last + 1)
}

/// Equal-area share of the cell centred on `(x, y)` covered by `projected`.
fn overlap_fraction(projected: &MultiPolygon<f64>, x: f64, y: f64, half: f64) -> f64 {
    let cell = MultiPolygon(vec![
        Rect::new(coord! { x: x - half, y: y - half }, coord! { x: x + half, y: y + half }).to_polygon(),
    ]);
    let cell = project_multipolygon(&cell);
    let cell_area = cell.unsigned_area();
    if cell_area == 0.0 {
        return 0.0;
    }
    projected.intersection(&cell).unsigned_area() / cell_area
}

/// Per-month mean over the listed window cells, skipping NaN.
fn mean_over_cells(field: &Array3<f64>, cells: &[(usize, usize)]) -> Vec<Option<f64>> {
    field
        .outer_iter()
        .map(|step| {
            let (sum, count) = cells
                .iter()
                .map(|&(iy, ix)| step[[iy, ix]])
                .filter(|v| !v.is_nan())
                .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            (count > 0).then(|| sum / count as f64)
        })
        .collect()
}
