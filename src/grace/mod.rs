//! GRACE anomaly preparation.
//!
//! Adds a time-mean anomaly of the water-storage thickness to the dataset,
//! rounds according to the configured policy, writes a full-resolution
//! NetCDF archive, and re-tiles everything into the compressed store the
//! web map reads from.
//!
//! Submodules:
//! - `anomaly`: the per-cell arithmetic.

pub mod anomaly;

use std::path::Path;

use crate::config::{GraceConfig, RoundingPolicy};
use crate::export::archive::write_archive;
use crate::ingest::grid::read_grace_dataset;
use crate::logging::{self, Stage};
use crate::model::{AttrValue, Attributes, GraceDataset, GridVariable, PrepError, Result, ValueType};
use crate::store::{ArrayWriteStats, StoreWriter};

// ---------------------------------------------------------------------------
// Job entry point
// ---------------------------------------------------------------------------

pub fn run(config: &GraceConfig) -> Result<GraceDataset> {
    let mut dataset = read_grace_dataset(&config.input, config)?;
    add_anomaly(&mut dataset, config)?;

    write_archive(&config.archive_output, &dataset)?;
    logging::log_output(
        Stage::Grace,
        &config.archive_output,
        &format!("{} variables at full resolution", dataset.variables.len()),
    );

    let stats = write_store(&config.store_output, &dataset, config)?;
    logging::log_output(
        Stage::Store,
        &config.store_output,
        &format!(
            "{}x{} tiles, {} chunks ({} bytes), {} empty chunks skipped",
            config.chunk_lat, config.chunk_lon, stats.chunks_written, stats.bytes_written, stats.chunks_skipped
        ),
    );
    Ok(dataset)
}

// ---------------------------------------------------------------------------
// Anomaly
// ---------------------------------------------------------------------------

/// Derive the anomaly variable and apply the rounding policy.
///
/// The anomaly is computed from the unrounded thickness.
pub fn add_anomaly(dataset: &mut GraceDataset, config: &GraceConfig) -> Result<()> {
    let thickness = dataset
        .variable(&config.thickness_variable)
        .ok_or_else(|| PrepError::MissingVariable(config.thickness_variable.clone()))?;

    let mean = anomaly::time_mean(&thickness.data);
    let mut data = anomaly::anomaly(&thickness.data, &mean);
    anomaly::round_field(&mut data, config.decimals);
    let attributes = anomaly_attributes(&thickness.name, &thickness.attributes);
    let dtype = thickness.dtype;

    let empty_cells = mean.iter().filter(|m| m.is_nan()).count();
    if empty_cells > 0 {
        logging::debug(
            Stage::Grace,
            Some(&config.thickness_variable),
            &format!("{} of {} cells have no data in any month", empty_cells, mean.len()),
        );
    }

    if config.rounding == RoundingPolicy::AllFields {
        for name in [&config.thickness_variable, &config.uncertainty_variable] {
            let variable = dataset
                .variable_mut(name)
                .ok_or_else(|| PrepError::MissingVariable(name.clone()))?;
            anomaly::round_field(&mut variable.data, config.decimals);
        }
    }

    dataset.upsert_variable(GridVariable {
        name: config.anomaly_variable.clone(),
        data,
        dtype,
        attributes,
    });
    logging::info(
        Stage::Grace,
        Some(&config.anomaly_variable),
        &format!("derived, rounding {:?} to {} decimals", config.rounding, config.decimals),
    );
    Ok(())
}

/// Units follow the source field; a long name says what was removed.
fn anomaly_attributes(source: &str, source_attributes: &Attributes) -> Attributes {
    let find = |key: &str| {
        source_attributes.iter().find_map(|(name, value)| match value {
            AttrValue::Text(text) if name == key => Some(text.clone()),
            _ => None,
        })
    };
    let mut attributes = Vec::new();
    let base = find("long_name").unwrap_or_else(|| source.to_string());
    attributes.push((
        "long_name".to_string(),
        AttrValue::Text(format!("{} anomaly relative to the time mean", base)),
    ));
    if let Some(units) = find("units") {
        attributes.push(("units".to_string(), AttrValue::Text(units)));
    }
    attributes
}

// ---------------------------------------------------------------------------
// Tiled store
// ---------------------------------------------------------------------------

/// Write coordinates and data variables to the tiled store.
///
/// Data variables are chunked `[time_len, chunk_lat, chunk_lon]`;
/// coordinates are a single chunk each.
pub fn write_store(root: &Path, dataset: &GraceDataset, config: &GraceConfig) -> Result<ArrayWriteStats> {
    let writer = StoreWriter::create(root, config.zstd_level)?;
    writer.write_group(&dataset.global_attributes)?;

    for coord in dataset.coordinates() {
        let data = ndarray::ArrayView1::from(coord.values.as_slice()).into_dyn();
        let chunk = [coord.values.len().max(1)];
        writer.write_array(&coord.name, data, ValueType::Float64, &chunk, &[coord.name.as_str()], &coord.attributes)?;
    }

    let (time_len, _, _) = dataset.shape();
    let chunk = [time_len.max(1), config.chunk_lat, config.chunk_lon];
    let dims = [
        dataset.time.name.as_str(),
        dataset.lat.name.as_str(),
        dataset.lon.name.as_str(),
    ];

    let mut totals = ArrayWriteStats::default();
    for variable in &dataset.variables {
        let stats = writer.write_array(
            &variable.name,
            variable.data.view().into_dyn(),
            variable.dtype,
            &chunk,
            &dims,
            &variable.attributes,
        )?;
        totals.chunks_written += stats.chunks_written;
        totals.chunks_skipped += stats.chunks_skipped;
        totals.bytes_written += stats.bytes_written;
    }
    Ok(totals)
}
