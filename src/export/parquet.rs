/// GeoParquet output for the dissolved aquifer table
///
/// Columns `n` (Utf8), `id` (Int64) and `geometry` (WKB MultiPolygon),
/// snappy-compressed, with the GeoParquet 1.0 `geo` metadata key so GIS
/// readers recognise the geometry column.

use arrow_array::{Array, ArrayRef, BinaryArray, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use geo::{BoundingRect, MultiPolygon};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use super::wkb;
use crate::model::{COLUMN_GEOMETRY, COLUMN_ID, COLUMN_NAME, DissolvedAquifer, PrepError, Result};

/// Schema metadata key defined by GeoParquet.
pub const GEO_METADATA_KEY: &str = "geo";

/// One row read back from the parquet table.
#[derive(Debug, Clone, PartialEq)]
pub struct AquiferRow {
    pub id: i64,
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

// ============================================================================
// Writer
// ============================================================================

pub fn write_aquifers_parquet(path: &Path, aquifers: &[DissolvedAquifer]) -> Result<()> {
    let schema = Arc::new(aquifer_schema(aquifers));

    let names = StringArray::from(aquifers.iter().map(|a| a.name.as_str()).collect::<Vec<_>>());
    let ids = Int64Array::from(aquifers.iter().map(|a| a.id).collect::<Vec<_>>());
    let encoded: Vec<Vec<u8>> = aquifers.iter().map(|a| wkb::encode_multipolygon(&a.geometry)).collect();
    let geometries = BinaryArray::from(encoded.iter().map(|w| w.as_slice()).collect::<Vec<_>>());

    let columns: Vec<ArrayRef> = vec![Arc::new(names), Arc::new(ids), Arc::new(geometries)];
    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let file = File::create(path).map_err(|e| PrepError::io(path, e))?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn aquifer_schema(aquifers: &[DissolvedAquifer]) -> Schema {
    let metadata = HashMap::from([(GEO_METADATA_KEY.to_string(), geo_metadata(aquifers).to_string())]);
    Schema::new(vec![
        Field::new(COLUMN_NAME, DataType::Utf8, false),
        Field::new(COLUMN_ID, DataType::Int64, false),
        Field::new(COLUMN_GEOMETRY, DataType::Binary, false),
    ])
    .with_metadata(metadata)
}

/// GeoParquet 1.0.0 column metadata. No `crs` member means OGC:CRS84.
fn geo_metadata(aquifers: &[DissolvedAquifer]) -> serde_json::Value {
    let mut column = serde_json::json!({
        "encoding": "WKB",
        "geometry_types": ["MultiPolygon"],
    });
    if let Some([min_x, min_y, max_x, max_y]) = dataset_bbox(aquifers) {
        column["bbox"] = serde_json::json!([min_x, min_y, max_x, max_y]);
    }
    serde_json::json!({
        "version": "1.0.0",
        "primary_column": COLUMN_GEOMETRY,
        "columns": { COLUMN_GEOMETRY: column },
    })
}

fn dataset_bbox(aquifers: &[DissolvedAquifer]) -> Option<[f64; 4]> {
    aquifers
        .iter()
        .filter_map(|a| a.geometry.bounding_rect())
        .map(|r| [r.min().x, r.min().y, r.max().x, r.max().y])
        .reduce(|a, b| [a[0].min(b[0]), a[1].min(b[1]), a[2].max(b[2]), a[3].max(b[3])])
}

// ============================================================================
// Reader
// ============================================================================

/// Read the table back, returning the rows and the `geo` metadata document.
pub fn read_aquifers_parquet(path: &Path) -> Result<(Vec<AquiferRow>, Option<serde_json::Value>)> {
    let file = File::open(path).map_err(|e| PrepError::io(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let geo = match builder.schema().metadata().get(GEO_METADATA_KEY) {
        Some(text) => Some(serde_json::from_str(text)?),
        None => None,
    };

    let mut rows = Vec::new();
    for batch in builder.build()? {
        let batch = batch?;
        let names = column::<StringArray>(&batch, COLUMN_NAME)?;
        let ids = column::<Int64Array>(&batch, COLUMN_ID)?;
        let geometries = column::<BinaryArray>(&batch, COLUMN_GEOMETRY)?;
        for i in 0..batch.num_rows() {
            let geometry = wkb::decode_multipolygon(geometries.value(i)).ok_or_else(|| {
                PrepError::MissingField(format!("{} (row {} is not a WKB polygon)", COLUMN_GEOMETRY, i))
            })?;
            rows.push(AquiferRow {
                id: ids.value(i),
                name: names.value(i).to_string(),
                geometry,
            });
        }
    }
    Ok((rows, geo))
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| PrepError::MissingField(name.to_string()))
}
