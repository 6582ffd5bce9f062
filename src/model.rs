/// Core data types for the groundwater data-preparation jobs.
///
/// This module defines the shared domain model imported by all other modules:
/// aquifer records before and after dissolving, the in-memory GRACE dataset,
/// attribute values carried between file formats, and the crate error type.
/// It contains no I/O.

use geo::MultiPolygon;
use ndarray::{Array2, Array3};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Field and variable names
// ---------------------------------------------------------------------------

/// Shapefile attribute holding the individual aquifer name.
pub const FIELD_AQUIFER: &str = "Aquifer";

/// Shapefile attribute holding the broader aquifer system the polygon belongs to.
pub const FIELD_BROADER: &str = "Broader";

/// Output column for the broader group name.
pub const COLUMN_NAME: &str = "n";

/// Output column for the zero-based aquifer identifier.
pub const COLUMN_ID: &str = "id";

/// Output column for the dissolved geometry.
pub const COLUMN_GEOMETRY: &str = "geometry";

// ---------------------------------------------------------------------------
// Aquifer types
// ---------------------------------------------------------------------------

/// One polygon record as read from the source shapefile.
///
/// Geometry is WGS84 longitude/latitude. Null text attributes are read as
/// empty strings.
#[derive(Debug, Clone, PartialEq)]
pub struct AquiferRecord {
    pub aquifer: String,
    pub broader: String,
    pub geometry: MultiPolygon<f64>,
}

/// One output row: every record of a broader group merged into one geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct DissolvedAquifer {
    /// Zero-based, contiguous in output order.
    pub id: i64,
    /// The broader group name, written as column `n`.
    pub name: String,
    /// First aquifer name of the group in `(Broader, Aquifer)` order.
    /// Not written to the outputs.
    pub representative_aquifer: String,
    /// Number of source records merged into this row.
    pub source_records: usize,
    pub geometry: MultiPolygon<f64>,
}

// ---------------------------------------------------------------------------
// Gridded dataset types
// ---------------------------------------------------------------------------

/// An attribute value in a form every output format can carry.
///
/// Integer NetCDF attributes widen to `Number`; byte and unsigned vector
/// attributes are not carried.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Texts(Vec<String>),
    Number(f64),
    Numbers(Vec<f64>),
}

impl AttrValue {
    /// JSON form used in tiled store metadata.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttrValue::Text(s) => serde_json::Value::from(s.as_str()),
            AttrValue::Texts(v) => serde_json::Value::from(v.clone()),
            AttrValue::Number(n) => json_number(*n),
            AttrValue::Numbers(v) => serde_json::Value::Array(v.iter().map(|n| json_number(*n)).collect()),
        }
    }
}

// JSON has no NaN; Zarr metadata spells it out.
fn json_number(n: f64) -> serde_json::Value {
    if n.is_nan() {
        serde_json::Value::from("NaN")
    } else if n.is_infinite() {
        serde_json::Value::from(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        serde_json::Value::from(n)
    }
}

/// Named attributes in source order.
pub type Attributes = Vec<(String, AttrValue)>;

/// A one-dimensional coordinate variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    pub name: String,
    pub values: Vec<f64>,
    pub attributes: Attributes,
}

/// Floating-point width a variable is stored with on disk.
///
/// Values are held as `f64` in memory either way; `Float32` variables are
/// narrowed again when written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueType {
    Float32,
    #[default]
    Float64,
}

impl ValueType {
    /// Zarr `data_type` name.
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Float32 => "float32",
            ValueType::Float64 => "float64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "float32" => Some(ValueType::Float32),
            "float64" => Some(ValueType::Float64),
            _ => None,
        }
    }

    /// Bytes per element.
    pub fn size(self) -> usize {
        match self {
            ValueType::Float32 => 4,
            ValueType::Float64 => 8,
        }
    }
}

/// A `(time, lat, lon)` data variable. Missing values are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct GridVariable {
    pub name: String,
    pub data: Array3<f64>,
    /// On-disk width, taken from the source file.
    pub dtype: ValueType,
    pub attributes: Attributes,
}

/// A gridded water-storage dataset: three coordinates and the data
/// variables laid out over them, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct GraceDataset {
    pub time: Coordinate,
    pub lat: Coordinate,
    pub lon: Coordinate,
    pub variables: Vec<GridVariable>,
    pub global_attributes: Attributes,
}

impl GraceDataset {
    /// `(time, lat, lon)` lengths.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.time.values.len(), self.lat.values.len(), self.lon.values.len())
    }

    pub fn variable(&self, name: &str) -> Option<&GridVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut GridVariable> {
        self.variables.iter_mut().find(|v| v.name == name)
    }

    pub fn coordinates(&self) -> [&Coordinate; 3] {
        [&self.time, &self.lat, &self.lon]
    }

    /// Inserts `variable`, replacing any variable with the same name in place.
    pub fn upsert_variable(&mut self, variable: GridVariable) {
        match self.variable_mut(&variable.name) {
            Some(existing) => *existing = variable,
            None => self.variables.push(variable),
        }
    }
}

/// Per-cell time mean of a `(time, lat, lon)` field.
pub type CellMean = Array2<f64>;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise while reading, transforming or writing datasets.
#[derive(Debug, thiserror::Error)]
pub enum PrepError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Shapefile error: {0}")]
    Shapefile(#[from] shapefile::Error),
    #[error("NetCDF error: {0}")]
    Netcdf(#[from] netcdf::Error),
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] Box<geojson::Error>),
    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    /// The source table lacks a required attribute.
    #[error("Missing field '{0}' in input")]
    MissingField(String),
    /// The source dataset lacks a required variable or dimension.
    #[error("Missing variable '{0}' in input")]
    MissingVariable(String),
    #[error("Unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),
    /// A variable's layout does not match the `(time, lat, lon)` grid.
    #[error("Grid shape mismatch for '{variable}': {detail}")]
    GridShape { variable: String, detail: String },
    /// A step left nothing to write.
    #[error("Empty result: {0}")]
    EmptyResult(String),
    #[error("Refusing to overwrite {0}: not a tiled store")]
    NotAStore(PathBuf),
    #[error("Unsupported data type '{0}' in tiled store")]
    UnsupportedDataType(String),
    #[error("Aquifer id {0} not found")]
    AquiferNotFound(i64),
    /// A setting parsed but is outside its allowed range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<geojson::Error> for PrepError {
    fn from(err: geojson::Error) -> Self {
        PrepError::GeoJson(Box::new(err))
    }
}

impl PrepError {
    /// Wraps an `std::io::Error` with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PrepError::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, PrepError>;
