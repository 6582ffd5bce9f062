//! `zarr.json` documents for groups and arrays (Zarr format 3).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{Attributes, PrepError, Result, ValueType};

pub const ZARR_FORMAT: u8 = 3;
pub const METADATA_FILE: &str = "zarr.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub zarr_format: u8,
    pub node_type: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl GroupMetadata {
    pub fn new(attributes: &Attributes) -> Self {
        Self {
            zarr_format: ZARR_FORMAT,
            node_type: "group".to_string(),
            attributes: attributes_to_json(attributes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMetadata {
    pub zarr_format: u8,
    pub node_type: String,
    pub shape: Vec<usize>,
    pub data_type: String,
    pub chunk_grid: ChunkGrid,
    pub chunk_key_encoding: ChunkKeyEncoding,
    pub fill_value: Value,
    pub codecs: Vec<Codec>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension_names: Option<Vec<Option<String>>>,
}

impl ArrayMetadata {
    /// Float array with NaN fill, regular chunks and `/`-separated keys.
    pub fn new(
        dtype: ValueType,
        shape: &[usize],
        chunk_shape: &[usize],
        codecs: Vec<Codec>,
        dimension_names: &[&str],
        attributes: &Attributes,
    ) -> Self {
        Self {
            zarr_format: ZARR_FORMAT,
            node_type: "array".to_string(),
            shape: shape.to_vec(),
            data_type: dtype.name().to_string(),
            chunk_grid: ChunkGrid::regular(chunk_shape),
            chunk_key_encoding: ChunkKeyEncoding::default(),
            fill_value: Value::from("NaN"),
            codecs,
            attributes: attributes_to_json(attributes),
            dimension_names: Some(dimension_names.iter().map(|d| Some(d.to_string())).collect()),
        }
    }

    pub fn value_type(&self) -> Result<ValueType> {
        ValueType::from_name(&self.data_type).ok_or_else(|| PrepError::UnsupportedDataType(self.data_type.clone()))
    }

    pub fn chunk_shape(&self) -> &[usize] {
        &self.chunk_grid.configuration.chunk_shape
    }

    /// Number of chunks along each dimension.
    pub fn grid_shape(&self) -> Vec<usize> {
        self.shape
            .iter()
            .zip(self.chunk_shape())
            .map(|(len, chunk)| len.div_ceil(*chunk))
            .collect()
    }

    /// Relative path of a chunk file under the array directory.
    pub fn chunk_key(&self, index: &[usize]) -> String {
        let sep = self.chunk_key_encoding.configuration.separator.as_str();
        let mut key = String::from("c");
        for i in index {
            key.push_str(sep);
            key.push_str(&i.to_string());
        }
        key
    }

    pub fn fill(&self) -> Result<f64> {
        match &self.fill_value {
            Value::Number(n) => n.as_f64().ok_or_else(|| bad_fill(&self.fill_value)),
            Value::String(s) => match s.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                _ => Err(bad_fill(&self.fill_value)),
            },
            _ => Err(bad_fill(&self.fill_value)),
        }
    }
}

fn bad_fill(value: &Value) -> PrepError {
    PrepError::UnsupportedDataType(format!("fill value {}", value))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkGrid {
    pub name: String,
    pub configuration: RegularChunkGrid,
}

impl ChunkGrid {
    pub fn regular(chunk_shape: &[usize]) -> Self {
        Self {
            name: "regular".to_string(),
            configuration: RegularChunkGrid { chunk_shape: chunk_shape.to_vec() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegularChunkGrid {
    pub chunk_shape: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkKeyEncoding {
    pub name: String,
    #[serde(default)]
    pub configuration: ChunkKeySeparator,
}

impl Default for ChunkKeyEncoding {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            configuration: ChunkKeySeparator::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkKeySeparator {
    pub separator: String,
}

impl Default for ChunkKeySeparator {
    fn default() -> Self {
        Self { separator: "/".to_string() }
    }
}

/// The codec pipeline entries this store reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "configuration", rename_all = "lowercase")]
pub enum Codec {
    Bytes { endian: String },
    Zstd { level: i32, checksum: bool },
}

impl Codec {
    pub fn little_endian() -> Self {
        Codec::Bytes { endian: "little".to_string() }
    }

    pub fn zstd(level: i32) -> Self {
        Codec::Zstd { level, checksum: false }
    }
}

pub fn attributes_to_json(attributes: &Attributes) -> Map<String, Value> {
    attributes
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttrValue;

    fn sample() -> ArrayMetadata {
        ArrayMetadata::new(
            ValueType::Float32,
            &[240, 600, 1440],
            &[240, 16, 16],
            vec![Codec::little_endian(), Codec::zstd(5)],
            &["time", "lat", "lon"],
            &vec![("units".to_string(), AttrValue::Text("cm".into()))],
        )
    }

    #[test]
    fn test_array_document_layout() {
        let doc = serde_json::to_value(sample()).unwrap();
        assert_eq!(doc["zarr_format"], 3);
        assert_eq!(doc["node_type"], "array");
        assert_eq!(doc["data_type"], "float32");
        assert_eq!(doc["chunk_grid"]["configuration"]["chunk_shape"], serde_json::json!([240, 16, 16]));
        assert_eq!(doc["chunk_key_encoding"]["configuration"]["separator"], "/");
        assert_eq!(doc["fill_value"], "NaN");
        assert_eq!(
            doc["codecs"],
            serde_json::json!([
                {"name": "bytes", "configuration": {"endian": "little"}},
                {"name": "zstd", "configuration": {"level": 5, "checksum": false}}
            ])
        );
        assert_eq!(doc["dimension_names"], serde_json::json!(["time", "lat", "lon"]));
        assert_eq!(doc["attributes"]["units"], "cm");
    }

    #[test]
    fn test_document_parses_back() {
        let text = serde_json::to_string(&sample()).unwrap();
        let parsed: ArrayMetadata = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, sample());
        assert!(parsed.fill().unwrap().is_nan());
        assert_eq!(parsed.value_type().unwrap(), ValueType::Float32);
    }

    #[test]
    fn test_grid_shape_and_keys() {
        let meta = sample();
        assert_eq!(meta.grid_shape(), [1, 38, 90]);
        assert_eq!(meta.chunk_key(&[0, 37, 89]), "c/0/37/89");
    }

    #[test]
    fn test_unknown_codec_is_rejected() {
        let err = serde_json::from_str::<Codec>(r#"{"name":"blosc","configuration":{}}"#);
        assert!(err.is_err());
    }
}
