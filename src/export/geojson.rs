/// GeoJSON output for the dissolved aquifer table
///
/// A single FeatureCollection; each feature carries `n` and `id`
/// properties and its dissolved MultiPolygon.

use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::model::{COLUMN_ID, COLUMN_NAME, DissolvedAquifer, PrepError, Result};

/// One feature read back from the GeoJSON output.
#[derive(Debug, Clone, PartialEq)]
pub struct AquiferFeature {
    pub id: i64,
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

pub fn write_aquifers_geojson(path: &Path, aquifers: &[DissolvedAquifer]) -> Result<()> {
    let collection = to_feature_collection(aquifers);
    let file = File::create(path).map_err(|e| PrepError::io(path, e))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer(&mut out, &collection)?;
    out.flush().map_err(|e| PrepError::io(path, e))?;
    Ok(())
}

pub fn to_feature_collection(aquifers: &[DissolvedAquifer]) -> FeatureCollection {
    let features = aquifers
        .iter()
        .map(|a| {
            let mut properties = JsonObject::new();
            properties.insert(COLUMN_NAME.to_string(), serde_json::Value::from(a.name.as_str()));
            properties.insert(COLUMN_ID.to_string(), serde_json::Value::from(a.id));
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::from(&a.geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Read every feature back. Polygon geometries are widened to MultiPolygon.
pub fn read_aquifers_geojson(path: &Path) -> Result<Vec<AquiferFeature>> {
    let text = std::fs::read_to_string(path).map_err(|e| PrepError::io(path, e))?;
    let collection = FeatureCollection::try_from(text.parse::<GeoJson>()?)?;

    collection
        .features
        .into_iter()
        .enumerate()
        .map(|(index, feature)| {
            let id = feature
                .property(COLUMN_ID)
                .and_then(|v| v.as_i64())
                .ok_or_else(|| PrepError::MissingField(format!("{} (feature {})", COLUMN_ID, index)))?;
            let name = feature
                .property(COLUMN_NAME)
                .and_then(|v| v.as_str())
                .ok_or_else(|| PrepError::MissingField(format!("{} (feature {})", COLUMN_NAME, index)))?
                .to_string();
            let geometry = match feature.geometry {
                Some(geometry) => to_multipolygon(geometry.value)?,
                None => MultiPolygon(Vec::new()),
            };
            Ok(AquiferFeature { id, name, geometry })
        })
        .collect()
}

fn to_multipolygon(value: geojson::Value) -> Result<MultiPolygon<f64>> {
    match value {
        geojson::Value::Polygon(_) => Ok(MultiPolygon(vec![geo::Polygon::try_from(value)?])),
        other => Ok(MultiPolygon::try_from(other)?),
    }
}
