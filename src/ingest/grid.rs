/// GRACE gridded dataset reader
///
/// Loads the `(time, lat, lon)` water-storage grid from a NetCDF file:
/// the three coordinate variables, the thickness and uncertainty fields,
/// and the attributes needed to write an equivalent archive.
///
/// Values are decoded the way CF readers do: `_FillValue`/`missing_value`
/// become NaN and `scale_factor`/`add_offset` are applied.

use ndarray::Array3;
use netcdf::AttributeValue;
use netcdf::types::{FloatType, NcVariableType};
use std::path::Path;

use crate::config::GraceConfig;
use crate::logging::{self, Stage};
use crate::model::{AttrValue, Attributes, Coordinate, GraceDataset, GridVariable, PrepError, Result, ValueType};

/// Attributes consumed by decoding; carrying them would re-apply them.
pub const ENCODING_ATTRIBUTES: &[&str] = &["_FillValue", "missing_value", "scale_factor", "add_offset"];

// ============================================================================
// Reader
// ============================================================================

/// Read the configured coordinates and the thickness and uncertainty fields.
pub fn read_grace_dataset(path: &Path, config: &GraceConfig) -> Result<GraceDataset> {
    read_grid_file(
        path,
        config,
        &[config.thickness_variable.as_str(), config.uncertainty_variable.as_str()],
    )
}

/// Read the configured coordinates and the named `(time, lat, lon)` variables.
pub fn read_grid_file(path: &Path, config: &GraceConfig, names: &[&str]) -> Result<GraceDataset> {
    let file = netcdf::open(path)?;

    let time = read_coordinate(&file, &config.time_dimension)?;
    let lat = read_coordinate(&file, &config.lat_dimension)?;
    let lon = read_coordinate(&file, &config.lon_dimension)?;
    let dims = [
        config.time_dimension.as_str(),
        config.lat_dimension.as_str(),
        config.lon_dimension.as_str(),
    ];
    let shape = (time.values.len(), lat.values.len(), lon.values.len());

    let mut variables = Vec::new();
    for name in names {
        variables.push(read_grid_variable(&file, name, &dims, shape)?);
    }

    let global_attributes = convert_attributes(file.attributes(), &[]);

    logging::info(
        Stage::Grace,
        Some(&path.display().to_string()),
        &format!(
            "read {} variables on a {}x{}x{} (time, lat, lon) grid",
            variables.len(),
            shape.0,
            shape.1,
            shape.2
        ),
    );

    Ok(GraceDataset {
        time,
        lat,
        lon,
        variables,
        global_attributes,
    })
}

fn read_coordinate(file: &netcdf::File, name: &str) -> Result<Coordinate> {
    let var = file
        .variable(name)
        .ok_or_else(|| PrepError::MissingVariable(name.to_string()))?;
    if var.dimensions().len() != 1 {
        return Err(PrepError::GridShape {
            variable: name.to_string(),
            detail: format!("coordinate has {} dimensions, expected 1", var.dimensions().len()),
        });
    }
    let raw: Vec<f64> = var.get_values::<f64, _>(..)?;
    let encoding = Encoding::of(&var)?;
    Ok(Coordinate {
        name: name.to_string(),
        values: raw.into_iter().map(|v| encoding.decode(v)).collect(),
        attributes: convert_attributes(var.attributes(), ENCODING_ATTRIBUTES),
    })
}

fn read_grid_variable(
    file: &netcdf::File,
    name: &str,
    dims: &[&str; 3],
    shape: (usize, usize, usize),
) -> Result<GridVariable> {
    let var = file
        .variable(name)
        .ok_or_else(|| PrepError::MissingVariable(name.to_string()))?;

    let actual: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
    if actual != dims.iter().map(|d| d.to_string()).collect::<Vec<_>>() {
        return Err(PrepError::GridShape {
            variable: name.to_string(),
            detail: format!("dimensions {:?}, expected {:?}", actual, dims),
        });
    }

    let encoding = Encoding::of(&var)?;
    let dtype = value_type(&var.vartype(), &encoding);
    let raw: Vec<f64> = var.get_values::<f64, _>(..)?;
    let decoded: Vec<f64> = raw.into_iter().map(|v| encoding.decode(v)).collect();
    let data = Array3::from_shape_vec(shape, decoded)?;

    logging::debug(
        Stage::Grace,
        Some(name),
        &format!(
            "{} missing of {} values, stored as {}",
            data.iter().filter(|v| v.is_nan()).count(),
            data.len(),
            dtype.name()
        ),
    );

    Ok(GridVariable {
        name: name.to_string(),
        data,
        dtype,
        attributes: convert_attributes(var.attributes(), ENCODING_ATTRIBUTES),
    })
}

/// Float32 stays float32 unless scaling widens it; everything else is
/// written as float64.
fn value_type(vartype: &NcVariableType, encoding: &Encoding) -> ValueType {
    match vartype {
        NcVariableType::Float(FloatType::F32) if encoding.scale.is_none() && encoding.offset.is_none() => {
            ValueType::Float32
        }
        _ => ValueType::Float64,
    }
}

// ============================================================================
// CF decoding
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
struct Encoding {
    missing: Vec<f64>,
    scale: Option<f64>,
    offset: Option<f64>,
}

impl Encoding {
    fn of(var: &netcdf::Variable) -> Result<Self> {
        let mut encoding = Encoding::default();
        for attr in var.attributes() {
            let Some(value) = convert_value(attr.value()?) else {
                continue;
            };
            match (attr.name(), value) {
                ("_FillValue" | "missing_value", AttrValue::Number(n)) => encoding.missing.push(n),
                ("_FillValue" | "missing_value", AttrValue::Numbers(ns)) => encoding.missing.extend(ns),
                ("scale_factor", AttrValue::Number(n)) => encoding.scale = Some(n),
                ("add_offset", AttrValue::Number(n)) => encoding.offset = Some(n),
                _ => {}
            }
        }
        Ok(encoding)
    }

    fn decode(&self, raw: f64) -> f64 {
        if raw.is_nan() || self.missing.iter().any(|m| *m == raw) {
            return f64::NAN;
        }
        raw * self.scale.unwrap_or(1.0) + self.offset.unwrap_or(0.0)
    }
}

// ============================================================================
// Attribute conversion
// ============================================================================

fn convert_attributes<'a>(
    attributes: impl Iterator<Item = netcdf::Attribute<'a>>,
    skip: &[&str],
) -> Attributes {
    let mut out = Vec::new();
    for attr in attributes {
        let name = attr.name().to_string();
        if skip.contains(&name.as_str()) {
            continue;
        }
        match attr.value().ok().and_then(convert_value) {
            Some(value) => out.push((name, value)),
            None => logging::debug(Stage::Grace, Some(&name), "attribute type not carried"),
        }
    }
    out
}

fn convert_value(value: AttributeValue) -> Option<AttrValue> {
    let converted = match value {
        AttributeValue::Str(s) => AttrValue::Text(s),
        AttributeValue::Strs(v) => AttrValue::Texts(v),
        AttributeValue::Double(n) => AttrValue::Number(n),
        AttributeValue::Float(n) => AttrValue::Number(f64::from(n)),
        AttributeValue::Int(n) => AttrValue::Number(f64::from(n)),
        AttributeValue::Short(n) => AttrValue::Number(f64::from(n)),
        AttributeValue::Schar(n) => AttrValue::Number(f64::from(n)),
        AttributeValue::Longlong(n) => AttrValue::Number(n as f64),
        AttributeValue::Doubles(v) => AttrValue::Numbers(v),
        AttributeValue::Floats(v) => AttrValue::Numbers(v.into_iter().map(f64::from).collect()),
        AttributeValue::Ints(v) => AttrValue::Numbers(v.into_iter().map(f64::from).collect()),
        AttributeValue::Shorts(v) => AttrValue::Numbers(v.into_iter().map(f64::from).collect()),
        _ => return None,
    };
    Some(converted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_masks_fill_and_applies_scale() {
        let encoding = Encoding {
            missing: vec![-99999.0],
            scale: Some(0.5),
            offset: Some(10.0),
        };
        assert!(encoding.decode(-99999.0).is_nan());
        assert!(encoding.decode(f64::NAN).is_nan());
        assert_eq!(encoding.decode(4.0), 12.0);
    }

    #[test]
    fn test_default_encoding_is_identity() {
        assert_eq!(Encoding::default().decode(3.25), 3.25);
    }

    #[test]
    fn test_value_type_follows_source() {
        let plain = Encoding::default();
        assert_eq!(value_type(&NcVariableType::Float(FloatType::F32), &plain), ValueType::Float32);
        assert_eq!(value_type(&NcVariableType::Float(FloatType::F64), &plain), ValueType::Float64);
        let scaled = Encoding { scale: Some(0.01), ..Encoding::default() };
        assert_eq!(value_type(&NcVariableType::Float(FloatType::F32), &scaled), ValueType::Float64);
    }

    #[test]
    fn test_convert_value_widens_numbers() {
        assert_eq!(convert_value(AttributeValue::Int(3)), Some(AttrValue::Number(3.0)));
        assert_eq!(
            convert_value(AttributeValue::Floats(vec![1.5, 2.5])),
            Some(AttrValue::Numbers(vec![1.5, 2.5]))
        );
        assert_eq!(
            convert_value(AttributeValue::Str("cm".into())),
            Some(AttrValue::Text("cm".into()))
        );
        assert_eq!(convert_value(AttributeValue::Uchars(vec![1, 2])), None);
    }
}
