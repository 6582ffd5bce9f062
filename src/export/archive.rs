/// Full-resolution NetCDF archive of a GRACE dataset
///
/// Uncompressed, same dimensions and coordinates as the input. Data
/// variables keep their source float width with a NaN `_FillValue`;
/// attributes are carried over in their converted form.

use netcdf::AttributeValue;
use std::path::Path;

use crate::model::{AttrValue, Attributes, GraceDataset, GridVariable, Result, ValueType};

pub fn write_archive(path: &Path, dataset: &GraceDataset) -> Result<()> {
    let mut file = netcdf::create(path)?;

    for coord in dataset.coordinates() {
        file.add_dimension(&coord.name, coord.values.len())?;
    }

    for coord in dataset.coordinates() {
        let mut var = file.add_variable::<f64>(&coord.name, &[coord.name.as_str()])?;
        put_attributes(&mut var, &coord.attributes)?;
        var.put_values(&coord.values, ..)?;
    }

    let dims = [
        dataset.time.name.as_str(),
        dataset.lat.name.as_str(),
        dataset.lon.name.as_str(),
    ];
    for variable in &dataset.variables {
        write_variable(&mut file, variable, &dims)?;
    }

    for (name, value) in &dataset.global_attributes {
        file.add_attribute(name, to_netcdf(value))?;
    }
    Ok(())
}

fn write_variable(file: &mut netcdf::FileMut, variable: &GridVariable, dims: &[&str]) -> Result<()> {
    match variable.dtype {
        ValueType::Float32 => {
            let mut var = file.add_variable::<f32>(&variable.name, dims)?;
            var.set_fill_value(f32::NAN)?;
            put_attributes(&mut var, &variable.attributes)?;
            let values: Vec<f32> = variable.data.iter().map(|v| *v as f32).collect();
            var.put_values(&values, ..)?;
        }
        ValueType::Float64 => {
            let mut var = file.add_variable::<f64>(&variable.name, dims)?;
            var.set_fill_value(f64::NAN)?;
            put_attributes(&mut var, &variable.attributes)?;
            let values: Vec<f64> = variable.data.iter().copied().collect();
            var.put_values(&values, ..)?;
        }
    }
    Ok(())
}

fn put_attributes(var: &mut netcdf::VariableMut, attributes: &Attributes) -> Result<()> {
    for (name, value) in attributes {
        var.put_attribute(name, to_netcdf(value))?;
    }
    Ok(())
}

fn to_netcdf(value: &AttrValue) -> AttributeValue {
    match value {
        AttrValue::Text(s) => AttributeValue::Str(s.clone()),
        AttrValue::Texts(v) => AttributeValue::Strs(v.clone()),
        AttrValue::Number(n) => AttributeValue::Double(*n),
        AttrValue::Numbers(v) => AttributeValue::Doubles(v.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_conversion() {
        assert!(matches!(to_netcdf(&AttrValue::Number(2.0)), AttributeValue::Double(v) if v == 2.0));
        assert!(matches!(to_netcdf(&AttrValue::Text("cm".into())), AttributeValue::Str(ref s) if s == "cm"));
        assert!(matches!(
            to_netcdf(&AttrValue::Numbers(vec![1.0, 2.0])),
            AttributeValue::Doubles(ref v) if v.len() == 2
        ));
    }
}
