/// Aquifer polygon shapefile reader
///
/// Reads the `.shp` geometry and `.dbf` attribute table of the aquifer
/// dataset into `AquiferRecord`s. Only the `Aquifer` and `Broader` fields
/// and the geometry are kept.

use geo::{Coord, LineString, MultiPolygon, Polygon};
use shapefile::dbase::{FieldValue, Record};
use shapefile::{PolygonRing, Shape};
use std::path::Path;

use crate::logging::{self, Stage};
use crate::model::{AquiferRecord, FIELD_AQUIFER, FIELD_BROADER, PrepError, Result};

// ============================================================================
// Reader
// ============================================================================

/// Read every polygon record of a shapefile.
///
/// Null shapes and non-polygon shapes are skipped with a warning. Z and M
/// values are dropped.
pub fn read_aquifer_records(path: &Path) -> Result<Vec<AquiferRecord>> {
    check_geographic_crs(path)?;

    let mut reader = shapefile::Reader::from_path(path)?;
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for (index, item) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = item?;
        let geometry = match shape {
            Shape::Polygon(p) => rings_to_multipolygon(p.rings(), |pt| (pt.x, pt.y)),
            Shape::PolygonM(p) => rings_to_multipolygon(p.rings(), |pt| (pt.x, pt.y)),
            Shape::PolygonZ(p) => rings_to_multipolygon(p.rings(), |pt| (pt.x, pt.y)),
            other => {
                logging::warn(
                    Stage::Aquifers,
                    Some(&format!("record {}", index)),
                    &format!("skipping {:?} shape", other.shapetype()),
                );
                skipped += 1;
                continue;
            }
        };

        records.push(AquiferRecord {
            aquifer: text_field(&record, FIELD_AQUIFER)?,
            broader: text_field(&record, FIELD_BROADER)?,
            geometry,
        });
    }

    logging::info(
        Stage::Aquifers,
        Some(&path.display().to_string()),
        &format!("read {} polygon records ({} skipped)", records.len(), skipped),
    );
    Ok(records)
}

/// Refuse inputs whose `.prj` sidecar declares a projected CRS; the area
/// filter expects longitude/latitude degrees.
fn check_geographic_crs(path: &Path) -> Result<()> {
    let prj = path.with_extension("prj");
    let wkt = match std::fs::read_to_string(&prj) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(PrepError::io(prj, e)),
    };
    if is_projected_wkt(&wkt) {
        let name = wkt.split('"').nth(1).unwrap_or("unnamed").to_string();
        return Err(PrepError::UnsupportedCrs(format!(
            "{} declares projected CRS '{}'; expected geographic longitude/latitude",
            prj.display(),
            name
        )));
    }
    Ok(())
}

fn is_projected_wkt(wkt: &str) -> bool {
    let head = wkt.trim_start().to_ascii_uppercase();
    head.starts_with("PROJCS") || head.starts_with("PROJCRS")
}

// ============================================================================
// Conversion helpers
// ============================================================================

/// Character fields; null reads as empty. Only the trailing DBF padding is
/// removed.
fn text_field(record: &Record, name: &str) -> Result<String> {
    match record.get(name) {
        Some(FieldValue::Character(value)) => Ok(value.as_deref().unwrap_or("").trim_end().to_string()),
        Some(FieldValue::Memo(value)) => Ok(value.trim_end().to_string()),
        Some(_) => Err(PrepError::MissingField(format!("{} (not a text field)", name))),
        None => Err(PrepError::MissingField(name.to_string())),
    }
}

/// Shapefile rings are a flat list: each outer ring starts a polygon and the
/// inner rings that follow are its holes.
pub(crate) fn rings_to_multipolygon<P>(
    rings: &[PolygonRing<P>],
    xy: impl Fn(&P) -> (f64, f64),
) -> MultiPolygon<f64> {
    let to_line = |points: &[P]| -> LineString<f64> {
        points
            .iter()
            .map(|p| {
                let (x, y) = xy(p);
                Coord { x, y }
            })
            .collect()
    };

    let mut polygons: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();
    for ring in rings {
        match ring {
            PolygonRing::Outer(points) => polygons.push((to_line(points), Vec::new())),
            PolygonRing::Inner(points) => match polygons.last_mut() {
                Some((_, holes)) => holes.push(to_line(points)),
                // A hole before any shell is treated as a shell.
                None => polygons.push((to_line(points), Vec::new())),
            },
        }
    }

    MultiPolygon(
        polygons
            .into_iter()
            .map(|(exterior, holes)| Polygon::new(exterior, holes))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;
    use shapefile::Point;

    fn square(x0: f64, y0: f64, size: f64) -> Vec<Point> {
        vec![
            Point::new(x0, y0),
            Point::new(x0, y0 + size),
            Point::new(x0 + size, y0 + size),
            Point::new(x0 + size, y0),
            Point::new(x0, y0),
        ]
    }

    #[test]
    fn test_inner_ring_becomes_hole_of_preceding_shell() {
        let rings = vec![
            PolygonRing::Outer(square(0.0, 0.0, 4.0)),
            PolygonRing::Inner(square(1.0, 1.0, 1.0)),
            PolygonRing::Outer(square(10.0, 10.0, 1.0)),
        ];
        let mp = rings_to_multipolygon(&rings, |p| (p.x, p.y));
        assert_eq!(mp.0.len(), 2);
        assert_eq!(mp.0[0].interiors().len(), 1);
        assert_eq!(mp.0[1].interiors().len(), 0);
        assert!((mp.unsigned_area() - (16.0 - 1.0 + 1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_projected_wkt_is_detected() {
        assert!(is_projected_wkt("PROJCS[\"WGS 84 / NSIDC EASE-Grid 2.0 Global\",GEOGCS[...]]"));
        assert!(is_projected_wkt("  projcrs[\"x\"]"));
        assert!(!is_projected_wkt("GEOGCS[\"GCS_WGS_1984\",DATUM[\"D_WGS_1984\"]]"));
    }

    #[test]
    fn test_projected_prj_sidecar_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let shp = dir.path().join("aquifers.shp");
        std::fs::write(dir.path().join("aquifers.prj"), "PROJCS[\"EASE\",GEOGCS[\"WGS84\"]]").unwrap();
        let err = check_geographic_crs(&shp).unwrap_err();
        assert!(matches!(err, PrepError::UnsupportedCrs(_)));
    }

    #[test]
    fn test_text_field_keeps_leading_spaces() {
        let mut record = Record::default();
        record.insert("Broader".to_string(), FieldValue::Character(Some(" Nubian   ".to_string())));
        record.insert("Aquifer".to_string(), FieldValue::Character(None));
        record.insert("Area".to_string(), FieldValue::Numeric(Some(1.0)));
        assert_eq!(text_field(&record, "Broader").unwrap(), " Nubian");
        assert_eq!(text_field(&record, "Aquifer").unwrap(), "");
        assert!(matches!(text_field(&record, "Area"), Err(PrepError::MissingField(_))));
        assert!(matches!(text_field(&record, "Absent"), Err(PrepError::MissingField(m)) if m == "Absent"));
    }

    #[test]
    fn test_missing_prj_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_geographic_crs(&dir.path().join("aquifers.shp")).is_ok());
    }
}
