//! Aquifer polygon cleaning.
//!
//! Turns the raw aquifer polygon dataset into a compact lookup table: one
//! dissolved multipolygon per broader aquifer system, numbered `0..k`.
//!
//! Steps, in order:
//! 1. sort by `(Broader, Aquifer)`, byte-wise
//! 2. apply the configured `Broader` corrections
//! 3. drop records whose equal-area footprint is not above the threshold
//! 4. drop records with an empty `Broader`
//! 5. dissolve by `Broader` and assign ids
//!
//! Submodules:
//! - `dissolve`: grouping and polygon union.

pub mod dissolve;

use crate::config::{AquiferConfig, Correction};
use crate::export;
use crate::ingest::polygons::read_aquifer_records;
use crate::logging::{self, Stage};
use crate::model::{AquiferRecord, DissolvedAquifer, PrepError, Result};
use crate::projection::equal_area_m2;

// ---------------------------------------------------------------------------
// Job entry point
// ---------------------------------------------------------------------------

/// Read the shapefile, clean it, and write the parquet, GeoJSON and HTML
/// outputs.
pub fn run(config: &AquiferConfig) -> Result<Vec<DissolvedAquifer>> {
    let records = read_aquifer_records(&config.input)?;
    let aquifers = prepare(records, config)?;

    export::parquet::write_aquifers_parquet(&config.parquet_output, &aquifers)?;
    logging::log_output(Stage::Aquifers, &config.parquet_output, &format!("{} rows", aquifers.len()));

    export::geojson::write_aquifers_geojson(&config.geojson_output, &aquifers)?;
    logging::log_output(Stage::Aquifers, &config.geojson_output, &format!("{} features", aquifers.len()));

    export::html::write_aquifer_table(&config.html_output, &aquifers)?;
    logging::log_output(Stage::Aquifers, &config.html_output, &format!("{} table rows", aquifers.len()));

    Ok(aquifers)
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Clean and dissolve in-memory records.
///
/// Fails with `EmptyResult` when no record survives filtering.
pub fn prepare(mut records: Vec<AquiferRecord>, config: &AquiferConfig) -> Result<Vec<DissolvedAquifer>> {
    sort_records(&mut records);
    apply_corrections(&mut records, &config.corrections);

    let total = records.len();
    let records = filter_small(records, config.min_area_m2());
    logging::log_step_summary(
        Stage::Aquifers,
        &format!("area filter (> {} km²)", config.min_area_km2),
        total,
        records.len(),
    );

    let total = records.len();
    let records = drop_unlabelled(records);
    logging::log_step_summary(Stage::Aquifers, "empty Broader filter", total, records.len());

    let aquifers = dissolve::dissolve(records);
    if aquifers.is_empty() {
        return Err(PrepError::EmptyResult("no aquifer record passed the filters".to_string()));
    }

    for aquifer in &aquifers {
        logging::debug(
            Stage::Aquifers,
            Some(&aquifer.name),
            &format!(
                "id {} from {} records, {} parts",
                aquifer.id,
                aquifer.source_records,
                aquifer.geometry.0.len()
            ),
        );
    }
    logging::info(Stage::Aquifers, None, &format!("dissolved into {} aquifer systems", aquifers.len()));
    Ok(aquifers)
}

/// Byte-wise ordering; `-` sorts as the ASCII character it is.
pub fn sort_records(records: &mut [AquiferRecord]) {
    records.sort_by(|a, b| a.broader.cmp(&b.broader).then_with(|| a.aquifer.cmp(&b.aquifer)));
}

/// Rewrite `Broader` values that exactly match a correction.
pub fn apply_corrections(records: &mut [AquiferRecord], corrections: &[Correction]) {
    for correction in corrections {
        let mut fixed = 0;
        for record in records.iter_mut().filter(|r| r.broader == correction.from) {
            record.broader = correction.to.clone();
            fixed += 1;
        }
        if fixed > 0 {
            logging::info(
                Stage::Aquifers,
                Some(&correction.from),
                &format!("corrected {} records to '{}'", fixed, correction.to),
            );
        }
    }
}

/// Keep records whose EPSG:6933 area is strictly above `min_area_m2`.
pub fn filter_small(records: Vec<AquiferRecord>, min_area_m2: f64) -> Vec<AquiferRecord> {
    records
        .into_iter()
        .filter(|r| equal_area_m2(&r.geometry) > min_area_m2)
        .collect()
}

pub fn drop_unlabelled(records: Vec<AquiferRecord>) -> Vec<AquiferRecord> {
    records.into_iter().filter(|r| !r.broader.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{MultiPolygon, Rect, coord};

    /// A square of `deg` degrees at the equator; 1° is about 12,300 km².
    fn square(x0: f64, deg: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![Rect::new(coord! { x: x0, y: 0.0 }, coord! { x: x0 + deg, y: deg }).to_polygon()])
    }

    fn record(broader: &str, aquifer: &str, geometry: MultiPolygon<f64>) -> AquiferRecord {
        AquiferRecord {
            aquifer: aquifer.to_string(),
            broader: broader.to_string(),
            geometry,
        }
    }

    #[test]
    fn test_sort_is_bytewise_with_hyphens() {
        let mut records = vec![
            record("Tula-Mezquital", "b", square(0.0, 1.0)),
            record("Tula Basin", "a", square(0.0, 1.0)),
            record("TulaBasin", "a", square(0.0, 1.0)),
            record("Tula-Mezquital", "a", square(0.0, 1.0)),
        ];
        sort_records(&mut records);
        let keys: Vec<_> = records.iter().map(|r| (r.broader.as_str(), r.aquifer.as_str())).collect();
        assert_eq!(
            keys,
            [("Tula Basin", "a"), ("Tula-Mezquital", "a"), ("Tula-Mezquital", "b"), ("TulaBasin", "a")]
        );
    }

    #[test]
    fn test_default_correction_fixes_bohemian_typo() {
        let config = AquiferConfig::default();
        let mut records = vec![
            record("Bohemian Cretaceuos Basin", "x", square(0.0, 1.0)),
            record("Bohemian Cretaceous Basin", "y", square(0.0, 1.0)),
        ];
        apply_corrections(&mut records, &config.corrections);
        assert!(records.iter().all(|r| r.broader == "Bohemian Cretaceous Basin"));
    }

    #[test]
    fn test_area_filter_uses_square_kilometres() {
        // 0.05° squares are ~31 km², 0.2° squares ~492 km²
        let kept = filter_small(
            vec![record("A", "small", square(0.0, 0.05)), record("A", "large", square(1.0, 0.2))],
            100.0e6,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].aquifer, "large");
    }

    #[test]
    fn test_prepare_end_to_end() {
        let config = AquiferConfig::default();
        let records = vec![
            record("Nubian", "Nubian Sandstone", square(10.0, 1.0)),
            record("", "Unnamed", square(20.0, 1.0)),
            record("Bohemian Cretaceuos Basin", "Jizera", square(30.0, 0.5)),
            record("Bohemian Cretaceous Basin", "Labe", square(30.4, 0.5)),
            record("Tiny", "Speck", square(40.0, 0.01)),
        ];
        let aquifers = prepare(records, &config).unwrap();

        let rows: Vec<_> = aquifers.iter().map(|a| (a.id, a.name.as_str())).collect();
        assert_eq!(rows, [(0, "Bohemian Cretaceous Basin"), (1, "Nubian")]);
        // correctly spelled rows sort first, so their aquifer name wins
        assert_eq!(aquifers[0].representative_aquifer, "Labe");
        assert_eq!(aquifers[0].source_records, 2);
        assert_eq!(aquifers[0].geometry.0.len(), 1);
    }

    #[test]
    fn test_prepare_fails_when_everything_is_filtered() {
        let config = AquiferConfig::default();
        let err = prepare(vec![record("Tiny", "Speck", square(0.0, 0.01))], &config).unwrap_err();
        assert!(matches!(err, PrepError::EmptyResult(_)));
    }
}
