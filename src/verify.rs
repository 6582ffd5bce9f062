//! Output Verification Module
//!
//! Reads back what the preparation jobs wrote and checks the properties the
//! web map relies on: aquifer ids and names are consistent across the three
//! aquifer outputs, and the tiled store holds exactly what the archive holds.
//!
//! Run after a job to confirm its outputs before publishing them.

use chrono::Utc;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::config::{AquiferConfig, Config, GraceConfig};
use crate::export::geojson::read_aquifers_geojson;
use crate::export::parquet::read_aquifers_parquet;
use crate::grace::anomaly;
use crate::ingest::grid::read_grid_file;
use crate::logging::{self, Stage};
use crate::model::{PrepError, Result, ValueType};
use crate::store::TiledStore;

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub aquifers: Option<AquiferVerification>,
    pub grace: Option<GraceVerification>,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AquiferVerification {
    pub status: VerificationStatus,
    pub parquet_rows: usize,
    pub geojson_features: usize,
    pub html_rows: usize,
    pub ids_contiguous: bool,
    pub names_sorted: bool,
    pub empty_names: Vec<i64>,
    pub uncorrected_names: Vec<String>,
    pub pairs_match: bool,
    pub geo_metadata_present: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraceVerification {
    pub status: VerificationStatus,
    pub archive_shape: Vec<usize>,
    pub variables: Vec<VariableVerification>,
    pub max_anomaly_deviation: f64,
    pub anomaly_tolerance: f64,
    pub error_message: Option<String>,
}

/// One array compared between the archive and the tiled store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableVerification {
    pub name: String,
    pub status: VerificationStatus,
    pub store_shape: Vec<usize>,
    /// Store `data_type`; must match the archive's float width.
    pub data_type: String,
    pub values: usize,
    pub mismatched_values: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VerificationStatus {
    Success,
    PartialSuccess,
    Failed,
}

impl VerificationStatus {
    pub fn passed(&self) -> bool {
        *self != VerificationStatus::Failed
    }
}

// Slack for float noise on top of the rounding tolerance.
const DEVIATION_EPSILON: f64 = 1e-9;

// ============================================================================
// Aquifer Verification
// ============================================================================

pub fn verify_aquifers(config: &AquiferConfig) -> AquiferVerification {
    let mut result = AquiferVerification {
        status: VerificationStatus::Failed,
        parquet_rows: 0,
        geojson_features: 0,
        html_rows: 0,
        ids_contiguous: false,
        names_sorted: false,
        empty_names: Vec::new(),
        uncorrected_names: Vec::new(),
        pairs_match: false,
        geo_metadata_present: false,
        error_message: None,
    };
    if let Err(e) = check_aquifers(config, &mut result) {
        result.error_message = Some(e.to_string());
        return result;
    }

    let consistent = result.ids_contiguous
        && result.names_sorted
        && result.empty_names.is_empty()
        && result.uncorrected_names.is_empty()
        && result.pairs_match
        && result.html_rows == result.parquet_rows
        && result.parquet_rows > 0;
    result.status = match (consistent, result.geo_metadata_present) {
        (true, true) => VerificationStatus::Success,
        (true, false) => VerificationStatus::PartialSuccess,
        (false, _) => VerificationStatus::Failed,
    };
    result
}

fn check_aquifers(config: &AquiferConfig, result: &mut AquiferVerification) -> Result<()> {
    let (rows, geo) = read_aquifers_parquet(&config.parquet_output)?;
    let features = read_aquifers_geojson(&config.geojson_output)?;
    let html = std::fs::read_to_string(&config.html_output)
        .map_err(|e| PrepError::io(&config.html_output, e))?;

    result.parquet_rows = rows.len();
    result.geojson_features = features.len();
    result.html_rows = html.matches("<tr>").count();
    result.geo_metadata_present = geo.is_some();

    result.ids_contiguous = rows.iter().enumerate().all(|(i, row)| row.id == i as i64);
    result.names_sorted = rows.windows(2).all(|w| w[0].name.as_bytes() <= w[1].name.as_bytes());
    result.empty_names = rows
        .iter()
        .filter(|row| row.name.trim().is_empty())
        .map(|row| row.id)
        .collect();
    result.uncorrected_names = rows
        .iter()
        .filter(|row| config.corrections.iter().any(|c| c.from == row.name))
        .map(|row| row.name.clone())
        .collect();

    let parquet_pairs: BTreeSet<(String, i64)> = rows.iter().map(|r| (r.name.clone(), r.id)).collect();
    let geojson_pairs: BTreeSet<(String, i64)> = features.iter().map(|f| (f.name.clone(), f.id)).collect();
    result.pairs_match = parquet_pairs == geojson_pairs && rows.len() == features.len();
    Ok(())
}

// ============================================================================
// GRACE Verification
// ============================================================================

pub fn verify_grace(config: &GraceConfig) -> GraceVerification {
    let mut result = GraceVerification {
        status: VerificationStatus::Failed,
        archive_shape: Vec::new(),
        variables: Vec::new(),
        max_anomaly_deviation: f64::NAN,
        anomaly_tolerance: config.anomaly_tolerance(),
        error_message: None,
    };
    if let Err(e) = check_grace(config, &mut result) {
        result.error_message = Some(e.to_string());
        return result;
    }

    let arrays_match = result.variables.iter().all(|v| v.status.passed());
    let within_tolerance = result.max_anomaly_deviation <= result.anomaly_tolerance + DEVIATION_EPSILON;
    if arrays_match && within_tolerance {
        result.status = VerificationStatus::Success;
    }
    result
}

fn check_grace(config: &GraceConfig, result: &mut GraceVerification) -> Result<()> {
    let archive = read_grid_file(&config.archive_output, config, &config.output_variables())?;
    let store = TiledStore::open(&config.store_output)?;
    let (nt, ny, nx) = archive.shape();
    result.archive_shape = vec![nt, ny, nx];

    for coord in archive.coordinates() {
        let stored = store.read_array(&coord.name)?;
        let expected_shape = [coord.values.len()];
        let data_type = store.metadata(&coord.name)?.value_type()?;
        let mut check = compare(&coord.name, &coord.values, &expected_shape, &stored);
        check_data_type(&mut check, ValueType::Float64, data_type);
        result.variables.push(check);
    }
    for variable in &archive.variables {
        let stored = store.read_array(&variable.name)?;
        let expected: Vec<f64> = variable.data.iter().copied().collect();
        let data_type = store.metadata(&variable.name)?.value_type()?;
        let mut check = compare(&variable.name, &expected, variable.data.shape(), &stored);
        check_data_type(&mut check, variable.dtype, data_type);
        result.variables.push(check);
    }

    let thickness = archive
        .variable(&config.thickness_variable)
        .ok_or_else(|| PrepError::MissingVariable(config.thickness_variable.clone()))?;
    let stored_anomaly = archive
        .variable(&config.anomaly_variable)
        .ok_or_else(|| PrepError::MissingVariable(config.anomaly_variable.clone()))?;
    if thickness.dtype == ValueType::Float32 || stored_anomaly.dtype == ValueType::Float32 {
        // thickness, its mean and the anomaly each carry half a float32 ulp
        let largest = thickness.data.iter().filter(|v| !v.is_nan()).fold(0.0, |m: f64, v| m.max(v.abs()));
        result.anomaly_tolerance += 3.0 * f64::from(f32::EPSILON) * largest;
    }
    let expected = anomaly::anomaly(&thickness.data, &anomaly::time_mean(&thickness.data));
    result.max_anomaly_deviation = expected
        .iter()
        .zip(stored_anomaly.data.iter())
        .filter(|(e, s)| !e.is_nan() && !s.is_nan())
        .map(|(e, s)| (e - s).abs())
        .fold(0.0, f64::max);
    Ok(())
}

/// NaN-aware element comparison of an archive array against its store copy.
fn compare(name: &str, expected: &[f64], expected_shape: &[usize], stored: &ArrayD<f64>) -> VariableVerification {
    let mismatched_values = if stored.shape() == expected_shape {
        expected
            .iter()
            .zip(stored.iter())
            .filter(|(e, s)| !(e.is_nan() && s.is_nan()) && e != s)
            .count()
    } else {
        expected.len().max(stored.len())
    };
    VariableVerification {
        name: name.to_string(),
        status: if mismatched_values == 0 {
            VerificationStatus::Success
        } else {
            VerificationStatus::Failed
        },
        store_shape: stored.shape().to_vec(),
        data_type: String::new(),
        values: expected.len(),
        mismatched_values,
    }
}

fn check_data_type(check: &mut VariableVerification, archive: ValueType, store: ValueType) {
    check.data_type = store.name().to_string();
    if archive != store {
        check.status = VerificationStatus::Failed;
    }
}

// ============================================================================
// Full Verification Runner
// ============================================================================

pub fn run_verification(config: &Config, aquifers: bool, grace: bool) -> VerificationReport {
    let aquifers = aquifers.then(|| {
        let result = verify_aquifers(&config.aquifers);
        log_status(Stage::Aquifers, &result.status, result.error_message.as_deref());
        result
    });
    let grace = grace.then(|| {
        let result = verify_grace(&config.grace);
        log_status(Stage::Grace, &result.status, result.error_message.as_deref());
        result
    });

    let passed = aquifers.as_ref().is_none_or(|a| a.status.passed())
        && grace.as_ref().is_none_or(|g| g.status.passed());
    VerificationReport {
        timestamp: Utc::now().to_rfc3339(),
        aquifers,
        grace,
        passed,
    }
}

fn log_status(stage: Stage, status: &VerificationStatus, error: Option<&str>) {
    match (status, error) {
        (VerificationStatus::Success, _) => logging::info(Stage::Verify, Some(&stage.to_string()), "outputs verified"),
        (VerificationStatus::PartialSuccess, _) => {
            logging::warn(Stage::Verify, Some(&stage.to_string()), "outputs consistent, metadata incomplete")
        }
        (VerificationStatus::Failed, Some(e)) => {
            logging::error(Stage::Verify, Some(&stage.to_string()), &format!("could not read outputs: {}", e))
        }
        (VerificationStatus::Failed, None) => {
            logging::error(Stage::Verify, Some(&stage.to_string()), "outputs failed verification")
        }
    }
}

/// Write the report as pretty JSON.
pub fn write_report(path: &Path, report: &VerificationReport) -> Result<()> {
    let text = serde_json::to_string_pretty(report)?;
    std::fs::write(path, text).map_err(|e| PrepError::io(path, e))
}

pub fn print_summary(report: &VerificationReport) {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("📊 VERIFICATION SUMMARY");
    println!("═══════════════════════════════════════════════════════════");
    println!();
    if let Some(a) = &report.aquifers {
        println!(
            "Aquifers:  {:?}  ({} parquet rows, {} features, {} table rows)",
            a.status, a.parquet_rows, a.geojson_features, a.html_rows
        );
        if !a.ids_contiguous {
            println!("  ✗ ids are not 0..{} in output order", a.parquet_rows);
        }
        if !a.names_sorted {
            println!("  ✗ rows are not in name order");
        }
        if !a.pairs_match {
            println!("  ✗ parquet and GeoJSON (n, id) pairs differ");
        }
        if !a.empty_names.is_empty() {
            println!("  ✗ empty names at ids {:?}", a.empty_names);
        }
        if !a.uncorrected_names.is_empty() {
            println!("  ✗ uncorrected names {:?}", a.uncorrected_names);
        }
    }
    if let Some(g) = &report.grace {
        println!(
            "GRACE:     {:?}  (grid {:?}, anomaly deviation {:.6} of {:.6})",
            g.status, g.archive_shape, g.max_anomaly_deviation, g.anomaly_tolerance
        );
        for v in g.variables.iter().filter(|v| !v.status.passed()) {
            println!(
                "  ✗ {} ({}): {} of {} values differ",
                v.name, v.data_type, v.mismatched_values, v.values
            );
        }
    }
    println!();
    println!("Overall: {}", if report.passed { "PASSED" } else { "FAILED" });
    println!("═══════════════════════════════════════════════════════════");
}
