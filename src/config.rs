//! Job configuration.
//!
//! Loaded from a TOML file. Every field has a default, so a missing file or a
//! missing section runs the jobs against the conventional file names in the
//! working directory with the published filtering and tiling parameters.
//!
//! ```toml
//! [aquifers]
//! input = "./aquifers/jasechko_et_al_2024_aquifers.shp"
//! min_area_km2 = 100.0
//!
//! [[aquifers.corrections]]
//! from = "Bohemian Cretaceuos Basin"
//! to = "Bohemian Cretaceous Basin"
//!
//! [grace]
//! rounding = "all_fields"
//! chunk_lat = 16
//! chunk_lon = 16
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::model::{PrepError, Result};

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "GWPREP_CONFIG";

/// Config file looked up in the working directory as a last resort.
pub const DEFAULT_CONFIG_FILE: &str = "gwprep.toml";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub logging: LoggingConfig,
    pub aquifers: AquiferConfig,
    pub grace: GraceConfig,
    pub series: SeriesConfig,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `error`, `warn`, `info`, `debug` or `trace`. `RUST_LOG` wins when set.
    pub level: String,
    /// Also append log lines to this file.
    pub file: Option<PathBuf>,
    /// Prefix console lines with a UTC timestamp and level.
    pub console_timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            console_timestamps: false,
        }
    }
}

/// A literal `Broader` value rewrite applied before filtering.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Correction {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AquiferConfig {
    pub input: PathBuf,
    pub parquet_output: PathBuf,
    pub geojson_output: PathBuf,
    pub html_output: PathBuf,
    /// Records whose equal-area footprint is not above this are dropped.
    pub min_area_km2: f64,
    pub corrections: Vec<Correction>,
}

impl AquiferConfig {
    pub fn min_area_m2(&self) -> f64 {
        self.min_area_km2 * 1.0e6
    }
}

impl Default for AquiferConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("./aquifers/jasechko_et_al_2024_aquifers.shp"),
            parquet_output: PathBuf::from("./aquifers.parquet"),
            geojson_output: PathBuf::from("./aquifers.geojson"),
            html_output: PathBuf::from("./aquifers_table.html"),
            min_area_km2: 100.0,
            corrections: vec![Correction {
                from: "Bohemian Cretaceuos Basin".to_string(),
                to: "Bohemian Cretaceous Basin".to_string(),
            }],
        }
    }
}

/// Which fields are rounded before the archive is written.
///
/// The anomaly is always rounded.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundingPolicy {
    /// Round thickness, uncertainty and anomaly.
    #[default]
    AllFields,
    /// Round the anomaly only; thickness and uncertainty keep full precision.
    AnomalyOnly,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GraceConfig {
    pub input: PathBuf,
    pub archive_output: PathBuf,
    pub store_output: PathBuf,
    pub thickness_variable: String,
    pub uncertainty_variable: String,
    pub anomaly_variable: String,
    pub time_dimension: String,
    pub lat_dimension: String,
    pub lon_dimension: String,
    pub rounding: RoundingPolicy,
    pub decimals: i32,
    /// Tile height in cells. 16 for the 0.25° product, 2 for coarse grids.
    pub chunk_lat: usize,
    pub chunk_lon: usize,
    pub zstd_level: i32,
}

impl GraceConfig {
    /// Worst-case difference between a stored anomaly and one recomputed from
    /// the stored thickness: half a unit in the last place for each rounding
    /// step that touched the values.
    pub fn anomaly_tolerance(&self) -> f64 {
        let half_ulp = 0.5 * 10f64.powi(-self.decimals);
        match self.rounding {
            RoundingPolicy::AnomalyOnly => half_ulp,
            // anomaly, thickness, and the mean of the rounded thickness
            RoundingPolicy::AllFields => 3.0 * half_ulp,
        }
    }

    /// Variables written to both outputs, in output order.
    pub fn output_variables(&self) -> [&str; 3] {
        [&self.thickness_variable, &self.uncertainty_variable, &self.anomaly_variable]
    }
}

impl Default for GraceConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("./GRC_025gw.nc"),
            archive_output: PathBuf::from("./GRC_025gw_anomaly.nc"),
            store_output: PathBuf::from("./grace025gwanomaly.zarr3"),
            thickness_variable: "lwe_thickness".to_string(),
            uncertainty_variable: "uncertainty".to_string(),
            anomaly_variable: "lwe_thickness_anomaly".to_string(),
            time_dimension: "time".to_string(),
            lat_dimension: "lat".to_string(),
            lon_dimension: "lon".to_string(),
            rounding: RoundingPolicy::AllFields,
            decimals: 3,
            chunk_lat: 16,
            chunk_lon: 16,
            zstd_level: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SeriesConfig {
    /// Minimum fraction of a cell covered by the aquifer for the cell to count.
    pub min_overlap: f64,
    /// Cells of padding around the aquifer bounding box.
    pub margin_cells: usize,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            min_overlap: 0.35,
            margin_cells: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parses a config document.
pub fn parse_config(text: &str) -> Result<Config> {
    let config: Config = toml::from_str(text)?;
    validate(&config)?;
    Ok(config)
}

/// Loads the config at `path`, or defaults when the file does not exist.
pub fn load_config(path: &Path) -> Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_config(&text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(PrepError::io(path, e)),
    }
}

/// The config path to use: explicit flag, then `GWPREP_CONFIG`, then
/// `gwprep.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    std::env::var_os(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Beyond this `10^decimals` no longer scales an f64 exactly.
const MAX_DECIMALS: i32 = 15;

fn validate(config: &Config) -> Result<()> {
    let grace = &config.grace;
    if grace.chunk_lat == 0 || grace.chunk_lon == 0 {
        return Err(invalid("grace.chunk_lat and grace.chunk_lon must be positive"));
    }
    if !(1..=22).contains(&grace.zstd_level) {
        return Err(invalid("grace.zstd_level must be within 1..=22"));
    }
    if !(0..=MAX_DECIMALS).contains(&grace.decimals) {
        return Err(invalid(&format!("grace.decimals must be within 0..={}", MAX_DECIMALS)));
    }
    if !(0.0..=1.0).contains(&config.series.min_overlap) {
        return Err(invalid("series.min_overlap must be within 0..=1"));
    }
    if config.aquifers.min_area_km2 < 0.0 {
        return Err(invalid("aquifers.min_area_km2 must not be negative"));
    }
    Ok(())
}

fn invalid(message: &str) -> PrepError {
    PrepError::InvalidConfig(message.to_string())
}
