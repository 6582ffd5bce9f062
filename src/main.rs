/// gwprep: batch data preparation for the groundwater web map.
///
/// Subcommands:
///   aquifers   clean and dissolve the aquifer shapefile into parquet,
///              GeoJSON and the HTML table fragment
///   grace      add the thickness anomaly, write the NetCDF archive and the
///              tiled store
///   series     anomaly time series for one aquifer id, as JSON
///   verify     read the outputs back and check them
///
/// Settings come from a TOML file (see `config`); every setting has a
/// default, so the jobs run without one.
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use gwprep::config::{self, Config};
use gwprep::logging::{self, Stage};
use gwprep::model::{PrepError, Result};
use gwprep::{analysis, aquifers, grace, verify};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "gwprep", about = "Prepare aquifer and GRACE assets for the groundwater map")]
struct Cli {
    /// Config file (default: gwprep.toml in the working directory)
    #[arg(long, global = true, env = config::CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Clean, dissolve and export the aquifer polygons
    Aquifers,
    /// Compute the GRACE anomaly and write the archive and tiled store
    Grace,
    /// Mean anomaly time series for one aquifer
    Series {
        /// Aquifer id as written in the outputs
        #[arg(long)]
        id: i64,
        /// Write JSON here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Check written outputs (both jobs when no flag is given)
    Verify {
        #[arg(long)]
        aquifers: bool,
        #[arg(long)]
        grace: bool,
        /// Write the JSON report here
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config_path = config::resolve_config_path(cli.config.as_deref());
    let config = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ {}: {}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init_logger(
        &config.logging.level,
        config.logging.file.as_deref(),
        config.logging.console_timestamps,
    ) {
        eprintln!("✗ could not start logging: {}", e);
        return ExitCode::FAILURE;
    }
    logging::debug(Stage::System, Some(&config_path.display().to_string()), "configuration loaded");

    match run(cli.command, &config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            logging::error(Stage::System, None, &e.to_string());
            ExitCode::FAILURE
        }
    }
}

/// Runs one subcommand; `Ok(false)` means it ran but its checks failed.
fn run(command: Command, config: &Config) -> Result<bool> {
    match command {
        Command::Aquifers => {
            let aquifers = aquifers::run(&config.aquifers)?;
            logging::info(Stage::Aquifers, None, &format!("{} aquifers prepared", aquifers.len()));
        }
        Command::Grace => {
            let dataset = grace::run(&config.grace)?;
            let (nt, ny, nx) = dataset.shape();
            logging::info(Stage::Grace, None, &format!("{}x{}x{} grid prepared", nt, ny, nx));
        }
        Command::Series { id, output } => {
            let series = analysis::series::aquifer_series(
                &config.aquifers.geojson_output,
                &config.grace.store_output,
                id,
                &config.series,
                &config.grace,
            )?;
            let text = serde_json::to_string_pretty(&series)?;
            match output {
                Some(path) => write_text(&path, &text)?,
                None => println!("{}", text),
            }
        }
        Command::Verify { aquifers, grace, output } => {
            let both = !aquifers && !grace;
            let report = verify::run_verification(config, aquifers || both, grace || both);
            verify::print_summary(&report);
            if let Some(path) = output {
                verify::write_report(&path, &report)?;
                logging::log_output(Stage::Verify, &path, "verification report");
            }
            return Ok(report.passed);
        }
    }
    Ok(true)
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text).map_err(|e| PrepError::io(path, e))?;
    logging::log_output(Stage::Series, path, "aquifer series");
    Ok(())
}
