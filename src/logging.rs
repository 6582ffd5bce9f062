/// Structured logging for the data-preparation jobs
///
/// Provides context-rich logging tagged with the pipeline stage and the
/// aquifer group, variable or file a message is about. Lines go to the
/// console and optionally to a log file for unattended runs.

use chrono::Utc;
use flexi_logger::{DeferredNow, Duplicate, FileSpec, Logger, LoggerHandle};
use log::Record;
use once_cell::sync::OnceCell;
use std::fmt;
use std::path::Path;

// ---------------------------------------------------------------------------
// Pipeline Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Aquifers,
    Grace,
    Store,
    Series,
    Verify,
    System,
}

impl Stage {
    /// Log target, so `RUST_LOG=gwprep::grace=debug` selects one stage.
    pub fn target(self) -> &'static str {
        match self {
            Stage::Aquifers => "gwprep::aquifers",
            Stage::Grace => "gwprep::grace",
            Stage::Store => "gwprep::store",
            Stage::Series => "gwprep::series",
            Stage::Verify => "gwprep::verify",
            Stage::System => "gwprep",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Aquifers => write!(f, "AQUIFERS"),
            Stage::Grace => write!(f, "GRACE"),
            Stage::Store => write!(f, "STORE"),
            Stage::Series => write!(f, "SERIES"),
            Stage::Verify => write!(f, "VERIFY"),
            Stage::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Keeps the backend alive for the life of the process.
static LOGGER: OnceCell<LoggerHandle> = OnceCell::new();

/// Initialize the global logger.
///
/// `level` is a `log` level name; `RUST_LOG` overrides it. With a
/// `log_file`, every line is appended to the file and info and above are
/// duplicated to stderr. Calling this more than once keeps the first logger.
pub fn init_logger(
    level: &str,
    log_file: Option<&Path>,
    console_timestamps: bool,
) -> Result<(), flexi_logger::FlexiLoggerError> {
    if LOGGER.get().is_some() {
        return Ok(());
    }

    let console_format: flexi_logger::FormatFunction =
        if console_timestamps { timestamped_format } else { plain_format };
    let mut logger = Logger::try_with_env_or_str(level)?.format_for_stderr(console_format);

    if let Some(path) = log_file {
        logger = logger
            .log_to_file(FileSpec::try_from(path)?)
            .append()
            .format_for_files(timestamped_format)
            .duplicate_to_stderr(Duplicate::Info);
    }

    let handle = logger.start()?;
    let _ = LOGGER.set(handle);
    Ok(())
}

fn timestamped_format(
    w: &mut dyn std::io::Write,
    _now: &mut DeferredNow,
    record: &Record,
) -> std::io::Result<()> {
    write!(
        w,
        "{} {} {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        record.level(),
        record.args()
    )
}

fn plain_format(
    w: &mut dyn std::io::Write,
    _now: &mut DeferredNow,
    record: &Record,
) -> std::io::Result<()> {
    match record.level() {
        log::Level::Error => write!(w, "   ✗ {}", record.args()),
        log::Level::Warn => write!(w, "   ⚠ {}", record.args()),
        _ => write!(w, "   {}", record.args()),
    }
}

/// Formats the message body shared by every level.
fn render(stage: Stage, subject: Option<&str>, message: &str) -> String {
    let subject_part = subject.map(|s| format!(" [{}]", s)).unwrap_or_default();
    format!("{}{}: {}", stage, subject_part, message)
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Log a general informational message
pub fn info(stage: Stage, subject: Option<&str>, message: &str) {
    log::info!(target: stage.target(), "{}", render(stage, subject, message));
}

/// Log a warning message
pub fn warn(stage: Stage, subject: Option<&str>, message: &str) {
    log::warn!(target: stage.target(), "{}", render(stage, subject, message));
}

/// Log an error message
pub fn error(stage: Stage, subject: Option<&str>, message: &str) {
    log::error!(target: stage.target(), "{}", render(stage, subject, message));
}

/// Log a debug message
pub fn debug(stage: Stage, subject: Option<&str>, message: &str) {
    log::debug!(target: stage.target(), "{}", render(stage, subject, message));
}

// ---------------------------------------------------------------------------
// Summary Logging
// ---------------------------------------------------------------------------

/// Log how many items a filtering step kept.
///
/// Info when nothing was dropped, error when nothing survived, warn otherwise.
pub fn log_step_summary(stage: Stage, step: &str, total: usize, kept: usize) {
    let dropped = total.saturating_sub(kept);
    let message = format!("{}: kept {}/{}, dropped {}", step, kept, total, dropped);

    if dropped == 0 {
        info(stage, None, &message);
    } else if kept == 0 {
        error(stage, None, &message);
    } else {
        warn(stage, None, &message);
    }
}

/// Log a written output artifact.
pub fn log_output(stage: Stage, path: &Path, detail: &str) {
    info(stage, Some(&path.display().to_string()), &format!("wrote {}", detail));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_stage_and_subject() {
        assert_eq!(
            render(Stage::Aquifers, Some("Nubian"), "dissolved 3 records"),
            "AQUIFERS [Nubian]: dissolved 3 records"
        );
        assert_eq!(render(Stage::System, None, "done"), "SYS: done");
    }

    #[test]
    fn test_stage_targets_are_distinct() {
        let stages = [
            Stage::Aquifers,
            Stage::Grace,
            Stage::Store,
            Stage::Series,
            Stage::Verify,
            Stage::System,
        ];
        let mut targets: Vec<_> = stages.iter().map(|s| s.target()).collect();
        targets.sort();
        targets.dedup();
        assert_eq!(targets.len(), stages.len());
    }

    #[test]
    fn test_init_logger_is_repeatable() {
        init_logger("warn", None, false).unwrap();
        init_logger("debug", None, true).unwrap();
        log_step_summary(Stage::Aquifers, "area filter", 10, 7);
    }
}
