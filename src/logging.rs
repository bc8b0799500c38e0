//! Logging and audit trail
//!
//! Structured logging on top of `tracing`. Audit events (one per execution
//! record, policy evaluation and rollback attempt) use the [`AUDIT_TARGET`]
//! target so they can be filtered with `PSOR_LOG=psor::audit=info`.

use crate::error::{PsorError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const AUDIT_TARGET: &str = "psor::audit";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json, text
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout, stderr, file
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path (output = "file")
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// Colored output (text format on a terminal only)
    #[serde(default = "default_true")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stderr".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("reports/audit.log")
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            file: default_log_file(),
            color: default_true(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Stdout,
    Stderr,
    File,
}

/// Initialize the global subscriber.
///
/// Priority (highest first): `PSOR_LOG` / `PSOR_LOG_FORMAT` environment
/// variables, then the `[logging]` table, then defaults.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<()> {
    let filter = build_env_filter(config)?;
    let json = determine_format(config)? == "json";
    let output = determine_output(config)?;
    let use_color = config.map(|c| c.color).unwrap_or(true);

    let registry = Registry::default().with(filter);

    // each arm builds a differently-typed layer, so the subscriber is
    // installed inside the match
    let installed = match (json, output) {
        (true, Output::File) => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::sync::Mutex::new(open_log_file(config)?)),
            )
            .try_init(),
        (true, Output::Stdout) => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stdout),
            )
            .try_init(),
        (true, Output::Stderr) => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        (false, Output::File) => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(open_log_file(config)?)),
            )
            .try_init(),
        (false, Output::Stdout) => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(use_color)
                    .with_writer(std::io::stdout),
            )
            .try_init(),
        (false, Output::Stderr) => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(use_color)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    installed.map_err(|e| PsorError::Config(format!("Failed to install logger: {}", e)))
}

fn open_log_file(config: Option<&LoggingConfig>) -> Result<std::fs::File> {
    let log_file = config
        .map(|c| c.file.clone())
        .unwrap_or_else(default_log_file);

    if let Some(parent) = log_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PsorError::Config(format!("Failed to create log directory: {}", e))
            })?;
        }
    }

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .map_err(|e| PsorError::Config(format!("Failed to open log file {:?}: {}", log_file, e)))
}

fn build_env_filter(config: Option<&LoggingConfig>) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_env("PSOR_LOG") {
        return Ok(filter);
    }

    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    EnvFilter::try_new(level)
        .map_err(|e| PsorError::Config(format!("Invalid log level '{}': {}", level, e)))
}

fn determine_format(config: Option<&LoggingConfig>) -> Result<String> {
    if let Ok(format) = std::env::var("PSOR_LOG_FORMAT") {
        if format == "json" || format == "text" {
            return Ok(format);
        }
    }

    let format = config.map(|c| c.format.as_str()).unwrap_or("text");
    if format != "json" && format != "text" {
        return Err(PsorError::Config(format!(
            "Invalid log format '{}' (expected json or text)",
            format
        )));
    }

    Ok(format.to_string())
}

fn determine_output(config: Option<&LoggingConfig>) -> Result<Output> {
    match config.map(|c| c.output.as_str()).unwrap_or("stderr") {
        "stdout" => Ok(Output::Stdout),
        "stderr" => Ok(Output::Stderr),
        "file" => Ok(Output::File),
        other => Err(PsorError::Config(format!(
            "Invalid log output '{}' (expected stdout, stderr or file)",
            other
        ))),
    }
}
