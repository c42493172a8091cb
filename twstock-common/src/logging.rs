//! Logging setup for the screener.
//!
//! Console output goes to stderr so that result tables printed on stdout stay
//! clean. A plain-text copy can be mirrored into a daily file under the logs
//! directory.
//!
//! # Noise Filtering
//!
//! By default, noisy library modules (hyper, reqwest, h2, rustls, tokio_util)
//! are set to `warn` level to reduce log clutter while keeping business logs
//! at the specified level.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Default noisy modules that should be filtered to warn level.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
];

/// Build the filter directive string with noise suppression.
fn build_directives(log_level: &str, excluded_targets: &[String]) -> String {
    let mut directives = String::from(log_level);

    for module in NOISY_MODULES {
        directives.push_str(&format!(",{}=warn", module));
    }

    for target in excluded_targets {
        directives.push_str(&format!(",{}=warn", target));
    }

    directives
}

/// Build the EnvFilter, letting `RUST_LOG` override the configured level.
fn build_filter(log_level: &str, excluded_targets: &[String]) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(build_directives(log_level, excluded_targets)))
}

/// Name of the log file written for `date`.
pub fn log_file_name(date: chrono::NaiveDate) -> String {
    format!("screener_{}.log", date.format("%Y%m%d"))
}

/// Initialize console logging.
///
/// # Arguments
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - Output format: "json" for structured JSON, "pretty" for human-readable
pub fn init_logging(log_level: &str, log_format: &str) {
    init_logging_with_file(log_level, log_format, &[], None);
}

/// Initialize logging with custom exclusions and an optional log directory.
///
/// Returns the path of the log file when file logging could be enabled. A
/// log file that cannot be opened only produces a warning.
pub fn init_logging_with_file(
    log_level: &str,
    log_format: &str,
    excluded_targets: &[String],
    log_dir: Option<&Path>,
) -> Option<PathBuf> {
    let filter = build_filter(log_level, excluded_targets);

    let mut file_error = None;
    let log_file = log_dir.and_then(|dir| {
        let path = dir.join(log_file_name(chrono::Local::now().date_naive()));
        let opened = std::fs::create_dir_all(dir)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path));
        match opened {
            Ok(file) => Some((path, file)),
            Err(e) => {
                file_error = Some(format!("{}: {}", path.display(), e));
                None
            }
        }
    });

    let log_path = log_file.as_ref().map(|(path, _)| path.clone());
    let file_layer = log_file.map(|(_, file)| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(Arc::new(file))
    });

    let subscriber = tracing_subscriber::registry().with(filter).with(file_layer);

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    if let Some(err) = file_error {
        tracing::warn!(error = %err, "Log file unavailable, logging to console only");
    }

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        noise_filtered = NOISY_MODULES.len() + excluded_targets.len(),
        log_file = ?log_path,
        "Logging initialized"
    );

    log_path
}
