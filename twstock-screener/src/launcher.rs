//! Preflight checks run before any screening work.
//!
//! A failed check prints a localized message and ends the process with
//! status 1 before any HTTP request is made or any report is written.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

use twstock_common::config::{Config, TOKEN_ENV_VARS};
use twstock_common::Error as CommonError;

/// Prompt shown while waiting for the user.
pub const PAUSE_PROMPT: &str = "請按 Enter 鍵繼續...";

/// A preflight check that failed. `Display` is the user-facing message.
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("錯誤: 設定檔內容無效: {0}")]
    InvalidConfig(String),

    #[error(
        "錯誤: 未設定 FinMind API Token，請在 api_config.json 設定 finmind.api_token 或設定環境變數 {}",
        TOKEN_ENV_VARS[0]
    )]
    MissingToken,

    #[error("錯誤: 無法建立或寫入目錄 {}: {reason}", .path.display())]
    DirectoryNotWritable { path: PathBuf, reason: String },
}

impl PreflightError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

/// What the preflight established.
#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub config_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub logs_dir: PathBuf,
    /// First characters of the token, for display
    pub token_hint: String,
}

pub struct Preflight;

impl Preflight {
    /// Run every check in order, stopping at the first failure.
    pub fn run(config: &Config) -> Result<PreflightReport, PreflightError> {
        config
            .validate()
            .map_err(|e| PreflightError::InvalidConfig(e.to_string()))?;
        debug!("Configuration valid");

        let token = config.finmind_token().ok_or(PreflightError::MissingToken)?;
        let token_hint = mask_token(token);

        let (reports_dir, logs_dir) = config.ensure_output_dirs().map_err(|e| match e {
            CommonError::DirectoryNotWritable { path, source } => {
                PreflightError::DirectoryNotWritable {
                    path,
                    reason: source.to_string(),
                }
            }
            other => PreflightError::DirectoryNotWritable {
                path: config.reports_dir(),
                reason: other.to_string(),
            },
        })?;

        info!(
            config_dir = %config.base_dir.display(),
            reports_dir = %reports_dir.display(),
            "Preflight passed"
        );

        Ok(PreflightReport {
            config_dir: config.base_dir.clone(),
            reports_dir,
            logs_dir,
            token_hint,
        })
    }
}

fn mask_token(token: &str) -> String {
    let head: String = token.chars().take(4).collect();
    format!("{}****", head)
}

/// Print the pause prompt and wait for a line or end of input.
pub fn pause_for_acknowledgement<R: BufRead, W: Write>(
    mut reader: R,
    mut writer: W,
) -> std::io::Result<()> {
    write!(writer, "{}", PAUSE_PROMPT)?;
    writer.flush()?;
    let mut line = String::new();
    reader.read_line(&mut line)?;
    Ok(())
}
