//! Configuration types for the Taiwan stock screener.
//!
//! Configuration is read from a directory holding `config.json` (general
//! settings and saved screening parameters) and `api_config.json`
//! (credentials). The directory is chosen in this order:
//!
//! 1. `TWSTOCK_CONFIG_DIR` environment variable
//! 2. the current directory, when it already holds one of the files
//! 3. `~/.twstock`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config_loader::load_modular_config;
use crate::error::Error;

/// Environment variable selecting the configuration directory.
pub const CONFIG_DIR_ENV: &str = "TWSTOCK_CONFIG_DIR";

/// Environment variables carrying the FinMind token, in priority order.
pub const TOKEN_ENV_VARS: &[&str] = &["FINMIND_TOKEN", "FINMIND_API_TOKEN"];

/// Token values shipped in templates that must be treated as "not configured".
const TOKEN_PLACEHOLDERS: &[&str] = &["your_token_here", "your_finmind_token", "<token>"];

/// Get the configuration directory.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        if !dir.trim().is_empty() {
            return expand_path(dir.trim());
        }
    }

    if Path::new("config.json").exists() || Path::new("api_config.json").exists() {
        return PathBuf::from(".");
    }

    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".twstock"),
        |dirs| dirs.home_dir().join(".twstock"),
    )
}

/// Expand `~` and environment variables in a path string.
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// FinMind data API settings
    #[serde(default)]
    pub finmind: FinMindConfig,

    /// TWSE OpenAPI and announcement settings
    #[serde(default)]
    pub twse: TwseConfig,

    /// Per-stock fetch settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Report and log locations
    #[serde(default)]
    pub output: OutputConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Saved screening parameters (interpreted by the screener crate)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screening_parameters: Option<serde_json::Value>,

    /// Directory the configuration was loaded from; relative paths resolve against it
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Config {
    /// Load configuration from the default directory.
    pub fn load() -> Result<Self> {
        Self::load_from_dir(&config_dir())
    }

    /// Load configuration from a specific directory.
    ///
    /// Missing files are not an error; defaults are used instead.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let value = load_modular_config(Some(dir.to_path_buf()))?;

        let mut config: Config = serde_json::from_value(value)
            .with_context(|| format!("Failed to parse config in {}", dir.display()))?;
        config.base_dir = dir.to_path_buf();

        Ok(config)
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env(dir: Option<&Path>) -> Result<Self> {
        let mut config = match dir {
            Some(dir) => Self::load_from_dir(dir)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // First non-empty token variable wins
        if let Some(token) = TOKEN_ENV_VARS
            .iter()
            .filter_map(|key| lookup(key))
            .find(|value| !value.trim().is_empty())
        {
            self.finmind.api_token = Some(token.trim().to_string());
        }

        if let Some(level) = lookup("TWSTOCK_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("TWSTOCK_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Some(dir) = lookup("TWSTOCK_REPORTS_DIR") {
            self.output.reports_dir = dir;
        }
    }

    /// The configured FinMind token, ignoring blanks and template placeholders.
    pub fn finmind_token(&self) -> Option<&str> {
        let token = self.finmind.api_token.as_deref()?.trim();
        if token.is_empty()
            || TOKEN_PLACEHOLDERS
                .iter()
                .any(|placeholder| token.eq_ignore_ascii_case(placeholder))
        {
            None
        } else {
            Some(token)
        }
    }

    /// Resolve a configured path against the configuration directory.
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        let path = expand_path(raw);
        if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        }
    }

    /// Directory receiving screening reports.
    pub fn reports_dir(&self) -> PathBuf {
        self.resolve_path(&self.output.reports_dir)
    }

    /// Directory receiving log files.
    pub fn logs_dir(&self) -> PathBuf {
        self.resolve_path(&self.output.logs_dir)
    }

    /// Location of the reference stock list CSV.
    pub fn reference_list_path(&self) -> PathBuf {
        self.resolve_path(&self.output.reference_list)
    }

    /// Create the reports and logs directories and verify they accept writes.
    pub fn ensure_output_dirs(&self) -> crate::Result<(PathBuf, PathBuf)> {
        let reports = ensure_writable_dir(&self.reports_dir())?;
        let logs = ensure_writable_dir(&self.logs_dir())?;
        Ok((reports, logs))
    }
}

/// Create `dir` if needed and probe it with a throwaway file.
pub fn ensure_writable_dir(dir: &Path) -> crate::Result<PathBuf> {
    let not_writable = |source: std::io::Error| Error::DirectoryNotWritable {
        path: dir.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(not_writable)?;

    let probe = dir.join(".write_probe");
    std::fs::write(&probe, b"ok").map_err(not_writable)?;
    let _ = std::fs::remove_file(&probe);

    Ok(dir.to_path_buf())
}

// ============================================================================
// FinMind Configuration
// ============================================================================

/// FinMind API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinMindConfig {
    /// API token (normally kept in `api_config.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Public v3 endpoint (stock info and prices, no token)
    #[serde(default = "default_finmind_v3_url")]
    pub v3_url: String,

    /// Authenticated v4 endpoint
    #[serde(default = "default_finmind_v4_url")]
    pub v4_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per request, the first one included
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retries in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Minimum spacing between two requests in milliseconds
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Token bucket size (requests per minute)
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for FinMindConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            v3_url: default_finmind_v3_url(),
            v4_url: default_finmind_v4_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            min_interval_ms: default_min_interval_ms(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

fn default_finmind_v3_url() -> String {
    "https://api.finmindtrade.com/api/v3/data".to_string()
}

fn default_finmind_v4_url() -> String {
    "https://api.finmindtrade.com/api/v4/data".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_min_interval_ms() -> u64 {
    200
}

fn default_requests_per_minute() -> u32 {
    300
}

// ============================================================================
// TWSE Configuration
// ============================================================================

/// TWSE OpenAPI / announcement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwseConfig {
    /// OpenAPI base URL
    #[serde(default = "default_twse_openapi_url")]
    pub openapi_url: String,

    /// Main site base URL (announcement lists)
    #[serde(default = "default_twse_www_url")]
    pub www_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Lifetime of cached market-wide tables in seconds
    #[serde(default = "default_twse_cache_ttl_secs")]
    pub cache_ttl_secs: i64,
}

impl Default for TwseConfig {
    fn default() -> Self {
        Self {
            openapi_url: default_twse_openapi_url(),
            www_url: default_twse_www_url(),
            timeout_secs: default_timeout_secs(),
            cache_ttl_secs: default_twse_cache_ttl_secs(),
        }
    }
}

fn default_twse_openapi_url() -> String {
    "https://openapi.twse.com.tw/v1".to_string()
}

fn default_twse_www_url() -> String {
    "https://www.twse.com.tw".to_string()
}

fn default_twse_cache_ttl_secs() -> i64 {
    3600
}

// ============================================================================
// Fetch Configuration
// ============================================================================

/// Per-stock data fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Calendar days of daily prices to fetch (60-day windows need ~90 trading days)
    #[serde(default = "default_price_history_days")]
    pub price_history_days: i64,

    /// Calendar days of institutional and margin history
    #[serde(default = "default_flow_history_days")]
    pub flow_history_days: i64,

    /// Stocks processed in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Pause after each stock in milliseconds
    #[serde(default = "default_stock_delay_ms")]
    pub stock_delay_ms: u64,

    /// Number of stocks screened in test mode
    #[serde(default = "default_test_mode_limit")]
    pub test_mode_limit: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            price_history_days: default_price_history_days(),
            flow_history_days: default_flow_history_days(),
            concurrency: default_concurrency(),
            stock_delay_ms: default_stock_delay_ms(),
            test_mode_limit: default_test_mode_limit(),
        }
    }
}

fn default_price_history_days() -> i64 {
    150
}

fn default_flow_history_days() -> i64 {
    30
}

fn default_concurrency() -> usize {
    4
}

fn default_stock_delay_ms() -> u64 {
    500
}

fn default_test_mode_limit() -> usize {
    10
}

// ============================================================================
// Output Configuration
// ============================================================================

/// Report and log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Reports directory
    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,

    /// Logs directory
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,

    /// Reference stock list CSV
    #[serde(default = "default_reference_list")]
    pub reference_list: String,

    /// Report formats written after each run (xlsx, json, markdown)
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,

    /// Mirror log output into a daily file under the logs directory
    #[serde(default = "default_true")]
    pub log_to_file: bool,

    /// Maximum rows kept in the result list
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            reports_dir: default_reports_dir(),
            logs_dir: default_logs_dir(),
            reference_list: default_reference_list(),
            formats: default_formats(),
            log_to_file: true,
            max_results: default_max_results(),
        }
    }
}

fn default_reports_dir() -> String {
    "reports".to_string()
}

fn default_logs_dir() -> String {
    "logs".to_string()
}

fn default_reference_list() -> String {
    "real_stock_list.csv".to_string()
}

fn default_formats() -> Vec<String> {
    vec!["xlsx".to_string(), "json".to_string()]
}

fn default_max_results() -> usize {
    30
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to set to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.finmind.max_retries, 3);
        assert_eq!(config.finmind.min_interval_ms, 200);
        assert_eq!(config.fetch.test_mode_limit, 10);
        assert_eq!(config.output.max_results, 30);
        assert_eq!(config.output.reports_dir, "reports");
        assert!(config.finmind_token().is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"fetch": {"concurrency": 2}}"#).unwrap();
        assert_eq!(config.fetch.concurrency, 2);
        assert_eq!(config.fetch.price_history_days, 150);
        assert_eq!(config.twse.cache_ttl_secs, 3600);
    }

    #[test]
    fn test_finmind_token_ignores_placeholders() {
        let mut config = Config::default();
        config.finmind.api_token = Some("  ".into());
        assert!(config.finmind_token().is_none());

        config.finmind.api_token = Some("YOUR_TOKEN_HERE".into());
        assert!(config.finmind_token().is_none());

        config.finmind.api_token = Some(" abc123 ".into());
        assert_eq!(config.finmind_token(), Some("abc123"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FINMIND_TOKEN", ""),
            ("FINMIND_API_TOKEN", "from-env"),
            ("TWSTOCK_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.finmind.api_token = Some("from-file".into());
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.finmind_token(), Some("from-env"));
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "pretty");
    }

    #[test]
    fn test_resolve_path_relative_to_base_dir() {
        let mut config = Config::default();
        config.base_dir = PathBuf::from("/opt/screener");
        assert_eq!(config.reports_dir(), PathBuf::from("/opt/screener/reports"));
        assert_eq!(config.resolve_path("/tmp/out"), PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_ensure_output_dirs_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.base_dir = tmp.path().to_path_buf();

        let (reports, logs) = config.ensure_output_dirs().unwrap();
        assert!(reports.is_dir());
        assert!(logs.is_dir());
        assert!(!reports.join(".write_probe").exists());
    }

    #[test]
    fn test_load_from_dir_merges_api_config() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.json"),
            r#"{"output": {"max_results": 12}}"#,
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("api_config.json"),
            r#"{"finmind": {"api_token": "secret-token"}}"#,
        )
        .unwrap();

        let config = Config::load_from_dir(tmp.path()).unwrap();
        assert_eq!(config.output.max_results, 12);
        assert_eq!(config.finmind_token(), Some("secret-token"));
        assert_eq!(config.base_dir, tmp.path());
    }
}
