//! Configuration validation.
//!
//! Checks that configured values are within usable ranges before any
//! network work starts.

use thiserror::Error;

use crate::config::{Config, FetchConfig, FinMindConfig, ObservabilityConfig, OutputConfig};

/// Log levels accepted by the subscriber.
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Log formats accepted by the subscriber.
const LOG_FORMATS: &[&str] = &["pretty", "json"];

/// Report formats the exporter knows.
const REPORT_FORMATS: &[&str] = &["xlsx", "excel", "json", "markdown", "md"];

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.finmind.validate() {
            errors.push(e);
        }

        if let Err(e) = self.fetch.validate() {
            errors.push(e);
        }

        if let Err(e) = self.output.validate() {
            errors.push(e);
        }

        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }

        if self.reports_dir() == self.logs_dir() {
            errors.push(ValidationError::Conflict {
                reason: "output.reports_dir and output.logs_dir point to the same directory"
                    .into(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

impl Validate for FinMindConfig {
    fn validate(&self) -> ValidationResult<()> {
        for (field, url) in [("finmind.v3_url", &self.v3_url), ("finmind.v4_url", &self.v4_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ValidationError::InvalidValue {
                    field: field.into(),
                    reason: format!("'{}' is not an http(s) URL", url),
                });
            }
        }

        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "finmind.timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.max_retries > 10 {
            return Err(ValidationError::InvalidValue {
                field: "finmind.max_retries".into(),
                reason: "must be at most 10".into(),
            });
        }

        if self.requests_per_minute == 0 {
            return Err(ValidationError::InvalidValue {
                field: "finmind.requests_per_minute".into(),
                reason: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

impl Validate for FetchConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.concurrency == 0 || self.concurrency > 32 {
            return Err(ValidationError::InvalidValue {
                field: "fetch.concurrency".into(),
                reason: "must be between 1 and 32".into(),
            });
        }

        // 60-day volume and high windows need roughly 90 calendar days
        if self.price_history_days < 90 {
            return Err(ValidationError::InvalidValue {
                field: "fetch.price_history_days".into(),
                reason: "must be at least 90".into(),
            });
        }

        if self.flow_history_days < 7 {
            return Err(ValidationError::InvalidValue {
                field: "fetch.flow_history_days".into(),
                reason: "must be at least 7".into(),
            });
        }

        Ok(())
    }
}

impl Validate for OutputConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.reports_dir.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "output.reports_dir".into(),
            });
        }

        if self.logs_dir.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "output.logs_dir".into(),
            });
        }

        if let Some(unknown) = self
            .formats
            .iter()
            .find(|f| !REPORT_FORMATS.contains(&f.to_lowercase().as_str()))
        {
            return Err(ValidationError::InvalidValue {
                field: "output.formats".into(),
                reason: format!("unknown report format '{}'", unknown),
            });
        }

        if self.max_results == 0 {
            return Err(ValidationError::InvalidValue {
                field: "output.max_results".into(),
                reason: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("expected one of {:?}", LOG_LEVELS),
            });
        }

        if !LOG_FORMATS.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("expected one of {:?}", LOG_FORMATS),
            });
        }

        Ok(())
    }
}
