//! Data provider abstraction for multi-source market data.
//!
//! Defines the `DataProvider` trait that all data sources implement, so the
//! fetcher can fall back from one source to the next per data kind.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::{DailyBar, Fundamentals, InstitutionalFlow, MarginRecord, StockInfo, Valuation};

// ============================================================================
// Provider Capabilities
// ============================================================================

/// Data kinds a provider can serve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCapabilities {
    pub stock_list: bool,
    pub daily_bars: bool,
    pub institutional: bool,
    pub margin: bool,
    pub valuation: bool,
    /// EPS and ROE from financial statements
    pub fundamentals: bool,
    pub shareholding: bool,
    /// Attention / disposition announcement lists
    pub attention_lists: bool,
}

impl DataCapabilities {
    /// Everything a full per-stock API offers except announcement lists.
    pub fn per_stock_api() -> Self {
        Self {
            stock_list: true,
            daily_bars: true,
            institutional: true,
            margin: true,
            valuation: true,
            fundamentals: true,
            shareholding: true,
            attention_lists: false,
        }
    }
}

// ============================================================================
// Provider Error
// ============================================================================

/// Errors specific to data providers.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Network error (connection failed, timeout)
    Network(String),
    /// Authentication error (missing, invalid or expired token)
    Auth(String),
    /// Rate limit exceeded
    RateLimited { retry_after_secs: Option<u64> },
    /// Data not available for the requested stock/range
    DataNotAvailable(String),
    /// Provider is temporarily unavailable
    Unavailable(String),
    /// Invalid request parameters
    InvalidRequest(String),
    /// Response could not be understood
    InvalidResponse(String),
    /// Provider does not serve this data kind
    Unsupported(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Auth(msg) => write!(f, "Authentication error: {}", msg),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after_secs {
                    write!(f, ", retry after {} seconds", secs)?;
                }
                Ok(())
            }
            Self::DataNotAvailable(msg) => write!(f, "Data not available: {}", msg),
            Self::Unavailable(msg) => write!(f, "Provider unavailable: {}", msg),
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Self::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            Self::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// Check if the error is recoverable (worth retrying)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Unavailable(_)
        )
    }

    /// Check if this error should trigger a failover to another provider
    pub fn should_failover(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

// ============================================================================
// Attention Lists
// ============================================================================

/// Stock ids under exchange attention or disposition measures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttentionLists {
    /// 注意股 / 警示股
    pub warning: HashSet<String>,
    /// 處置股
    pub disposition: HashSet<String>,
}

impl AttentionLists {
    pub fn is_warning(&self, stock_id: &str) -> bool {
        self.warning.contains(stock_id)
    }

    pub fn is_disposition(&self, stock_id: &str) -> bool {
        self.disposition.contains(stock_id)
    }
}

// ============================================================================
// Data Provider Trait
// ============================================================================

/// Trait for market data providers.
///
/// Every data kind has a default implementation returning
/// `ProviderError::Unsupported`; providers override what they serve and
/// advertise it through `capabilities()`.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Get the provider name (e.g., "finmind", "twse")
    fn name(&self) -> &'static str;

    /// Get the provider priority (lower = higher priority)
    fn priority(&self) -> u8;

    /// Get the provider's capabilities
    fn capabilities(&self) -> DataCapabilities;

    /// Check if the provider is reachable and its credentials work.
    async fn health_check(&self) -> Result<(), ProviderError>;

    /// List ordinary shares known to the provider.
    async fn list_stocks(&self) -> Result<Vec<StockInfo>, ProviderError> {
        Err(self.unsupported("stock list"))
    }

    /// Fetch daily bars between two dates (inclusive), oldest first.
    async fn daily_bars(
        &self,
        _stock_id: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<DailyBar>, ProviderError> {
        Err(self.unsupported("daily bars"))
    }

    /// Fetch institutional buy/sell per day, oldest first.
    async fn institutional_flows(
        &self,
        _stock_id: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<InstitutionalFlow>, ProviderError> {
        Err(self.unsupported("institutional flows"))
    }

    /// Fetch margin balances per day, oldest first.
    async fn margin_records(
        &self,
        _stock_id: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<MarginRecord>, ProviderError> {
        Err(self.unsupported("margin records"))
    }

    /// Fetch the latest valuation ratios as of `as_of`.
    async fn valuation(
        &self,
        _stock_id: &str,
        _as_of: NaiveDate,
    ) -> Result<Valuation, ProviderError> {
        Err(self.unsupported("valuation"))
    }

    /// EPS and ROE from the statements published up to `as_of`.
    async fn fundamentals(
        &self,
        _stock_id: &str,
        _as_of: NaiveDate,
    ) -> Result<Fundamentals, ProviderError> {
        Err(self.unsupported("fundamentals"))
    }

    /// Number of shares issued as of `as_of`.
    async fn shares_issued(
        &self,
        _stock_id: &str,
        _as_of: NaiveDate,
    ) -> Result<f64, ProviderError> {
        Err(self.unsupported("shares issued"))
    }

    /// Attention and disposition lists for the whole market.
    async fn attention_lists(&self) -> Result<AttentionLists, ProviderError> {
        Err(self.unsupported("attention lists"))
    }

    /// Build an `Unsupported` error naming this provider.
    fn unsupported(&self, what: &str) -> ProviderError {
        ProviderError::Unsupported(format!("{} does not provide {}", self.name(), what))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    #[async_trait]
    impl DataProvider for Bare {
        fn name(&self) -> &'static str {
            "bare"
        }

        fn priority(&self) -> u8 {
            9
        }

        fn capabilities(&self) -> DataCapabilities {
            DataCapabilities::default()
        }

        async fn health_check(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_methods_are_unsupported() {
        let as_of = NaiveDate::from_ymd_opt(2024, 5, 31).unwrap();
        let err = Bare.fundamentals("2330", as_of).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(_)));
        assert_eq!(err.to_string(), "Unsupported: bare does not provide fundamentals");
    }

    #[test]
    fn test_error_classification() {
        assert!(ProviderError::Network("x".into()).is_recoverable());
        assert!(!ProviderError::Auth("x".into()).is_recoverable());
        assert!(ProviderError::Auth("x".into()).should_failover());
        assert!(ProviderError::DataNotAvailable("x".into()).should_failover());
        assert!(!ProviderError::InvalidRequest("x".into()).should_failover());
    }

    #[test]
    fn test_rate_limited_display() {
        let err = ProviderError::RateLimited {
            retry_after_secs: Some(4),
        };
        assert_eq!(err.to_string(), "Rate limited, retry after 4 seconds");
    }

    #[test]
    fn test_attention_lists() {
        let mut lists = AttentionLists::default();
        lists.warning.insert("3661".to_string());
        assert!(lists.is_warning("3661"));
        assert!(!lists.is_disposition("3661"));
    }
}
