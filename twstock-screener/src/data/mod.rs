//! Market data module for Taiwan stocks.
//!
//! Provides data fetching and caching from multiple sources with automatic
//! failover between them.
//!
//! # Data Sources
//! - **FinMind** (Primary): prices, institutional flows, margin balances,
//!   valuation, financial statements and shareholding
//! - **TWSE OpenAPI** (Backup): market-wide daily quotes and valuation tables,
//!   attention (警示) and disposition (處置) announcement lists

mod cache;
mod fetcher;
mod finmind;
mod provider;
mod rate_limiter;
mod twse;
pub mod universe;

pub use cache::{CacheStats, TtlCache};
pub use fetcher::{SnapshotSource, StockDataFetcher};
pub use finmind::{ConnectionReport, FinMindClient};
pub use provider::{AttentionLists, DataCapabilities, DataProvider, ProviderError};
pub use rate_limiter::{shared_limiter, RateLimiter, SharedRateLimiter};
pub use twse::TwseClient;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Shares per board lot (張).
pub const SHARES_PER_LOT: f64 = 1000.0;

/// Parse an exchange-formatted number ("1,234.5", "-", "").
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', "");
    match cleaned.as_str() {
        "" | "-" | "--" | "---" | "N/A" | "X" => None,
        s => s.trim_start_matches('+').parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

/// Read a JSON number or numeric string.
pub(crate) fn value_to_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_number(s),
        _ => None,
    }
}

// ============================================================================
// Core Data Types
// ============================================================================

/// Listing market of a stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    /// Taiwan Stock Exchange (上市)
    Twse,
    /// Taipei Exchange (上櫃)
    #[serde(alias = "otc")]
    Tpex,
    /// Emerging stock board (興櫃)
    Emerging,
}

impl Market {
    /// Parse the market labels used by FinMind and the reference list.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "twse" | "上市" => Some(Self::Twse),
            "tpex" | "otc" | "上櫃" => Some(Self::Tpex),
            "emerging" | "興櫃" => Some(Self::Emerging),
            _ => None,
        }
    }

    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Twse => "twse",
            Self::Tpex => "tpex",
            Self::Emerging => "emerging",
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Twse => write!(f, "上市"),
            Self::Tpex => write!(f, "上櫃"),
            Self::Emerging => write!(f, "興櫃"),
        }
    }
}

/// Basic stock information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockInfo {
    /// Stock id (e.g., "2330")
    pub stock_id: String,
    /// Stock name
    pub stock_name: String,
    /// Listing market
    pub market: Market,
    /// Industry category
    pub industry: Option<String>,
}

impl StockInfo {
    pub fn new(stock_id: impl Into<String>, stock_name: impl Into<String>, market: Market) -> Self {
        Self {
            stock_id: stock_id.into(),
            stock_name: stock_name.into(),
            market,
            industry: None,
        }
    }

    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }
}

/// One trading day of price data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Volume in shares
    pub volume: f64,
    /// Turnover in NTD
    pub amount: f64,
}

impl DailyBar {
    /// Volume in board lots.
    pub fn volume_lots(&self) -> f64 {
        self.volume / SHARES_PER_LOT
    }
}

/// Institutional investor buy/sell for one day, in shares.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstitutionalFlow {
    pub date: NaiveDate,
    pub foreign_buy: f64,
    pub foreign_sell: f64,
    pub trust_buy: f64,
    pub trust_sell: f64,
    pub dealer_buy: f64,
    pub dealer_sell: f64,
}

impl InstitutionalFlow {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            ..Default::default()
        }
    }

    /// Add one investor row. Returns `false` for unknown investor names.
    pub fn add(&mut self, investor: &str, buy: f64, sell: f64) -> bool {
        match investor {
            "Foreign_Investor" | "Foreign_Dealer_Self" => {
                self.foreign_buy += buy;
                self.foreign_sell += sell;
            }
            "Investment_Trust" => {
                self.trust_buy += buy;
                self.trust_sell += sell;
            }
            "Dealer" | "Dealer_self" | "Dealer_Hedging" => {
                self.dealer_buy += buy;
                self.dealer_sell += sell;
            }
            _ => return false,
        }
        true
    }

    pub fn foreign_net(&self) -> f64 {
        self.foreign_buy - self.foreign_sell
    }

    pub fn trust_net(&self) -> f64 {
        self.trust_buy - self.trust_sell
    }

    pub fn dealer_net(&self) -> f64 {
        self.dealer_buy - self.dealer_sell
    }

    /// Net of all three institutional groups.
    pub fn total_net(&self) -> f64 {
        self.foreign_net() + self.trust_net() + self.dealer_net()
    }
}

/// Margin trading balances for one day, in lots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginRecord {
    pub date: NaiveDate,
    /// Margin purchase balance (融資餘額)
    pub margin_balance: f64,
    /// Margin purchase limit (融資限額)
    pub margin_limit: f64,
    /// Short sale balance (融券餘額)
    pub short_balance: f64,
}

impl MarginRecord {
    /// Margin usage in percent of the limit.
    pub fn usage_pct(&self) -> Option<f64> {
        if self.margin_limit > 0.0 {
            Some(self.margin_balance / self.margin_limit * 100.0)
        } else {
            None
        }
    }
}

/// Valuation ratios.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub date: Option<NaiveDate>,
    /// Price/earnings ratio
    pub per: Option<f64>,
    /// Price/book ratio
    pub pbr: Option<f64>,
    /// Dividend yield (%)
    pub dividend_yield: Option<f64>,
}

/// Figures derived from the quarterly financial statements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Fundamentals {
    /// Trailing four-quarter EPS
    pub eps_ttm: Option<f64>,
    /// Return on equity (%)
    pub roe: Option<f64>,
}

/// Everything the screening conditions need for one stock.
///
/// Fields that could not be fetched are `None` or empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub info: StockInfo,
    /// Daily bars, oldest first
    pub bars: Vec<DailyBar>,
    /// Institutional flows, oldest first
    pub institutional: Vec<InstitutionalFlow>,
    /// Margin balances, oldest first
    pub margin: Vec<MarginRecord>,
    pub valuation: Option<Valuation>,
    /// Trailing four-quarter EPS
    pub eps: Option<f64>,
    /// Return on equity (%)
    pub roe: Option<f64>,
    /// Number of shares issued
    pub shares_issued: Option<f64>,
    /// On the TWSE attention list (None when the list was unavailable)
    pub is_warning: Option<bool>,
    /// Under disposition measures (None when the list was unavailable)
    pub is_disposition: Option<bool>,
}

impl StockSnapshot {
    /// Create a snapshot holding only prices.
    pub fn new(info: StockInfo, mut bars: Vec<DailyBar>) -> Self {
        bars.sort_by_key(|b| b.date);
        Self {
            info,
            bars,
            institutional: Vec::new(),
            margin: Vec::new(),
            valuation: None,
            eps: None,
            roe: None,
            shares_issued: None,
            is_warning: None,
            is_disposition: None,
        }
    }

    pub fn latest_bar(&self) -> Option<&DailyBar> {
        self.bars.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    /// Latest institutional row.
    pub fn latest_flow(&self) -> Option<&InstitutionalFlow> {
        self.institutional.last()
    }

    /// Trust net buy of the latest day in lots.
    pub fn trust_net_lots(&self) -> Option<f64> {
        self.latest_flow().map(|f| f.trust_net() / SHARES_PER_LOT)
    }

    /// Foreign net buy of the latest day in lots.
    pub fn foreign_net_lots(&self) -> Option<f64> {
        self.latest_flow().map(|f| f.foreign_net() / SHARES_PER_LOT)
    }
}
