//! TWSE adapter.
//!
//! Uses the public TWSE OpenAPI for market-wide daily tables and the main
//! site's announcement endpoints for attention / disposition lists. All
//! tables are whole-market snapshots, so each one is fetched at most once per
//! hour and looked up per stock from the cache.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use twstock_common::config::Config;

use super::cache::{hourly_key, TtlCache};
use super::provider::{AttentionLists, DataCapabilities, DataProvider, ProviderError};
use super::universe::is_ordinary_share;
use super::{parse_number, Market, StockInfo, Valuation};

/// Row of `/exchangeReport/STOCK_DAY_ALL`.
#[derive(Debug, Clone, Deserialize)]
pub struct DailyQuote {
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "TradeVolume", default)]
    pub trade_volume: String,
    #[serde(rename = "ClosingPrice", default)]
    pub closing_price: String,
    #[serde(rename = "Change", default)]
    pub change: String,
}

impl DailyQuote {
    pub fn close(&self) -> Option<f64> {
        parse_number(&self.closing_price)
    }

    pub fn volume(&self) -> Option<f64> {
        parse_number(&self.trade_volume)
    }
}

/// Row of `/exchangeReport/BWIBBU_ALL`.
#[derive(Debug, Clone, Deserialize)]
struct ValuationRow {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "PEratio", default)]
    pe_ratio: String,
    #[serde(rename = "DividendYield", default)]
    dividend_yield: String,
    #[serde(rename = "PBratio", default)]
    pb_ratio: String,
}

impl From<&ValuationRow> for Valuation {
    fn from(row: &ValuationRow) -> Self {
        Self {
            date: None,
            per: parse_number(&row.pe_ratio).filter(|v| *v > 0.0),
            pbr: parse_number(&row.pb_ratio).filter(|v| *v > 0.0),
            dividend_yield: parse_number(&row.dividend_yield),
        }
    }
}

/// Extract stock ids from an announcement table.
///
/// Rows start with a sequence number on some pages and with the code on
/// others, so the first 4-digit cell among the leading cells is taken.
fn announcement_codes(body: &Value) -> HashSet<String> {
    let Some(rows) = body.get("data").and_then(Value::as_array) else {
        return HashSet::new();
    };

    rows.iter()
        .filter_map(Value::as_array)
        .filter_map(|cells| {
            cells.iter().take(3).find_map(|cell| {
                let text = match cell {
                    Value::String(s) => s.trim().to_string(),
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                (text.len() == 4 && text.chars().all(|c| c.is_ascii_digit())).then_some(text)
            })
        })
        .collect()
}

/// TWSE OpenAPI / announcement client.
pub struct TwseClient {
    client: reqwest::Client,
    openapi_url: String,
    www_url: String,
    quotes: TtlCache<Arc<HashMap<String, DailyQuote>>>,
    valuations: TtlCache<Arc<HashMap<String, ValuationRow>>>,
    attention: TtlCache<AttentionLists>,
    refresh_lock: Mutex<()>,
}

impl TwseClient {
    /// Create a client from the application configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let twse = &config.twse;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(twse.timeout_secs))
            .user_agent(concat!("twstock-screener/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build TWSE HTTP client")?;

        Ok(Self {
            client,
            openapi_url: twse.openapi_url.trim_end_matches('/').to_string(),
            www_url: twse.www_url.trim_end_matches('/').to_string(),
            quotes: TtlCache::new(twse.cache_ttl_secs),
            valuations: TtlCache::new(twse.cache_ttl_secs),
            attention: TtlCache::new(twse.cache_ttl_secs),
            refresh_lock: Mutex::new(()),
        })
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, ProviderError> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!(
                "{} returned HTTP {}",
                url, status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("{}: {}", url, e)))
    }

    /// Today's quotes for every TWSE-listed security, keyed by code.
    pub async fn daily_quotes(&self) -> Result<Arc<HashMap<String, DailyQuote>>, ProviderError> {
        let key = hourly_key("stock_day_all");
        if let Some(cached) = self.quotes.get(&key) {
            return Ok(cached);
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(cached) = self.quotes.get(&key) {
            return Ok(cached);
        }

        let url = format!("{}/exchangeReport/STOCK_DAY_ALL", self.openapi_url);
        let body = self.get_json(&url, &[]).await?;
        let rows: Vec<DailyQuote> = serde_json::from_value(body)
            .map_err(|e| ProviderError::InvalidResponse(format!("STOCK_DAY_ALL: {}", e)))?;

        let table: HashMap<String, DailyQuote> =
            rows.into_iter().map(|row| (row.code.trim().to_string(), row)).collect();
        let table = Arc::new(table);
        self.quotes.clear_expired();
        self.quotes.insert(key, table.clone());
        debug!(rows = table.len(), cache = ?self.quotes.stats(), "Loaded TWSE daily quotes");
        Ok(table)
    }

    async fn valuation_table(&self) -> Result<Arc<HashMap<String, ValuationRow>>, ProviderError> {
        let key = hourly_key("bwibbu_all");
        if let Some(cached) = self.valuations.get(&key) {
            return Ok(cached);
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(cached) = self.valuations.get(&key) {
            return Ok(cached);
        }

        let url = format!("{}/exchangeReport/BWIBBU_ALL", self.openapi_url);
        let body = self.get_json(&url, &[]).await?;
        let rows: Vec<ValuationRow> = serde_json::from_value(body)
            .map_err(|e| ProviderError::InvalidResponse(format!("BWIBBU_ALL: {}", e)))?;

        let table: HashMap<String, ValuationRow> =
            rows.into_iter().map(|row| (row.code.trim().to_string(), row)).collect();
        debug!(rows = table.len(), "Loaded TWSE valuation table");

        let table = Arc::new(table);
        self.valuations.clear_expired();
        self.valuations.insert(key, table.clone());
        Ok(table)
    }

    async fn announcement(&self, path: &str) -> Result<HashSet<String>, ProviderError> {
        let url = format!("{}/rwd/zh/announcement/{}", self.www_url, path);
        let body = self.get_json(&url, &[("response", "json")]).await?;
        Ok(announcement_codes(&body))
    }
}

#[async_trait]
impl DataProvider for TwseClient {
    fn name(&self) -> &'static str {
        "twse"
    }

    fn priority(&self) -> u8 {
        2
    }

    fn capabilities(&self) -> DataCapabilities {
        DataCapabilities {
            stock_list: true,
            valuation: true,
            attention_lists: true,
            ..Default::default()
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let quotes = self.daily_quotes().await?;
        if quotes.is_empty() {
            return Err(ProviderError::DataNotAvailable(
                "STOCK_DAY_ALL returned no rows".into(),
            ));
        }
        Ok(())
    }

    /// Listed (上市) ordinary shares only; TWSE does not publish OTC stocks.
    async fn list_stocks(&self) -> Result<Vec<StockInfo>, ProviderError> {
        let quotes = self.daily_quotes().await?;

        let mut stocks: Vec<StockInfo> = quotes
            .values()
            .filter(|q| is_ordinary_share(&q.code, &q.name))
            .map(|q| StockInfo::new(q.code.clone(), q.name.trim(), Market::Twse))
            .collect();
        stocks.sort_by(|a, b| a.stock_id.cmp(&b.stock_id));

        Ok(stocks)
    }

    // BWIBBU_ALL only carries the latest trading day.
    async fn valuation(
        &self,
        stock_id: &str,
        _as_of: NaiveDate,
    ) -> Result<Valuation, ProviderError> {
        let table = self.valuation_table().await?;
        table
            .get(stock_id)
            .map(Valuation::from)
            .ok_or_else(|| {
                ProviderError::DataNotAvailable(format!("{} not in BWIBBU_ALL", stock_id))
            })
    }

    async fn attention_lists(&self) -> Result<AttentionLists, ProviderError> {
        let key = hourly_key("attention");
        if let Some(cached) = self.attention.get(&key) {
            return Ok(cached);
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(cached) = self.attention.get(&key) {
            return Ok(cached);
        }

        let lists = AttentionLists {
            warning: self.announcement("notice").await?,
            disposition: self.announcement("punish").await?,
        };
        info!(
            warning = lists.warning.len(),
            disposition = lists.disposition.len(),
            "Refreshed attention and disposition lists"
        );

        self.attention.clear_expired();
        self.attention.insert(key, lists.clone());
        Ok(lists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_announcement_codes() {
        let body = json!({
            "stat": "OK",
            "data": [
                ["1", "2330", "台積電", "..."],
                ["2344", "華邦電", "..."],
                ["3", "00940", "元大臺灣價值高息"],
                []
            ]
        });
        let codes = announcement_codes(&body);
        assert_eq!(codes.len(), 2);
        assert!(codes.contains("2330"));
        assert!(codes.contains("2344"));
    }

    #[test]
    fn test_announcement_codes_without_data() {
        assert!(announcement_codes(&json!({"stat": "很抱歉，沒有符合條件的資料!"})).is_empty());
    }

    #[test]
    fn test_valuation_row_conversion() {
        let row = ValuationRow {
            code: "2330".into(),
            pe_ratio: "22.51".into(),
            dividend_yield: "1.65".into(),
            pb_ratio: "-".into(),
        };
        let valuation = Valuation::from(&row);
        assert_eq!(valuation.per, Some(22.51));
        assert_eq!(valuation.pbr, None);
        assert_eq!(valuation.dividend_yield, Some(1.65));
    }

    #[test]
    fn test_daily_quote_numbers() {
        let quote: DailyQuote = serde_json::from_value(json!({
            "Code": "2330", "Name": "台積電",
            "TradeVolume": "25,123,456", "ClosingPrice": "788.00", "Change": "+5.00"
        }))
        .unwrap();
        assert_eq!(quote.volume(), Some(25_123_456.0));
        assert_eq!(quote.close(), Some(788.0));
    }
}
