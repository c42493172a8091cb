//! FinMind API adapter.
//!
//! FinMind exposes Taiwan market datasets behind two endpoints:
//! - v3 (`/api/v3/data`): stock info and daily prices, no token required
//! - v4 (`/api/v4/data`): everything else, bearer token required
//!
//! Responses share the envelope `{"msg": ..., "status": 200, "data": [...]}`.
//! Requests are throttled through a shared `RateLimiter` and retried on
//! network errors, HTTP 5xx and HTTP 429.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration as StdDuration;
use tracing::{debug, warn};
use twstock_common::config::Config;
use twstock_common::util::sanitize_for_log;

use super::provider::{DataCapabilities, DataProvider, ProviderError};
use super::rate_limiter::{shared_limiter, SharedRateLimiter};
use super::universe::is_ordinary_share;
use super::{
    value_to_f64, DailyBar, Fundamentals, InstitutionalFlow, MarginRecord, Market, StockInfo,
    Valuation,
};

/// Datasets served by the public v3 endpoint.
const V3_DATASETS: &[&str] = &["TaiwanStockInfo", "TaiwanStockPrice"];

/// Statement item types holding quarterly net income.
const NET_INCOME_TYPES: &[&str] = &["IncomeAfterTaxes", "ProfitLoss", "NetIncome"];
const NET_INCOME_NAMES: &[&str] = &["本期淨利（淨損）", "本期淨利", "稅後淨利"];

/// Balance sheet item types holding shareholders' equity.
const EQUITY_TYPES: &[&str] = &["EquityAttributableToOwnersOfParent", "Equity", "TotalEquity"];
const EQUITY_NAMES: &[&str] = &["歸屬於母公司業主之權益合計", "權益總計", "權益總額"];

const EPS_TYPES: &[&str] = &["EPS"];
const EPS_NAMES: &[&str] = &["基本每股盈餘（元）", "基本每股盈餘"];

// ============================================================================
// Wire Types
// ============================================================================

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_f64(&value).unwrap_or(0.0))
}

fn lenient_opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_f64(&value))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), "%Y-%m-%d").ok()
}

#[derive(Debug, Deserialize)]
struct StockInfoRow {
    stock_id: String,
    #[serde(default)]
    stock_name: String,
    #[serde(default, rename = "type")]
    market_type: String,
    #[serde(default)]
    industry_category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    date: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    open: f64,
    #[serde(default, rename = "max", deserialize_with = "lenient_f64")]
    high: f64,
    #[serde(default, rename = "min", deserialize_with = "lenient_f64")]
    low: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    close: f64,
    #[serde(default, rename = "Trading_Volume", deserialize_with = "lenient_f64")]
    volume: f64,
    #[serde(default, rename = "Trading_money", deserialize_with = "lenient_f64")]
    amount: f64,
}

#[derive(Debug, Deserialize)]
struct InstitutionalRow {
    date: String,
    #[serde(default)]
    name: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    buy: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    sell: f64,
}

#[derive(Debug, Deserialize)]
struct MarginRow {
    date: String,
    #[serde(default, rename = "MarginPurchaseTodayBalance", deserialize_with = "lenient_f64")]
    margin_balance: f64,
    #[serde(default, rename = "MarginPurchaseLimit", deserialize_with = "lenient_f64")]
    margin_limit: f64,
    #[serde(default, rename = "ShortSaleTodayBalance", deserialize_with = "lenient_f64")]
    short_balance: f64,
}

#[derive(Debug, Deserialize)]
struct PerRow {
    date: String,
    #[serde(default, rename = "PER", deserialize_with = "lenient_opt_f64")]
    per: Option<f64>,
    #[serde(default, rename = "PBR", deserialize_with = "lenient_opt_f64")]
    pbr: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    dividend_yield: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StatementRow {
    date: String,
    #[serde(default, rename = "type")]
    item_type: String,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    value: Option<f64>,
    #[serde(default)]
    origin_name: String,
}

#[derive(Debug, Deserialize)]
struct ShareholdingRow {
    date: String,
    #[serde(default, rename = "NumberOfSharesIssued", deserialize_with = "lenient_opt_f64")]
    shares_issued: Option<f64>,
}

/// Outcome of `FinMindClient::test_connection`.
#[derive(Debug)]
pub struct ConnectionReport {
    /// Rows returned by the v3 probe
    pub v3: std::result::Result<usize, ProviderError>,
    /// Rows returned by the v4 probe (None when no token is configured)
    pub v4: Option<std::result::Result<usize, ProviderError>>,
}

impl ConnectionReport {
    pub fn is_ok(&self) -> bool {
        self.v3.is_ok() && matches!(self.v4, Some(Ok(_)))
    }
}

// ============================================================================
// FinMind Client
// ============================================================================

/// FinMind API client.
pub struct FinMindClient {
    client: reqwest::Client,
    v3_url: String,
    v4_url: String,
    token: Option<String>,
    max_retries: u32,
    retry_delay: StdDuration,
    limiter: SharedRateLimiter,
}

impl FinMindClient {
    /// Create a client from the application configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let finmind = &config.finmind;
        let limiter = shared_limiter(
            "finmind",
            finmind.requests_per_minute,
            StdDuration::from_millis(finmind.min_interval_ms),
        );

        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(finmind.timeout_secs))
            .user_agent(concat!("twstock-screener/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build FinMind HTTP client")?;

        Ok(Self {
            client,
            v3_url: finmind.v3_url.clone(),
            v4_url: finmind.v4_url.clone(),
            token: config.finmind_token().map(str::to_string),
            max_retries: finmind.max_retries,
            retry_delay: StdDuration::from_millis(finmind.retry_delay_ms),
            limiter,
        })
    }

    /// Whether a token is configured.
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn endpoint_for(&self, dataset: &str) -> (&str, bool) {
        if V3_DATASETS.contains(&dataset) {
            (&self.v3_url, false)
        } else {
            (&self.v4_url, true)
        }
    }

    /// Fetch one dataset, routed to v3 or v4 by name.
    pub async fn dataset<T: DeserializeOwned>(
        &self,
        dataset: &str,
        data_id: Option<&str>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<T>, ProviderError> {
        let (url, needs_token) = self.endpoint_for(dataset);

        if needs_token && self.token.is_none() {
            return Err(ProviderError::Auth(format!(
                "FinMind token required for dataset {}",
                dataset
            )));
        }

        let mut params: Vec<(&str, String)> = vec![("dataset", dataset.to_string())];
        if let Some(id) = data_id {
            params.push(("data_id", id.to_string()));
        }
        if let Some(start) = start {
            params.push(("start_date", start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = end {
            params.push(("end_date", end.format("%Y-%m-%d").to_string()));
        }

        let data = self.request(url, &params, needs_token, dataset).await?;

        serde_json::from_value(data).map_err(|e| {
            ProviderError::InvalidResponse(format!("{}: {}", dataset, e))
        })
    }

    /// Send a request with throttling and retries; returns the `data` member.
    async fn request(
        &self,
        url: &str,
        params: &[(&str, String)],
        with_token: bool,
        dataset: &str,
    ) -> Result<Value, ProviderError> {
        let mut last_error = ProviderError::Unavailable(format!("{}: no attempt made", dataset));
        let attempts = self.max_retries.max(1);

        for attempt in 0..attempts {
            let has_next = attempt + 1 < attempts;
            self.limiter.acquire().await;

            let mut request = self.client.get(url).query(params);
            if with_token {
                if let Some(token) = &self.token {
                    request = request.bearer_auth(token);
                }
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        dataset,
                        attempt = attempt + 1,
                        error = %sanitize_for_log(&e.to_string()),
                        "FinMind request failed"
                    );
                    last_error = ProviderError::Network(e.to_string());
                    if has_next {
                        tokio::time::sleep(self.retry_delay * (attempt + 1)).await;
                    }
                    continue;
                }
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = self.retry_delay * 2u32.pow(attempt);
                warn!(
                    dataset,
                    attempt = attempt + 1,
                    wait_ms = wait.as_millis() as u64,
                    "FinMind rate limited"
                );
                last_error = ProviderError::RateLimited {
                    retry_after_secs: Some(wait.as_secs().max(1)),
                };
                if has_next {
                    tokio::time::sleep(wait).await;
                }
                continue;
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(ProviderError::Auth(format!(
                    "FinMind rejected the token ({})",
                    status
                )));
            }

            if status.is_server_error() {
                warn!(dataset, attempt = attempt + 1, %status, "FinMind server error");
                last_error = ProviderError::Unavailable(format!("{}: HTTP {}", dataset, status));
                if has_next {
                    tokio::time::sleep(self.retry_delay * (attempt + 1)).await;
                }
                continue;
            }

            let body: Value = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    return Err(ProviderError::InvalidResponse(format!(
                        "{}: HTTP {} with unreadable body: {}",
                        dataset, status, e
                    )))
                }
            };

            return check_envelope(dataset, body);
        }

        Err(last_error)
    }

    /// Probe both endpoints the way the diagnostic tool does.
    pub async fn test_connection(&self) -> ConnectionReport {
        let v3 = self
            .dataset::<StockInfoRow>("TaiwanStockInfo", Some("2330"), None, None)
            .await
            .map(|rows| rows.len());

        let v4 = if self.has_token() {
            let today = Local::now().date_naive();
            Some(
                self.dataset::<PerRow>(
                    "TaiwanStockPER",
                    Some("2330"),
                    Some(today - Duration::days(7)),
                    Some(today),
                )
                .await
                .map(|rows| rows.len()),
            )
        } else {
            None
        };

        ConnectionReport { v3, v4 }
    }

    /// Two years of statement rows up to `as_of`, oldest first.
    async fn statements(
        &self,
        dataset: &str,
        stock_id: &str,
        as_of: NaiveDate,
    ) -> Result<Vec<StatementRow>, ProviderError> {
        let mut rows: Vec<StatementRow> = self
            .dataset(dataset, Some(stock_id), Some(as_of - Duration::days(730)), Some(as_of))
            .await?;
        rows.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(rows)
    }
}

/// Validate the FinMind envelope and take its `data` member.
fn check_envelope(dataset: &str, mut body: Value) -> Result<Value, ProviderError> {
    let status = body.get("status").and_then(Value::as_i64).unwrap_or(200);
    let msg = body
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if status != 200 {
        let lower = msg.to_lowercase();
        debug!(dataset, status, msg = %msg, "FinMind returned an error envelope");

        return Err(if lower.contains("token") || status == 401 || status == 403 {
            ProviderError::Auth(format!("{}: {}", dataset, msg))
        } else if status == 402 || lower.contains("upper limit") {
            ProviderError::RateLimited {
                retry_after_secs: None,
            }
        } else {
            ProviderError::DataNotAvailable(format!("{}: {} ({})", dataset, msg, status))
        });
    }

    Ok(body
        .get_mut("data")
        .map(Value::take)
        .unwrap_or(Value::Array(Vec::new())))
}

/// Pick one value per statement date, preferring earlier entries of `types`/`names`.
fn items_by_date(
    rows: &[StatementRow],
    types: &[&str],
    names: &[&str],
) -> BTreeMap<NaiveDate, f64> {
    let rank = |row: &StatementRow| {
        types
            .iter()
            .position(|t| row.item_type == *t)
            .or_else(|| {
                names
                    .iter()
                    .position(|n| row.origin_name == *n)
                    .map(|p| p + types.len())
            })
    };

    let mut best: BTreeMap<NaiveDate, (usize, f64)> = BTreeMap::new();
    for row in rows {
        let (Some(date), Some(value), Some(r)) = (parse_date(&row.date), row.value, rank(row))
        else {
            continue;
        };
        match best.get(&date) {
            Some((existing, _)) if *existing <= r => {}
            _ => {
                best.insert(date, (r, value));
            }
        }
    }

    best.into_iter().map(|(date, (_, value))| (date, value)).collect()
}

/// Sum the last four quarters, or annualize the latest one when fewer exist.
fn trailing_annual(values: &BTreeMap<NaiveDate, f64>) -> Option<f64> {
    let recent: Vec<f64> = values.values().rev().take(4).copied().collect();
    match recent.len() {
        0 => None,
        4 => Some(recent.iter().sum()),
        _ => Some(recent[0] * 4.0),
    }
}

/// Sum of the last four EPS quarters; `None` with fewer quarters.
fn eps_from_statements(income: &[StatementRow]) -> Option<f64> {
    let eps = items_by_date(income, EPS_TYPES, EPS_NAMES);
    (eps.len() >= 4).then(|| eps.values().rev().take(4).sum())
}

/// Trailing net income over equity as of the latest income quarter, in percent.
fn roe_from_statements(income: &[StatementRow], balance: &[StatementRow]) -> Option<f64> {
    let net_income = items_by_date(income, NET_INCOME_TYPES, NET_INCOME_NAMES);
    let equity = items_by_date(balance, EQUITY_TYPES, EQUITY_NAMES);

    let annual_income = trailing_annual(&net_income)?;
    let latest_income_date = net_income.keys().next_back().copied();
    let equity_value = latest_income_date
        .and_then(|date| equity.range(..=date).next_back().map(|(_, v)| *v))
        .or_else(|| equity.values().next_back().copied())
        .filter(|v| *v > 0.0)?;

    Some(annual_income / equity_value * 100.0)
}

#[async_trait]
impl DataProvider for FinMindClient {
    fn name(&self) -> &'static str {
        "finmind"
    }

    fn priority(&self) -> u8 {
        1
    }

    fn capabilities(&self) -> DataCapabilities {
        DataCapabilities::per_stock_api()
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let report = self.test_connection().await;
        report.v3?;
        match report.v4 {
            Some(result) => result.map(|_| ()),
            None => Err(ProviderError::Auth("FinMind token not configured".into())),
        }
    }

    async fn list_stocks(&self) -> Result<Vec<StockInfo>, ProviderError> {
        let rows: Vec<StockInfoRow> = self.dataset("TaiwanStockInfo", None, None, None).await?;

        let mut seen = HashSet::new();
        let stocks: Vec<StockInfo> = rows
            .into_iter()
            .filter_map(|row| {
                let market = Market::parse(&row.market_type)?;
                if !is_ordinary_share(&row.stock_id, &row.stock_name) {
                    return None;
                }
                if !seen.insert(row.stock_id.clone()) {
                    return None;
                }
                let mut info = StockInfo::new(row.stock_id, row.stock_name, market);
                info.industry = row.industry_category.filter(|s| !s.trim().is_empty());
                Some(info)
            })
            .collect();

        if stocks.is_empty() {
            return Err(ProviderError::DataNotAvailable(
                "TaiwanStockInfo returned no ordinary shares".into(),
            ));
        }

        debug!(count = stocks.len(), "FinMind stock list loaded");
        Ok(stocks)
    }

    async fn daily_bars(
        &self,
        stock_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>, ProviderError> {
        let rows: Vec<PriceRow> = self
            .dataset("TaiwanStockPrice", Some(stock_id), Some(start), Some(end))
            .await?;

        let mut bars: Vec<DailyBar> = rows
            .into_iter()
            // Suspended days come back with zero prices
            .filter(|row| row.close > 0.0)
            .filter_map(|row| {
                Some(DailyBar {
                    date: parse_date(&row.date)?,
                    open: row.open,
                    high: row.high,
                    low: row.low,
                    close: row.close,
                    volume: row.volume,
                    amount: row.amount,
                })
            })
            .collect();

        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);

        if bars.is_empty() {
            return Err(ProviderError::DataNotAvailable(format!(
                "no prices for {} between {} and {}",
                stock_id, start, end
            )));
        }

        Ok(bars)
    }

    async fn institutional_flows(
        &self,
        stock_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<InstitutionalFlow>, ProviderError> {
        let rows: Vec<InstitutionalRow> = self
            .dataset(
                "TaiwanStockInstitutionalInvestorsBuySell",
                Some(stock_id),
                Some(start),
                Some(end),
            )
            .await?;

        let mut by_date: BTreeMap<NaiveDate, InstitutionalFlow> = BTreeMap::new();
        for row in rows {
            let Some(date) = parse_date(&row.date) else {
                continue;
            };
            let flow = by_date
                .entry(date)
                .or_insert_with(|| InstitutionalFlow::new(date));
            if !flow.add(&row.name, row.buy, row.sell) {
                debug!(stock_id, investor = %row.name, "Skipping unknown investor type");
            }
        }

        Ok(by_date.into_values().collect())
    }

    async fn margin_records(
        &self,
        stock_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MarginRecord>, ProviderError> {
        let rows: Vec<MarginRow> = self
            .dataset(
                "TaiwanStockMarginPurchaseShortSale",
                Some(stock_id),
                Some(start),
                Some(end),
            )
            .await?;

        let mut records: Vec<MarginRecord> = rows
            .into_iter()
            .filter_map(|row| {
                Some(MarginRecord {
                    date: parse_date(&row.date)?,
                    margin_balance: row.margin_balance,
                    margin_limit: row.margin_limit,
                    short_balance: row.short_balance,
                })
            })
            .collect();
        records.sort_by_key(|r| r.date);

        Ok(records)
    }

    async fn valuation(
        &self,
        stock_id: &str,
        as_of: NaiveDate,
    ) -> Result<Valuation, ProviderError> {
        let rows: Vec<PerRow> = self
            .dataset(
                "TaiwanStockPER",
                Some(stock_id),
                Some(as_of - Duration::days(30)),
                Some(as_of),
            )
            .await?;

        let latest = rows
            .into_iter()
            .filter_map(|row| Some((parse_date(&row.date)?, row)))
            .max_by_key(|(date, _)| *date)
            .ok_or_else(|| {
                ProviderError::DataNotAvailable(format!("no PER rows for {}", stock_id))
            })?;

        let (date, row) = latest;
        Ok(Valuation {
            date: Some(date),
            per: row.per.filter(|v| *v > 0.0),
            pbr: row.pbr.filter(|v| *v > 0.0),
            dividend_yield: row.dividend_yield,
        })
    }

    /// One pull of each statement dataset serves both EPS and ROE.
    async fn fundamentals(
        &self,
        stock_id: &str,
        as_of: NaiveDate,
    ) -> Result<Fundamentals, ProviderError> {
        let income = self
            .statements("TaiwanStockFinancialStatements", stock_id, as_of)
            .await?;

        let roe = match self.statements("TaiwanStockBalanceSheet", stock_id, as_of).await {
            Ok(balance) => roe_from_statements(&income, &balance),
            Err(e) => {
                debug!(stock_id, error = %e, "Balance sheet unavailable");
                None
            }
        };
        let fundamentals = Fundamentals {
            eps_ttm: eps_from_statements(&income),
            roe,
        };

        if fundamentals.eps_ttm.is_none() && fundamentals.roe.is_none() {
            return Err(ProviderError::DataNotAvailable(format!(
                "no usable statements for {} up to {}",
                stock_id, as_of
            )));
        }

        Ok(fundamentals)
    }

    async fn shares_issued(&self, stock_id: &str, as_of: NaiveDate) -> Result<f64, ProviderError> {
        let rows: Vec<ShareholdingRow> = self
            .dataset(
                "TaiwanStockShareholding",
                Some(stock_id),
                Some(as_of - Duration::days(14)),
                Some(as_of),
            )
            .await?;

        rows.into_iter()
            .filter_map(|row| Some((parse_date(&row.date)?, row.shares_issued?)))
            .filter(|(_, shares)| *shares > 0.0)
            .max_by_key(|(date, _)| *date)
            .map(|(_, shares)| shares)
            .ok_or_else(|| {
                ProviderError::DataNotAvailable(format!("no shareholding rows for {}", stock_id))
            })
    }
}
