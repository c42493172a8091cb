//! Per-stock data assembly with provider failover.
//!
//! Each data kind is requested from the providers that advertise it, in
//! priority order. Daily bars are required; everything else is best effort
//! and left empty when no provider can serve it.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use twstock_common::config::{Config, FetchConfig};

use super::finmind::FinMindClient;
use super::provider::{AttentionLists, DataCapabilities, DataProvider, ProviderError};
use super::twse::TwseClient;
use super::{StockInfo, StockSnapshot};

/// Anything that can produce a [`StockSnapshot`] for a stock.
///
/// The screening engine depends on this rather than on the fetcher so runs
/// can be driven from canned data.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self, info: &StockInfo) -> Result<StockSnapshot, ProviderError>;
}

/// Fetches stock snapshots from a prioritized set of providers.
pub struct StockDataFetcher {
    providers: Vec<Arc<dyn DataProvider>>,
    price_history_days: i64,
    flow_history_days: i64,
    as_of: Option<NaiveDate>,
    attention: OnceCell<Option<AttentionLists>>,
}

impl StockDataFetcher {
    /// Create a fetcher over the given providers (sorted by priority).
    pub fn new(mut providers: Vec<Arc<dyn DataProvider>>, fetch: &FetchConfig) -> Self {
        providers.sort_by_key(|p| p.priority());
        Self {
            providers,
            price_history_days: fetch.price_history_days,
            flow_history_days: fetch.flow_history_days,
            as_of: None,
            attention: OnceCell::new(),
        }
    }

    /// FinMind first, TWSE OpenAPI as backup.
    pub fn from_config(config: &Config) -> Result<Self> {
        let providers: Vec<Arc<dyn DataProvider>> = vec![
            Arc::new(FinMindClient::from_config(config)?),
            Arc::new(TwseClient::from_config(config)?),
        ];
        Ok(Self::new(providers, &config.fetch))
    }

    /// Fix the end date of all data windows instead of using today.
    pub fn with_as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = Some(date);
        self
    }

    pub fn providers(&self) -> &[Arc<dyn DataProvider>] {
        &self.providers
    }

    /// Health of every provider, in priority order.
    pub async fn health_check_all(&self) -> Vec<(&'static str, Result<(), ProviderError>)> {
        let checks = self
            .providers
            .iter()
            .map(|p| async move { (p.name(), p.health_check().await) });
        futures::future::join_all(checks).await
    }

    fn end_date(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Run a request against capable providers until one succeeds.
    async fn first_ok<T, F, Fut>(
        &self,
        what: &str,
        supports: fn(&DataCapabilities) -> bool,
        request_fn: F,
    ) -> Result<T, ProviderError>
    where
        F: Fn(Arc<dyn DataProvider>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
        T: Send,
    {
        let mut last_error = None;

        for provider in self.providers.iter().filter(|p| supports(&p.capabilities())) {
            let name = provider.name();
            match request_fn(Arc::clone(provider)).await {
                Ok(result) => return Ok(result),
                Err(e) if e.should_failover() => {
                    debug!(provider = name, what, error = %e, "Provider failed, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::DataNotAvailable(format!("no provider serves {}", what))
        }))
    }

    /// Like `first_ok`, but a failure only leaves the field empty.
    async fn optional<T, F, Fut>(
        &self,
        stock_id: &str,
        what: &str,
        supports: fn(&DataCapabilities) -> bool,
        request_fn: F,
    ) -> Option<T>
    where
        F: Fn(Arc<dyn DataProvider>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
        T: Send,
    {
        if !self.providers.iter().any(|p| supports(&p.capabilities())) {
            return None;
        }

        match self.first_ok(what, supports, request_fn).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(stock_id, what, error = %e, "Optional data unavailable");
                None
            }
        }
    }

    /// Stock list from the first provider that serves one.
    pub async fn list_stocks(&self) -> Result<Vec<StockInfo>, ProviderError> {
        self.first_ok("stock list", |c| c.stock_list, |p| async move { p.list_stocks().await })
            .await
    }

    /// Attention lists, fetched once per fetcher.
    pub async fn attention_lists(&self) -> Option<AttentionLists> {
        self.attention
            .get_or_init(|| async {
                match self
                    .first_ok("attention lists", |c| c.attention_lists, |p| async move {
                        p.attention_lists().await
                    })
                    .await
                {
                    Ok(lists) => Some(lists),
                    Err(e) => {
                        warn!(
                            error = %e,
                            "Attention lists unavailable, treating all stocks as unflagged"
                        );
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// Assemble everything the screening conditions need for one stock.
    pub async fn fetch_snapshot(&self, info: &StockInfo) -> Result<StockSnapshot, ProviderError> {
        let id = info.stock_id.as_str();
        let end = self.end_date();
        let price_start = end - Duration::days(self.price_history_days);
        let flow_start = end - Duration::days(self.flow_history_days);

        let bars = self
            .first_ok("daily bars", |c| c.daily_bars, move |p| async move {
                p.daily_bars(id, price_start, end).await
            })
            .await?;

        if bars.is_empty() {
            return Err(ProviderError::DataNotAvailable(format!("no price data for {}", id)));
        }

        let (institutional, margin, valuation, fundamentals, shares_issued, attention) =
            tokio::join!(
                self.optional(id, "institutional flows", |c| c.institutional, move |p| async move {
                    p.institutional_flows(id, flow_start, end).await
                }),
                self.optional(id, "margin records", |c| c.margin, move |p| async move {
                    p.margin_records(id, flow_start, end).await
                }),
                self.optional(id, "valuation", |c| c.valuation, move |p| async move {
                    p.valuation(id, end).await
                }),
                self.optional(id, "fundamentals", |c| c.fundamentals, move |p| async move {
                    p.fundamentals(id, end).await
                }),
                self.optional(id, "shares issued", |c| c.shareholding, move |p| async move {
                    p.shares_issued(id, end).await
                }),
                self.attention_lists(),
            );

        let mut snapshot = StockSnapshot::new(info.clone(), bars);
        snapshot.institutional = institutional.unwrap_or_default();
        snapshot.margin = margin.unwrap_or_default();
        snapshot.roe = fundamentals.and_then(|f| f.roe);
        snapshot.shares_issued = shares_issued;

        // Without statements, derive EPS from price and P/E.
        snapshot.eps = fundamentals.and_then(|f| f.eps_ttm).or_else(|| {
            let per = valuation.as_ref()?.per.filter(|p| *p > 0.0)?;
            snapshot.latest_bar().map(|b| b.close / per)
        });
        snapshot.valuation = valuation;

        if let Some(lists) = attention {
            snapshot.is_warning = Some(lists.is_warning(id));
            snapshot.is_disposition = Some(lists.is_disposition(id));
        }

        Ok(snapshot)
    }
}

#[async_trait]
impl SnapshotSource for StockDataFetcher {
    async fn snapshot(&self, info: &StockInfo) -> Result<StockSnapshot, ProviderError> {
        self.fetch_snapshot(info).await
    }
}
