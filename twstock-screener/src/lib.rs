//! Taiwan Stock Screener Library
//!
//! Screens TWSE and TPEx listed stocks against volume, technical,
//! institutional, margin and fundamental conditions, scores the stocks that
//! match enough of them, and writes Excel, JSON and Markdown reports.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                     twstock-screener (CLI)                         │
//! ├────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌──────────────┐   ┌────────────┐  ┌──────────┐ │
//! │  │ Preflight  │──▶│ Data Fetcher │──▶│ Screening  │─▶│ Export   │ │
//! │  │ (launcher) │   │ FinMind/TWSE │   │ + Scoring  │  │ xlsx/json│ │
//! │  └────────────┘   └──────────────┘   └────────────┘  └──────────┘ │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Data Sources
//! - **FinMind**: prices, institutional flows, margin, valuation, statements
//! - **TWSE OpenAPI**: daily quotes and valuation fallback, attention and
//!   disposition announcement lists

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod data;
pub mod export;
pub mod indicators;
pub mod launcher;
pub mod screening;

use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use twstock_common::config::Config;
use twstock_common::config_loader::write_json_if_absent;

use crate::data::universe::{self, MarketCounts, UniverseSource};
use crate::data::{
    FinMindClient, Market, ProviderError, SnapshotSource, StockDataFetcher, StockInfo,
    StockSnapshot, TwseClient,
};
use crate::export::{save_reports, ReportFormat};
use crate::indicators::IndicatorSummary;
use crate::screening::{
    evaluate_all, CheckResult, EngineOptions, Metrics, Preset, ScoreCard, ScreeningEngine,
    ScreeningParameters, ScreeningRun,
};

// ============================================================================
// Run Options
// ============================================================================

/// Per-invocation overrides of the configured run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Screen only the first `fetch.test_mode_limit` stocks
    pub test_mode: bool,
    pub max_results: Option<usize>,
    /// Applied to the saved parameters before `min_conditions`
    pub preset: Option<Preset>,
    pub min_conditions: Option<usize>,
    /// Report formats; the configured ones when `None`
    pub formats: Option<Vec<ReportFormat>>,
}

/// A finished run and the files written for it.
#[derive(Debug)]
pub struct RunOutcome {
    pub run: ScreeningRun,
    pub universe_source: UniverseSource,
    pub reports: Vec<PathBuf>,
}

/// Result of the `check` diagnostic.
#[derive(Debug)]
pub struct ConnectivityReport {
    pub finmind: data::ConnectionReport,
    /// Number of TWSE daily quotes
    pub twse: Result<usize, ProviderError>,
}

impl ConnectivityReport {
    pub fn is_ok(&self) -> bool {
        self.finmind.is_ok() && self.twse.is_ok()
    }
}

/// Everything known about one stock, with every condition evaluated.
#[derive(Debug)]
pub struct Inspection {
    pub snapshot: StockSnapshot,
    pub metrics: Metrics,
    pub indicators: IndicatorSummary,
    pub check: CheckResult,
    pub score: ScoreCard,
}

// ============================================================================
// Screener Service
// ============================================================================

/// Screener service wiring configuration, data fetcher and engine.
pub struct ScreenerService {
    config: Config,
    params: ScreeningParameters,
    fetcher: Arc<StockDataFetcher>,
}

impl ScreenerService {
    /// Create a service with the FinMind and TWSE providers.
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = StockDataFetcher::from_config(&config)?;
        Self::with_fetcher(config, fetcher)
    }

    /// Create a service over a prepared fetcher.
    pub fn with_fetcher(config: Config, fetcher: StockDataFetcher) -> Result<Self> {
        let params = ScreeningParameters::from_config(&config)?;
        Ok(Self {
            config,
            params,
            fetcher: Arc::new(fetcher),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn parameters(&self) -> &ScreeningParameters {
        &self.params
    }

    /// Load, filter and optionally cap the stock universe.
    pub async fn universe(&self, test_mode: bool) -> (Vec<StockInfo>, UniverseSource) {
        let (stocks, source) =
            universe::load_universe(&self.config.reference_list_path(), &self.fetcher).await;
        let before = stocks.len();
        let mut stocks = universe::filter_by_market(
            stocks,
            self.params.market_twse,
            self.params.market_otc,
            self.params.market_emerging,
        );
        info!(
            source = %source,
            loaded = before,
            selected = stocks.len(),
            markets = %MarketCounts::of(&stocks),
            "Stock universe ready"
        );

        if test_mode && stocks.len() > self.config.fetch.test_mode_limit {
            stocks.truncate(self.config.fetch.test_mode_limit);
            info!(limit = stocks.len(), "Test mode: universe capped");
        }
        (stocks, source)
    }

    /// Screen the universe and write the reports.
    pub async fn run(&self, options: &RunOptions, cancel: Arc<AtomicBool>) -> Result<RunOutcome> {
        self.run_with_source(Arc::clone(&self.fetcher), options, cancel)
            .await
    }

    /// Screen with snapshots from `source` instead of the service's fetcher.
    pub async fn run_with_source<S: SnapshotSource + 'static>(
        &self,
        source: Arc<S>,
        options: &RunOptions,
        cancel: Arc<AtomicBool>,
    ) -> Result<RunOutcome> {
        let formats = match &options.formats {
            Some(formats) => formats.clone(),
            None => ReportFormat::parse_list(&self.config.output.formats)
                .map_err(anyhow::Error::msg)
                .context("Invalid output.formats")?,
        };

        let mut params = self.params.clone();
        if let Some(preset) = options.preset {
            params.apply_preset(preset);
            info!(preset = preset.label(), "Applied parameter preset");
        }
        if let Some(min) = options.min_conditions {
            params.min_conditions_to_pass = min;
        }
        let engine_options = EngineOptions {
            concurrency: self.config.fetch.concurrency,
            stock_delay: Duration::from_millis(self.config.fetch.stock_delay_ms),
            max_results: options.max_results.unwrap_or(self.config.output.max_results),
        };

        let (stocks, universe_source) = self.universe(options.test_mode).await;
        if stocks.is_empty() {
            warn!("No stocks to screen after market filtering");
        }

        let engine = ScreeningEngine::new(source, params, engine_options);
        let run = engine.screen(stocks, cancel).await;

        let reports = save_reports(&run, &self.config.reports_dir(), &formats)
            .context("Failed to write reports")?;

        Ok(RunOutcome {
            run,
            universe_source,
            reports,
        })
    }

    /// Probe FinMind v3/v4 and the TWSE OpenAPI.
    pub async fn check(&self) -> Result<ConnectivityReport> {
        let finmind = FinMindClient::from_config(&self.config)?;
        let twse = TwseClient::from_config(&self.config)?;

        let (finmind, twse) = tokio::join!(finmind.test_connection(), twse.daily_quotes());
        Ok(ConnectivityReport {
            finmind,
            twse: twse.map(|quotes| quotes.len()),
        })
    }

    /// Rewrite the reference list from the data providers.
    pub async fn refresh_list(&self, output: Option<&Path>) -> Result<(PathBuf, MarketCounts)> {
        let path = output.map_or_else(|| self.config.reference_list_path(), Path::to_path_buf);

        let mut stocks = self
            .fetcher
            .list_stocks()
            .await
            .context("Failed to fetch the stock list")?;
        stocks.sort_by(|a, b| a.stock_id.cmp(&b.stock_id));
        stocks.dedup_by(|a, b| a.stock_id == b.stock_id);

        let counts = MarketCounts::of(&stocks);
        universe::save_reference_list(&path, &stocks)?;
        info!(path = %path.display(), counts = %counts, "Reference list refreshed");

        Ok((path, counts))
    }

    /// Fetch one stock and evaluate every condition, enabled or not.
    pub async fn inspect(&self, stock_id: &str) -> Result<Inspection> {
        let info = self.lookup(stock_id).await;
        let snapshot = self
            .fetcher
            .fetch_snapshot(&info)
            .await
            .with_context(|| format!("Failed to fetch data for {}", stock_id))?;

        let metrics = Metrics::from_snapshot(&snapshot);
        let indicators = indicators::summarize(&snapshot.bars);
        let check = evaluate_all(&snapshot, &self.params);
        let score = ScoreCard::from_check(&check);

        Ok(Inspection {
            snapshot,
            metrics,
            indicators,
            check,
            score,
        })
    }

    async fn lookup(&self, stock_id: &str) -> StockInfo {
        let path = self.config.reference_list_path();
        let listed = if path.exists() {
            universe::load_reference_list(&path).unwrap_or_default()
        } else {
            universe::backup_list()
        };

        listed
            .into_iter()
            .find(|s| s.stock_id == stock_id)
            .unwrap_or_else(|| StockInfo::new(stock_id, stock_id, Market::Twse))
    }
}

/// Write default `config.json` and `api_config.json` into `dir` unless present.
///
/// Returns each file with whether it was written.
pub fn init_config(dir: &Path) -> Result<Vec<(PathBuf, bool)>> {
    let defaults = Config::default();
    let config_json = json!({
        "fetch": defaults.fetch,
        "output": defaults.output,
        "observability": defaults.observability,
        "screening_parameters": ScreeningParameters::default().to_value(),
    });
    let api_json = json!({
        "finmind": {
            "api_token": "your_token_here",
            "v3_url": defaults.finmind.v3_url,
            "v4_url": defaults.finmind.v4_url,
        }
    });

    let mut written = Vec::new();
    for (name, value) in [("config.json", config_json), ("api_config.json", api_json)] {
        let path = dir.join(name);
        let created = write_json_if_absent(&path, &value)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        written.push((path, created));
    }
    Ok(written)
}
