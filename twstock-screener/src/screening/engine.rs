//! Screening engine.
//!
//! Runs every stock of the universe through fetch → evaluate → score, with
//! bounded concurrency and a stop flag checked before each stock starts.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::data::{SnapshotSource, StockInfo, StockSnapshot};

use super::conditions::{evaluate_with_metrics, CheckResult, ConditionKind, Metrics};
use super::config::ScreeningParameters;
use super::scoring::{Grade, ScoreCard};

/// Progress is logged every this many stocks.
const PROGRESS_EVERY: usize = 50;

// ============================================================================
// Screened Stock
// ============================================================================

/// A stock that passed screening.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenedStock {
    /// 1-based rank by score
    pub rank: usize,
    pub info: StockInfo,
    pub score: ScoreCard,
    pub check: CheckResult,
    pub metrics: Metrics,
}

impl ScreenedStock {
    pub fn stock_id(&self) -> &str {
        &self.info.stock_id
    }

    pub fn stock_name(&self) -> &str {
        &self.info.stock_name
    }
}

/// Pass counts of one condition over a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionStat {
    pub condition: ConditionKind,
    pub evaluated: usize,
    pub passed: usize,
}

impl ConditionStat {
    /// Pass rate in percent.
    pub fn pass_rate(&self) -> f64 {
        if self.evaluated == 0 {
            0.0
        } else {
            self.passed as f64 / self.evaluated as f64 * 100.0
        }
    }
}

// ============================================================================
// Screening Run
// ============================================================================

/// Result of a screening run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningRun {
    /// Run id (timestamp-based)
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_secs: f64,
    /// Stocks in the universe
    pub total: usize,
    /// Stocks fetched and evaluated, or errored
    pub processed: usize,
    pub passed: usize,
    /// Evaluated but below the minimum matched conditions
    pub failed: usize,
    /// Data could not be fetched
    pub errored: usize,
    /// Stopped before every stock was processed
    pub cancelled: bool,
    pub condition_stats: Vec<ConditionStat>,
    /// Passed stocks, best score first
    pub results: Vec<ScreenedStock>,
    pub parameters: ScreeningParameters,
}

impl ScreeningRun {
    /// Get the top N stocks by score.
    pub fn top(&self, n: usize) -> &[ScreenedStock] {
        &self.results[..n.min(self.results.len())]
    }

    /// Number of results per grade, best grade first.
    pub fn grade_distribution(&self) -> Vec<(Grade, usize)> {
        Grade::ALL
            .iter()
            .map(|g| (*g, self.results.iter().filter(|s| s.score.grade == *g).count()))
            .collect()
    }

    /// (average, max, min) total score of the results.
    pub fn score_stats(&self) -> Option<(f64, u32, u32)> {
        let scores: Vec<u32> = self.results.iter().map(|s| s.score.total_score).collect();
        let max = *scores.iter().max()?;
        let min = *scores.iter().min()?;
        let avg = scores.iter().sum::<u32>() as f64 / scores.len() as f64;
        Some((avg, max, min))
    }

    /// Summary string for logging.
    pub fn summary(&self) -> String {
        format!(
            "Screened {}/{} stocks in {:.1}s: {} passed ({:.1}%), {} errors{}",
            self.processed,
            self.total,
            self.duration_secs,
            self.passed,
            if self.processed > 0 {
                self.passed as f64 / self.processed as f64 * 100.0
            } else {
                0.0
            },
            self.errored,
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}

// ============================================================================
// Screening Engine
// ============================================================================

/// Run options that are not screening parameters.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Stocks processed at the same time
    pub concurrency: usize,
    /// Pause before each stock
    pub stock_delay: Duration,
    /// Results kept after sorting
    pub max_results: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            stock_delay: Duration::ZERO,
            max_results: 30,
        }
    }
}

enum StockOutcome {
    Evaluated {
        info: StockInfo,
        check: CheckResult,
        metrics: Metrics,
    },
    Errored,
    Skipped,
}

/// Screens a stock universe against the configured parameters.
pub struct ScreeningEngine<S: SnapshotSource> {
    source: Arc<S>,
    params: ScreeningParameters,
    options: EngineOptions,
}

impl<S: SnapshotSource> ScreeningEngine<S> {
    pub fn new(source: Arc<S>, params: ScreeningParameters, options: EngineOptions) -> Self {
        Self {
            source,
            params,
            options,
        }
    }

    pub fn parameters(&self) -> &ScreeningParameters {
        &self.params
    }

    /// Evaluate one snapshot with the engine's parameters.
    pub fn evaluate(&self, snapshot: &StockSnapshot) -> (CheckResult, Metrics) {
        let metrics = Metrics::from_snapshot(snapshot);
        let check = evaluate_with_metrics(snapshot, &metrics, &self.params);
        (check, metrics)
    }

    async fn process(
        &self,
        info: StockInfo,
        cancel: &AtomicBool,
        done: &AtomicUsize,
        total: usize,
    ) -> StockOutcome {
        if cancel.load(Ordering::Relaxed) {
            return StockOutcome::Skipped;
        }
        if !self.options.stock_delay.is_zero() {
            tokio::time::sleep(self.options.stock_delay).await;
        }

        let outcome = match self.source.snapshot(&info).await {
            Ok(snapshot) => {
                let (check, metrics) = self.evaluate(&snapshot);
                debug!(
                    stock_id = %info.stock_id,
                    matched = check.matched_count,
                    passed = check.passed,
                    "Evaluated stock"
                );
                StockOutcome::Evaluated {
                    info,
                    check,
                    metrics,
                }
            }
            Err(e) => {
                warn!(stock_id = %info.stock_id, error = %e, "Failed to fetch stock data");
                StockOutcome::Errored
            }
        };

        let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
        if finished % PROGRESS_EVERY == 0 || finished == total {
            info!(processed = finished, total, "Screening progress");
        }
        outcome
    }

    /// Screen the universe. One stock failing never aborts the run.
    pub async fn screen(&self, universe: Vec<StockInfo>, cancel: Arc<AtomicBool>) -> ScreeningRun {
        let started_at = Utc::now();
        let id = format!("screen_{}", started_at.format("%Y%m%d_%H%M%S"));
        let total = universe.len();
        let done = AtomicUsize::new(0);

        info!(
            run_id = %id,
            total,
            enabled = self.params.enabled_count(),
            min_conditions = self.params.min_conditions_to_pass,
            "Starting screening run"
        );

        let outcomes: Vec<StockOutcome> = stream::iter(universe)
            .map(|info| self.process(info, &cancel, &done, total))
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        let mut stats: Vec<ConditionStat> = ConditionKind::ALL
            .iter()
            .filter(|k| k.is_enabled(&self.params))
            .map(|k| ConditionStat {
                condition: *k,
                evaluated: 0,
                passed: 0,
            })
            .collect();

        let (mut processed, mut failed, mut errored) = (0, 0, 0);
        let mut results = Vec::new();

        for outcome in outcomes {
            match outcome {
                StockOutcome::Evaluated {
                    info,
                    check,
                    metrics,
                } => {
                    processed += 1;
                    for o in &check.outcomes {
                        if let Some(stat) = stats.iter_mut().find(|s| s.condition == o.condition) {
                            stat.evaluated += 1;
                            stat.passed += usize::from(o.passed);
                        }
                    }

                    if check.passed {
                        let score = ScoreCard::from_check(&check);
                        info!(
                            stock_id = %info.stock_id,
                            matched = check.matched_count,
                            score = score.total_score,
                            grade = %score.grade,
                            "Stock passed screening"
                        );
                        results.push(ScreenedStock {
                            rank: 0,
                            info,
                            score,
                            check,
                            metrics,
                        });
                    } else {
                        failed += 1;
                    }
                }
                StockOutcome::Errored => {
                    processed += 1;
                    errored += 1;
                }
                StockOutcome::Skipped => {}
            }
        }

        let passed = results.len();
        results.sort_by(|a, b| {
            b.score
                .total_score
                .cmp(&a.score.total_score)
                .then(b.check.matched_count.cmp(&a.check.matched_count))
                .then_with(|| a.info.stock_id.cmp(&b.info.stock_id))
        });
        results.truncate(self.options.max_results);
        for (i, stock) in results.iter_mut().enumerate() {
            stock.rank = i + 1;
        }

        let completed_at = Utc::now();
        let run = ScreeningRun {
            id,
            started_at,
            completed_at,
            duration_secs: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            total,
            processed,
            passed,
            failed,
            errored,
            cancelled: cancel.load(Ordering::Relaxed) && processed < total,
            condition_stats: stats,
            results,
            parameters: self.params.clone(),
        };

        info!("{}", run.summary());
        run
    }
}
