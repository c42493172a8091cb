//! Stock screening.
//!
//! Evaluates each stock of the universe against up to 23 conditions across
//! volume, technical, institutional, margin, fundamental and exclusion
//! groups, then scores and ranks the stocks that match enough of them.
//!
//! # Flow
//!
//! ```text
//! StockInfo ──▶ SnapshotSource ──▶ Metrics ──▶ conditions ──▶ CheckResult
//!                                                                 │ passed
//!                                                                 ▼
//!                                   ScreeningRun ◀── rank ◀── ScoreCard
//! ```

pub mod conditions;
pub mod config;
pub mod engine;
pub mod scoring;

pub use conditions::{
    evaluate, evaluate_all, CheckResult, ConditionKind, ConditionOutcome, Metrics,
};
pub use config::{LimitUpParam, Preset, ScreeningParameters, ThresholdParam};
pub use engine::{ConditionStat, EngineOptions, ScreenedStock, ScreeningEngine, ScreeningRun};
pub use scoring::{Grade, ScoreCard};
