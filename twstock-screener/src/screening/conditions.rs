//! Screening conditions.
//!
//! Each enabled condition is checked against a [`StockSnapshot`] and yields
//! a pass/fail outcome plus a display string with the measured value and the
//! threshold. A condition whose input is missing fails, except the warning and
//! disposition exclusions, which treat an unknown status as not flagged.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data::{StockSnapshot, SHARES_PER_LOT};
use crate::indicators;

use super::config::ScreeningParameters;

/// Bars in the daily KD window.
const DAILY_KD_PERIOD: usize = 9;
/// Bars in the "monthly" KD window.
const MONTHLY_KD_PERIOD: usize = 20;
/// Daily price limit in percent.
const LIMIT_PCT: f64 = 10.0;
/// Price limit for stocks under disposition measures.
const DISPOSITION_LIMIT_PCT: f64 = 5.0;

// ============================================================================
// Condition Kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionKind {
    #[serde(rename = "volume_surge_1_5x")]
    VolumeSurge5d,
    #[serde(rename = "volume_surge_20d_3x")]
    VolumeSurge20d,
    #[serde(rename = "volume_surge_60d_5x")]
    VolumeSurge60d,
    #[serde(rename = "min_volume")]
    MinVolume,
    #[serde(rename = "daily_kd_golden")]
    DailyKdGolden,
    #[serde(rename = "monthly_kd_golden")]
    MonthlyKdGolden,
    #[serde(rename = "above_ma20")]
    AboveMa20,
    #[serde(rename = "break_60d_high")]
    Break60dHigh,
    #[serde(rename = "trust_buy")]
    TrustBuy,
    #[serde(rename = "trust_pct")]
    TrustPct,
    #[serde(rename = "trust_5d")]
    Trust5d,
    #[serde(rename = "trust_holding")]
    TrustHolding,
    #[serde(rename = "inst_5d")]
    Inst5d,
    #[serde(rename = "margin_ratio")]
    MarginRatio,
    #[serde(rename = "margin_5d")]
    Margin5d,
    #[serde(rename = "eps_positive")]
    EpsPositive,
    #[serde(rename = "roe_above")]
    RoeAbove,
    #[serde(rename = "yield_above")]
    YieldAbove,
    #[serde(rename = "daily_change_moderate")]
    DailyChangeModerate,
    #[serde(rename = "change_5d_moderate")]
    Change5dModerate,
    #[serde(rename = "not_warning")]
    NotWarning,
    #[serde(rename = "not_disposition")]
    NotDisposition,
    #[serde(rename = "not_limit_up")]
    NotLimitUp,
}

impl ConditionKind {
    pub const ALL: [ConditionKind; 23] = [
        Self::VolumeSurge5d,
        Self::VolumeSurge20d,
        Self::VolumeSurge60d,
        Self::MinVolume,
        Self::DailyKdGolden,
        Self::MonthlyKdGolden,
        Self::AboveMa20,
        Self::Break60dHigh,
        Self::TrustBuy,
        Self::TrustPct,
        Self::Trust5d,
        Self::TrustHolding,
        Self::Inst5d,
        Self::MarginRatio,
        Self::Margin5d,
        Self::EpsPositive,
        Self::RoeAbove,
        Self::YieldAbove,
        Self::DailyChangeModerate,
        Self::Change5dModerate,
        Self::NotWarning,
        Self::NotDisposition,
        Self::NotLimitUp,
    ];

    /// Key used in reports and statistics.
    pub fn key(&self) -> &'static str {
        match self {
            Self::VolumeSurge5d => "volume_surge_1_5x",
            Self::VolumeSurge20d => "volume_surge_20d_3x",
            Self::VolumeSurge60d => "volume_surge_60d_5x",
            Self::MinVolume => "min_volume",
            Self::DailyKdGolden => "daily_kd_golden",
            Self::MonthlyKdGolden => "monthly_kd_golden",
            Self::AboveMa20 => "above_ma20",
            Self::Break60dHigh => "break_60d_high",
            Self::TrustBuy => "trust_buy",
            Self::TrustPct => "trust_pct",
            Self::Trust5d => "trust_5d",
            Self::TrustHolding => "trust_holding",
            Self::Inst5d => "inst_5d",
            Self::MarginRatio => "margin_ratio",
            Self::Margin5d => "margin_5d",
            Self::EpsPositive => "eps_positive",
            Self::RoeAbove => "roe_above",
            Self::YieldAbove => "yield_above",
            Self::DailyChangeModerate => "daily_change_moderate",
            Self::Change5dModerate => "change_5d_moderate",
            Self::NotWarning => "not_warning",
            Self::NotDisposition => "not_disposition",
            Self::NotLimitUp => "not_limit_up",
        }
    }

    /// Localized label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::VolumeSurge5d => "5日爆量",
            Self::VolumeSurge20d => "20日爆量",
            Self::VolumeSurge60d => "60日爆量",
            Self::MinVolume => "最低成交量",
            Self::DailyKdGolden => "日KD黃金交叉",
            Self::MonthlyKdGolden => "月KD黃金交叉",
            Self::AboveMa20 => "站上MA20",
            Self::Break60dHigh => "突破60日高點",
            Self::TrustBuy => "投信買超",
            Self::TrustPct => "投信買超佔比",
            Self::Trust5d => "投信5日買超",
            Self::TrustHolding => "投信持股比例",
            Self::Inst5d => "法人5日買超",
            Self::MarginRatio => "融資使用率",
            Self::Margin5d => "融資5日增幅",
            Self::EpsPositive => "EPS",
            Self::RoeAbove => "ROE",
            Self::YieldAbove => "殖利率",
            Self::DailyChangeModerate => "日漲跌幅",
            Self::Change5dModerate => "5日漲跌幅",
            Self::NotWarning => "排除警示股",
            Self::NotDisposition => "排除處置股",
            Self::NotLimitUp => "排除連續漲停",
        }
    }

    /// Localized group name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::VolumeSurge5d | Self::VolumeSurge20d | Self::VolumeSurge60d | Self::MinVolume => {
                "成交量"
            }
            Self::DailyKdGolden | Self::MonthlyKdGolden | Self::AboveMa20 | Self::Break60dHigh => {
                "技術指標"
            }
            Self::TrustBuy | Self::TrustPct | Self::Trust5d | Self::TrustHolding | Self::Inst5d => {
                "法人籌碼"
            }
            Self::MarginRatio | Self::Margin5d => "融資融券",
            Self::EpsPositive | Self::RoeAbove | Self::YieldAbove => "基本面",
            Self::DailyChangeModerate | Self::Change5dModerate => "漲跌幅",
            Self::NotWarning | Self::NotDisposition | Self::NotLimitUp => "排除條件",
        }
    }

    /// Whether the parameters enable this condition.
    pub fn is_enabled(&self, p: &ScreeningParameters) -> bool {
        match self {
            Self::VolumeSurge5d => p.volume_surge1.enabled,
            Self::VolumeSurge20d => p.volume_surge2.enabled,
            Self::VolumeSurge60d => p.volume_surge3.enabled,
            Self::MinVolume => p.min_volume.enabled,
            Self::DailyKdGolden => p.daily_kd_golden,
            Self::MonthlyKdGolden => p.monthly_kd_golden,
            Self::AboveMa20 => p.above_ma20,
            Self::Break60dHigh => p.break_60d_high,
            Self::TrustBuy => p.trust_buy.enabled,
            Self::TrustPct => p.trust_pct.enabled,
            Self::Trust5d => p.trust_5d.enabled,
            Self::TrustHolding => p.trust_holding.enabled,
            Self::Inst5d => p.inst_5d.enabled,
            Self::MarginRatio => p.margin_ratio.enabled,
            Self::Margin5d => p.margin_5d.enabled,
            Self::EpsPositive => p.eps.enabled,
            Self::RoeAbove => p.roe.enabled,
            Self::YieldAbove => p.dividend_yield.enabled,
            Self::DailyChangeModerate => p.daily_change.enabled,
            Self::Change5dModerate => p.change_5d.enabled,
            Self::NotWarning => p.exclude_warning,
            Self::NotDisposition => p.exclude_disposition,
            Self::NotLimitUp => p.exclude_limit_up.enabled,
        }
    }

    /// Human-readable threshold, if the condition has one.
    pub fn threshold_text(&self, p: &ScreeningParameters) -> Option<String> {
        let text = match self {
            Self::VolumeSurge5d => format!("{}x", p.volume_surge1.value),
            Self::VolumeSurge20d => format!("{}x", p.volume_surge2.value),
            Self::VolumeSurge60d => format!("{}x", p.volume_surge3.value),
            Self::MinVolume => format!("{}張", p.min_volume.value),
            Self::TrustBuy => format!("{}張", p.trust_buy.value),
            Self::TrustPct => format!("{}%", p.trust_pct.value),
            Self::Trust5d => format!("{}張", p.trust_5d.value),
            Self::TrustHolding => format!("{}%", p.trust_holding.value),
            Self::Inst5d => format!("{}張", p.inst_5d.value),
            Self::MarginRatio => format!("<{}%", p.margin_ratio.value),
            Self::Margin5d => format!("<{}張", p.margin_5d.value),
            Self::EpsPositive => format!(">{}", p.eps.value),
            Self::RoeAbove => format!(">{}%", p.roe.value),
            Self::YieldAbove => format!(">{}%", p.dividend_yield.value),
            Self::DailyChangeModerate => format!("±{}%", p.daily_change.value),
            Self::Change5dModerate => format!("±{}%", p.change_5d.value),
            Self::NotLimitUp => format!("<{}天", p.exclude_limit_up.days),
            _ => return None,
        };
        Some(text)
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Values derived from a snapshot that the conditions compare.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub close: Option<f64>,
    pub high: Option<f64>,
    /// Change vs previous close (%)
    pub daily_change: Option<f64>,
    /// Change vs the close four bars earlier (%)
    pub change_5d: Option<f64>,
    pub volume_lots: Option<f64>,
    pub surge_5d: Option<f64>,
    pub surge_20d: Option<f64>,
    pub surge_60d: Option<f64>,
    pub daily_kd: Option<(f64, f64)>,
    pub daily_kd_cross: bool,
    pub monthly_kd: Option<(f64, f64)>,
    pub monthly_kd_cross: bool,
    pub ma20: Option<f64>,
    pub high_60d: Option<f64>,
    pub trust_net_lots: Option<f64>,
    pub foreign_net_lots: Option<f64>,
    pub trust_5d_lots: Option<f64>,
    pub inst_5d_lots: Option<f64>,
    /// Latest trust net buy as % of the day's volume
    pub trust_pct: Option<f64>,
    /// Trust net buy over the flow window as % of shares issued
    pub trust_holding_pct: Option<f64>,
    pub margin_balance: Option<f64>,
    pub margin_usage: Option<f64>,
    pub margin_5d_change: Option<f64>,
    pub eps: Option<f64>,
    pub roe: Option<f64>,
    pub dividend_yield: Option<f64>,
}

impl Metrics {
    pub fn from_snapshot(s: &StockSnapshot) -> Self {
        let closes = s.closes();
        let volumes: Vec<f64> = s.bars.iter().map(|b| b.volume_lots()).collect();
        let latest = s.latest_bar();

        let (daily_kd, daily_kd_cross) = kd_state(s, DAILY_KD_PERIOD);
        let (monthly_kd, monthly_kd_cross) = kd_state(s, MONTHLY_KD_PERIOD);

        let ma20 = if closes.len() >= 20 {
            indicators::sma(&closes, 20).last().copied().flatten()
        } else {
            None
        };
        let high_60d = (s.bars.len() >= 60).then(|| {
            s.bars[s.bars.len() - 60..]
                .iter()
                .map(|b| b.high)
                .fold(f64::MIN, f64::max)
        });

        let recent_flows = (s.institutional.len() >= 5)
            .then(|| &s.institutional[s.institutional.len() - 5..]);
        let trust_5d_lots =
            recent_flows.map(|f| f.iter().map(|d| d.trust_net()).sum::<f64>() / SHARES_PER_LOT);
        let inst_5d_lots =
            recent_flows.map(|f| f.iter().map(|d| d.total_net()).sum::<f64>() / SHARES_PER_LOT);

        let trust_pct = match (s.latest_flow(), latest) {
            (Some(flow), Some(bar)) if bar.volume > 0.0 => {
                Some(flow.trust_net() * 100.0 / bar.volume)
            }
            _ => None,
        };
        let trust_holding_pct = match s.shares_issued {
            Some(shares) if shares > 0.0 && !s.institutional.is_empty() => {
                let accumulated: f64 = s.institutional.iter().map(|f| f.trust_net()).sum();
                Some(accumulated * 100.0 / shares)
            }
            _ => None,
        };

        let margin_5d_change = (s.margin.len() >= 5).then(|| {
            let n = s.margin.len();
            s.margin[n - 1].margin_balance - s.margin[n - 5].margin_balance
        });

        Self {
            close: latest.map(|b| b.close),
            high: latest.map(|b| b.high),
            daily_change: indicators::change_pct(&closes, 1),
            change_5d: indicators::change_pct(&closes, 4),
            volume_lots: latest.map(|b| b.volume_lots()),
            surge_5d: indicators::volume_surge_ratio(&volumes, 5),
            surge_20d: indicators::volume_surge_ratio(&volumes, 20),
            surge_60d: indicators::volume_surge_ratio(&volumes, 60),
            daily_kd,
            daily_kd_cross,
            monthly_kd,
            monthly_kd_cross,
            ma20,
            high_60d,
            trust_net_lots: s.trust_net_lots(),
            foreign_net_lots: s.foreign_net_lots(),
            trust_5d_lots,
            inst_5d_lots,
            trust_pct,
            trust_holding_pct,
            margin_balance: s.margin.last().map(|m| m.margin_balance),
            margin_usage: s.margin.last().and_then(|m| m.usage_pct()),
            margin_5d_change,
            eps: s.eps,
            roe: s.roe,
            dividend_yield: s.valuation.as_ref().and_then(|v| v.dividend_yield),
        }
    }
}

/// Latest (K, D) and whether K crossed above D, if there are enough bars.
fn kd_state(s: &StockSnapshot, period: usize) -> (Option<(f64, f64)>, bool) {
    if s.bars.len() < period.max(2) {
        return (None, false);
    }
    let kd = indicators::kd(&s.bars, period);
    (kd.last(), indicators::crossed_above(&kd.k, &kd.d))
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of one condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionOutcome {
    pub condition: ConditionKind,
    pub passed: bool,
    pub display: String,
}

/// Outcomes of all evaluated conditions for one stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub outcomes: Vec<ConditionOutcome>,
    pub matched_count: usize,
    pub passed: bool,
}

impl CheckResult {
    pub fn new(outcomes: Vec<ConditionOutcome>, min_conditions: usize) -> Self {
        let matched_count = outcomes.iter().filter(|o| o.passed).count();
        Self {
            outcomes,
            matched_count,
            passed: matched_count >= min_conditions,
        }
    }

    /// Whether the condition was evaluated and passed.
    pub fn is_matched(&self, kind: ConditionKind) -> bool {
        self.outcome(kind).is_some_and(|o| o.passed)
    }

    pub fn outcome(&self, kind: ConditionKind) -> Option<&ConditionOutcome> {
        self.outcomes.iter().find(|o| o.condition == kind)
    }

    pub fn matched(&self) -> impl Iterator<Item = ConditionKind> + '_ {
        self.outcomes.iter().filter(|o| o.passed).map(|o| o.condition)
    }
}

fn num(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", decimals, v),
        None => "N/A".to_string(),
    }
}

fn at_least(value: Option<f64>, threshold: f64) -> bool {
    value.is_some_and(|v| v >= threshold)
}

fn above(value: Option<f64>, threshold: f64) -> bool {
    value.is_some_and(|v| v > threshold)
}

fn below(value: Option<f64>, threshold: f64) -> bool {
    value.is_some_and(|v| v < threshold)
}

fn within(value: Option<f64>, threshold: f64) -> bool {
    value.is_some_and(|v| v.abs() <= threshold)
}

fn kd_text(prefix: &str, kd: Option<(f64, f64)>) -> String {
    match kd {
        Some((k, d)) => format!("{p}K={:.1}, {p}D={:.1}", k, d, p = prefix),
        None => format!("{p}K=N/A, {p}D=N/A", p = prefix),
    }
}

/// Check one condition.
pub fn check(
    kind: ConditionKind,
    s: &StockSnapshot,
    m: &Metrics,
    p: &ScreeningParameters,
) -> ConditionOutcome {
    use ConditionKind::*;

    let (passed, display) = match kind {
        VolumeSurge5d => (
            at_least(m.surge_5d, p.volume_surge1.value),
            format!("爆量倍數: {}x (門檻: {}x)", num(m.surge_5d, 2), p.volume_surge1.value),
        ),
        VolumeSurge20d => (
            at_least(m.surge_20d, p.volume_surge2.value),
            format!("20日爆量: {}x (門檻: {}x)", num(m.surge_20d, 2), p.volume_surge2.value),
        ),
        VolumeSurge60d => (
            at_least(m.surge_60d, p.volume_surge3.value),
            format!("60日爆量: {}x (門檻: {}x)", num(m.surge_60d, 2), p.volume_surge3.value),
        ),
        MinVolume => (
            at_least(m.volume_lots, p.min_volume.value),
            format!("成交量: {}張 (門檻: {}張)", num(m.volume_lots, 0), p.min_volume.value),
        ),
        DailyKdGolden => (m.daily_kd_cross, kd_text("", m.daily_kd)),
        MonthlyKdGolden => (m.monthly_kd_cross, kd_text("月", m.monthly_kd)),
        AboveMa20 => (
            matches!((m.close, m.ma20), (Some(c), Some(ma)) if c > ma),
            format!("價格: {}, MA20: {}", num(m.close, 1), num(m.ma20, 1)),
        ),
        Break60dHigh => (
            matches!((m.close, m.high_60d), (Some(c), Some(h)) if c >= h),
            format!("價格: {}, 60日高: {}", num(m.close, 1), num(m.high_60d, 1)),
        ),
        TrustBuy => (
            at_least(m.trust_net_lots, p.trust_buy.value),
            format!("投信買超: {}張 (門檻: {}張)", num(m.trust_net_lots, 0), p.trust_buy.value),
        ),
        TrustPct => (
            at_least(m.trust_pct, p.trust_pct.value),
            format!("投信買超佔比: {}% (門檻: {}%)", num(m.trust_pct, 2), p.trust_pct.value),
        ),
        Trust5d => (
            at_least(m.trust_5d_lots, p.trust_5d.value),
            format!("投信5日買超: {}張 (門檻: {}張)", num(m.trust_5d_lots, 0), p.trust_5d.value),
        ),
        TrustHolding => (
            at_least(m.trust_holding_pct, p.trust_holding.value),
            format!(
                "投信持股: {}% (門檻: {}%)",
                num(m.trust_holding_pct, 2),
                p.trust_holding.value
            ),
        ),
        Inst5d => (
            at_least(m.inst_5d_lots, p.inst_5d.value),
            format!("法人5日買超: {}張 (門檻: {}張)", num(m.inst_5d_lots, 0), p.inst_5d.value),
        ),
        MarginRatio => (
            below(m.margin_usage, p.margin_ratio.value),
            format!("融資使用率: {}% (門檻: <{}%)", num(m.margin_usage, 2), p.margin_ratio.value),
        ),
        Margin5d => (
            below(m.margin_5d_change, p.margin_5d.value),
            format!(
                "融資5日增減: {}張 (門檻: <{}張)",
                num(m.margin_5d_change, 0),
                p.margin_5d.value
            ),
        ),
        EpsPositive => (
            above(m.eps, p.eps.value),
            format!("EPS: {} (門檻: >{})", num(m.eps, 2), p.eps.value),
        ),
        RoeAbove => (
            above(m.roe, p.roe.value),
            format!("ROE: {}% (門檻: >{}%)", num(m.roe, 2), p.roe.value),
        ),
        YieldAbove => (
            above(m.dividend_yield, p.dividend_yield.value),
            format!(
                "殖利率: {}% (門檻: >{}%)",
                num(m.dividend_yield, 2),
                p.dividend_yield.value
            ),
        ),
        DailyChangeModerate => (
            within(m.daily_change, p.daily_change.value),
            format!("日漲跌: {}% (門檻: ±{}%)", num(m.daily_change, 2), p.daily_change.value),
        ),
        Change5dModerate => (
            within(m.change_5d, p.change_5d.value),
            format!("5日漲跌: {}% (門檻: ±{}%)", num(m.change_5d, 2), p.change_5d.value),
        ),
        NotWarning => {
            let passed = s.is_warning != Some(true);
            (passed, if passed { "非警示股" } else { "警示股" }.to_string())
        }
        NotDisposition => {
            let passed = s.is_disposition != Some(true);
            (passed, if passed { "非處置股" } else { "處置股" }.to_string())
        }
        NotLimitUp => {
            let days = p.exclude_limit_up.days;
            let limit = if s.is_disposition == Some(true) {
                DISPOSITION_LIMIT_PCT
            } else {
                LIMIT_PCT
            };
            let run = indicators::consecutive_limit_up_days(&s.bars, limit, days);
            (run < days, format!("連續漲停: {}天 (門檻: <{}天)", run, days))
        }
    };

    ConditionOutcome {
        condition: kind,
        passed,
        display,
    }
}

/// Evaluate every enabled condition.
pub fn evaluate(s: &StockSnapshot, p: &ScreeningParameters) -> CheckResult {
    evaluate_with_metrics(s, &Metrics::from_snapshot(s), p)
}

pub fn evaluate_with_metrics(
    s: &StockSnapshot,
    m: &Metrics,
    p: &ScreeningParameters,
) -> CheckResult {
    let outcomes = ConditionKind::ALL
        .iter()
        .filter(|kind| kind.is_enabled(p))
        .map(|kind| check(*kind, s, m, p))
        .collect();
    CheckResult::new(outcomes, p.min_conditions_to_pass)
}

/// Evaluate all conditions regardless of which are enabled.
pub fn evaluate_all(s: &StockSnapshot, p: &ScreeningParameters) -> CheckResult {
    let m = Metrics::from_snapshot(s);
    let outcomes = ConditionKind::ALL.iter().map(|kind| check(*kind, s, &m, p)).collect();
    CheckResult::new(outcomes, p.min_conditions_to_pass)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DailyBar, InstitutionalFlow, Market, MarginRecord, StockInfo};
    use crate::screening::config::ThresholdParam;
    use chrono::{Duration, NaiveDate};

    fn day(i: usize) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(i as i64)
    }

    /// 61 flat bars at 100 with 1000 lots, then a last bar set by the caller.
    fn snapshot_with_last(close: f64, high: f64, lots: f64) -> StockSnapshot {
        let mut bars: Vec<DailyBar> = (0..61)
            .map(|i| DailyBar {
                date: day(i),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 1_000_000.0,
                amount: 0.0,
            })
            .collect();
        bars.push(DailyBar {
            date: day(61),
            open: 100.0,
            high,
            low: 99.0,
            close,
            volume: lots * SHARES_PER_LOT,
            amount: 0.0,
        });
        StockSnapshot::new(StockInfo::new("2330", "台積電", Market::Twse), bars)
    }

    fn only(kinds: &[ConditionKind]) -> ScreeningParameters {
        let mut p = ScreeningParameters {
            volume_surge1: ThresholdParam::off(1.5),
            min_volume: ThresholdParam::off(1000.0),
            min_conditions_to_pass: 1,
            ..Default::default()
        };
        for kind in kinds {
            match kind {
                ConditionKind::VolumeSurge5d => p.volume_surge1.enabled = true,
                ConditionKind::VolumeSurge60d => p.volume_surge3.enabled = true,
                ConditionKind::MinVolume => p.min_volume.enabled = true,
                ConditionKind::Break60dHigh => p.break_60d_high = true,
                ConditionKind::AboveMa20 => p.above_ma20 = true,
                ConditionKind::Trust5d => p.trust_5d.enabled = true,
                ConditionKind::Margin5d => p.margin_5d.enabled = true,
                ConditionKind::EpsPositive => p.eps.enabled = true,
                ConditionKind::NotWarning => p.exclude_warning = true,
                ConditionKind::NotLimitUp => p.exclude_limit_up.enabled = true,
                ConditionKind::DailyKdGolden => p.daily_kd_golden = true,
                ConditionKind::MonthlyKdGolden => p.monthly_kd_golden = true,
                ConditionKind::TrustHolding => p.trust_holding.enabled = true,
                ConditionKind::DailyChangeModerate => p.daily_change.enabled = true,
                ConditionKind::Change5dModerate => p.change_5d.enabled = true,
                other => panic!("not used in tests: {other}"),
            }
        }
        p
    }

    /// 30 flat bars, a 10-bar slide of 2 per day, then optionally a rebound.
    fn slide_then_rebound(rebound: bool) -> StockSnapshot {
        let mut bars: Vec<DailyBar> = (0..30)
            .map(|i| DailyBar {
                date: day(i),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 1_000_000.0,
                amount: 0.0,
            })
            .collect();
        let mut close = 100.0;
        for i in 30..40 {
            close -= 2.0;
            bars.push(DailyBar {
                date: day(i),
                open: close + 1.0,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000_000.0,
                amount: 0.0,
            });
        }
        if rebound {
            bars.push(DailyBar {
                date: day(40),
                open: close,
                high: close + 6.0,
                low: close - 1.0,
                close: close + 6.0,
                volume: 1_000_000.0,
                amount: 0.0,
            });
        }
        StockSnapshot::new(StockInfo::new("2330", "台積電", Market::Twse), bars)
    }

    #[test]
    fn test_all_keys_unique() {
        let keys: std::collections::HashSet<_> =
            ConditionKind::ALL.iter().map(|k| k.key()).collect();
        assert_eq!(keys.len(), 23);
        assert_eq!(
            serde_json::to_string(&ConditionKind::VolumeSurge5d).unwrap(),
            "\"volume_surge_1_5x\""
        );
    }

    #[test]
    fn test_only_enabled_conditions_count() {
        let s = snapshot_with_last(105.0, 105.0, 3000.0);
        let result = evaluate(&s, &only(&[ConditionKind::VolumeSurge5d]));
        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.matched_count, 1);
        assert!(result.passed);
        assert_eq!(
            result.outcomes[0].display,
            "爆量倍數: 3.00x (門檻: 1.5x)"
        );
    }

    #[test]
    fn test_pass_requires_min_conditions() {
        let s = snapshot_with_last(105.0, 105.0, 500.0);
        let mut p = only(&[
            ConditionKind::VolumeSurge5d,
            ConditionKind::MinVolume,
            ConditionKind::Break60dHigh,
        ]);
        p.min_conditions_to_pass = 2;

        let result = evaluate(&s, &p);
        // 500 lots: neither a surge nor the minimum volume.
        assert!(!result.is_matched(ConditionKind::VolumeSurge5d));
        assert!(!result.is_matched(ConditionKind::MinVolume));
        assert!(result.is_matched(ConditionKind::Break60dHigh));
        assert_eq!(result.matched_count, 1);
        assert!(!result.passed);
        assert_eq!(
            result.outcome(ConditionKind::MinVolume).unwrap().display,
            "成交量: 500張 (門檻: 1000張)"
        );
    }

    #[test]
    fn test_missing_data_fails_condition() {
        let s = snapshot_with_last(105.0, 105.0, 3000.0);
        let result = evaluate(
            &s,
            &only(&[ConditionKind::Trust5d, ConditionKind::EpsPositive, ConditionKind::Margin5d]),
        );
        assert_eq!(result.matched_count, 0);
        assert_eq!(
            result.outcome(ConditionKind::EpsPositive).unwrap().display,
            "EPS: N/A (門檻: >2)"
        );
    }

    #[test]
    fn test_unknown_warning_status_passes() {
        let mut s = snapshot_with_last(100.0, 101.0, 1000.0);
        let p = only(&[ConditionKind::NotWarning]);
        assert!(evaluate(&s, &p).passed);

        s.is_warning = Some(true);
        let result = evaluate(&s, &p);
        assert!(!result.passed);
        assert_eq!(result.outcomes[0].display, "警示股");
    }

    #[test]
    fn test_flows_and_margin() {
        let mut s = snapshot_with_last(100.0, 101.0, 1000.0);
        s.institutional = (55..62)
            .map(|i| {
                let mut flow = InstitutionalFlow::new(day(i));
                flow.add("Investment_Trust", 300_000.0, 0.0);
                flow.add("Foreign_Investor", 0.0, 100_000.0);
                flow
            })
            .collect();
        s.margin = (57..62)
            .map(|i| MarginRecord {
                date: day(i),
                margin_balance: 1000.0 + i as f64,
                margin_limit: 50_000.0,
                short_balance: 0.0,
            })
            .collect();

        let m = Metrics::from_snapshot(&s);
        assert_eq!(m.trust_5d_lots, Some(1500.0));
        assert_eq!(m.inst_5d_lots, Some(1000.0));
        assert_eq!(m.trust_pct, Some(30.0));
        assert_eq!(m.margin_5d_change, Some(4.0));

        let result = evaluate(&s, &only(&[ConditionKind::Trust5d, ConditionKind::Margin5d]));
        assert_eq!(result.matched_count, 2);
    }

    #[test]
    fn test_limit_up_run_excluded() {
        let mut s = snapshot_with_last(100.0, 101.0, 1000.0);
        let mut close = 100.0;
        for i in 0..3 {
            close *= 1.1;
            s.bars.push(DailyBar {
                date: day(62 + i),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000_000.0,
                amount: 0.0,
            });
        }
        let result = evaluate(&s, &only(&[ConditionKind::NotLimitUp]));
        assert!(!result.passed);
        assert_eq!(result.outcomes[0].display, "連續漲停: 3天 (門檻: <3天)");
    }

    #[test]
    fn test_evaluate_all_ignores_enabled_flags() {
        let s = snapshot_with_last(100.0, 101.0, 1000.0);
        let result = evaluate_all(&s, &ScreeningParameters::default());
        assert_eq!(result.outcomes.len(), 23);
        let defaults = ScreeningParameters::default();
        assert!(ConditionKind::NotLimitUp.threshold_text(&defaults).is_some());
        assert!(ConditionKind::DailyKdGolden.threshold_text(&defaults).is_none());
    }

    #[test]
    fn test_kd_golden_cross_on_rebound() {
        let p = only(&[ConditionKind::DailyKdGolden, ConditionKind::MonthlyKdGolden]);

        let result = evaluate(&slide_then_rebound(true), &p);
        assert!(result.is_matched(ConditionKind::DailyKdGolden));
        assert!(result.is_matched(ConditionKind::MonthlyKdGolden));
        assert!(result
            .outcome(ConditionKind::MonthlyKdGolden)
            .unwrap()
            .display
            .starts_with("月K="));

        let result = evaluate(&slide_then_rebound(false), &p);
        assert_eq!(result.matched_count, 0);
    }

    #[test]
    fn test_trust_holding_from_shares_issued() {
        let mut s = snapshot_with_last(100.0, 101.0, 1000.0);
        s.institutional = (52..62)
            .map(|i| {
                let mut flow = InstitutionalFlow::new(day(i));
                flow.add("Investment_Trust", 20_000_000.0, 0.0);
                flow
            })
            .collect();
        let p = only(&[ConditionKind::TrustHolding]);

        // No share count, no holding estimate.
        assert!(!evaluate(&s, &p).passed);

        s.shares_issued = Some(1_000_000_000.0);
        let result = evaluate(&s, &p);
        assert!(result.passed);
        assert_eq!(result.outcomes[0].display, "投信持股: 20.00% (門檻: 15%)");
    }

    #[test]
    fn test_moderate_price_changes() {
        let p = only(&[ConditionKind::DailyChangeModerate, ConditionKind::Change5dModerate]);

        let result = evaluate(&snapshot_with_last(103.0, 103.0, 1000.0), &p);
        assert_eq!(result.matched_count, 2);
        assert_eq!(
            result.outcome(ConditionKind::DailyChangeModerate).unwrap().display,
            "日漲跌: 3.00% (門檻: ±7%)"
        );

        // An 8% day is too hot for the daily cap but fine over five days.
        let result = evaluate(&snapshot_with_last(108.0, 108.0, 1000.0), &p);
        assert!(!result.is_matched(ConditionKind::DailyChangeModerate));
        assert!(result.is_matched(ConditionKind::Change5dModerate));

        // Drops count by magnitude.
        let result = evaluate(&snapshot_with_last(75.0, 101.0, 1000.0), &p);
        assert_eq!(result.matched_count, 0);
    }
}
