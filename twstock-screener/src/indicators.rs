//! Technical indicators over daily price series.
//!
//! Series functions return one value per input element, oldest first, with
//! `None` in warm-up positions. Point functions look at the latest bar and
//! return `None` when the series is too short.

use crate::data::DailyBar;

/// Smoothing factor of the Taiwanese KD (1/3 RSV, 2/3 previous).
const KD_ALPHA: f64 = 1.0 / 3.0;

/// Simple moving average.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }

    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        if i >= period {
            sum -= values[i - period];
        }
        out.push((i + 1 >= period).then(|| sum / period as f64));
    }
    out
}

/// Exponential moving average, alpha = 2/(span+1), seeded with the first value.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    smooth(values, alpha)
}

fn smooth(values: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    for (i, v) in values.iter().enumerate() {
        let next = if i == 0 { *v } else { alpha * v + (1.0 - alpha) * out[i - 1] };
        out.push(next);
    }
    out
}

// ============================================================================
// KD (Stochastic)
// ============================================================================

/// K and D lines.
#[derive(Debug, Clone, PartialEq)]
pub struct Kd {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

impl Kd {
    /// Latest (K, D).
    pub fn last(&self) -> Option<(f64, f64)> {
        Some((*self.k.last()?, *self.d.last()?))
    }
}

/// KD over `period` bars. The first bars use a partial window and a flat
/// range gives RSV 50.
pub fn kd(bars: &[DailyBar], period: usize) -> Kd {
    let period = period.max(1);
    let rsv: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let window = &bars[(i + 1).saturating_sub(period)..=i];
            let high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
            let low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
            let range = high - low;
            if range > 0.0 {
                (bar.close - low) / range * 100.0
            } else {
                50.0
            }
        })
        .collect();

    let k = smooth(&rsv, KD_ALPHA);
    let d = smooth(&k, KD_ALPHA);
    Kd { k, d }
}

/// `a` crossed above `b` on the last element.
pub fn crossed_above(a: &[f64], b: &[f64]) -> bool {
    match (a, b) {
        ([.., a_prev, a_now], [.., b_prev, b_now]) => a_prev <= b_prev && a_now > b_now,
        _ => false,
    }
}

/// K crossed above D outside the overbought zone (K < 80).
pub fn golden_cross(k: &[f64], d: &[f64]) -> bool {
    crossed_above(k, d) && k.last().is_some_and(|k| *k < 80.0)
}

/// K crossed below D.
pub fn death_cross(k: &[f64], d: &[f64]) -> bool {
    match (k, d) {
        ([.., k_prev, k_now], [.., d_prev, d_now]) => k_prev >= d_prev && k_now < d_now,
        _ => false,
    }
}

// ============================================================================
// Oscillators and Bands
// ============================================================================

/// RSI with simple averages of gains and losses.
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 {
        return out;
    }

    for i in period..closes.len() {
        let (gain, loss) = closes[i - period..=i]
            .windows(2)
            .map(|w| w[1] - w[0])
            .fold((0.0, 0.0), |(g, l), delta| {
                if delta > 0.0 {
                    (g + delta, l)
                } else {
                    (g, l - delta)
                }
            });

        out[i] = Some(if loss == 0.0 {
            100.0
        } else {
            let rs = gain / loss;
            100.0 - 100.0 / (1.0 + rs)
        });
    }
    out
}

/// MACD line, signal line and histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let fast = ema(closes, fast);
    let slow = ema(closes, slow);
    let line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let signal = ema(&line, signal);
    let histogram = line.iter().zip(&signal).map(|(l, s)| l - s).collect();
    Macd {
        line,
        signal,
        histogram,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bollinger {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

/// Bollinger bands using the sample standard deviation.
pub fn bollinger(closes: &[f64], period: usize, width: f64) -> Bollinger {
    let middle = sma(closes, period);
    let mut upper = vec![None; closes.len()];
    let mut lower = vec![None; closes.len()];

    if period >= 2 {
        for (i, mean) in middle.iter().enumerate() {
            let Some(mean) = mean else { continue };
            let window = &closes[i + 1 - period..=i];
            let variance =
                window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (period - 1) as f64;
            let std = variance.sqrt();
            upper[i] = Some(mean + width * std);
            lower[i] = Some(mean - width * std);
        }
    }

    Bollinger {
        upper,
        middle,
        lower,
    }
}

// ============================================================================
// Point Indicators
// ============================================================================

/// Today's volume over the mean of the previous `days` volumes.
pub fn volume_surge_ratio(volumes: &[f64], days: usize) -> Option<f64> {
    if days == 0 || volumes.len() < days + 1 {
        return None;
    }
    let today = volumes[volumes.len() - 1];
    let previous = &volumes[volumes.len() - 1 - days..volumes.len() - 1];
    let mean = previous.iter().sum::<f64>() / days as f64;
    (mean > 0.0).then(|| today / mean)
}

/// Volume ratio (量比): today over the previous five-day mean.
pub fn volume_ratio(volumes: &[f64]) -> Option<f64> {
    volume_surge_ratio(volumes, 5)
}

/// Last close above every close of the previous `days` bars.
pub fn is_new_high(closes: &[f64], days: usize) -> bool {
    if days == 0 || closes.len() < days + 1 {
        return false;
    }
    let last = closes[closes.len() - 1];
    let previous = &closes[closes.len() - 1 - days..closes.len() - 1];
    previous.iter().all(|c| last > *c)
}

/// Last close at or above 98% of its moving average.
pub fn above_ma(closes: &[f64], period: usize) -> bool {
    match (closes.last(), sma(closes, period).last()) {
        (Some(last), Some(Some(ma))) => *last >= ma * 0.98,
        _ => false,
    }
}

/// Highest high, lowest low and latest close over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupportResistance {
    pub support: f64,
    pub resistance: f64,
    pub current: f64,
}

pub fn support_resistance(bars: &[DailyBar], window: usize) -> Option<SupportResistance> {
    let current = bars.last()?.close;
    let recent = &bars[bars.len().saturating_sub(window.max(1))..];
    Some(SupportResistance {
        support: recent.iter().map(|b| b.low).fold(f64::MAX, f64::min),
        resistance: recent.iter().map(|b| b.high).fold(f64::MIN, f64::max),
        current,
    })
}

/// Percent change of the last close over the close `days` bars earlier.
pub fn change_pct(closes: &[f64], days: usize) -> Option<f64> {
    if days == 0 || closes.len() < days + 1 {
        return None;
    }
    let last = closes[closes.len() - 1];
    let base = closes[closes.len() - 1 - days];
    (base > 0.0).then(|| (last - base) / base * 100.0)
}

/// Trailing run of limit-up closes, looking back at most `max_days` bars.
///
/// A bar is limit-up when it gained at least `limit_pct - 0.1` percent and
/// closed at its high (within 0.1% of the previous close).
pub fn consecutive_limit_up_days(bars: &[DailyBar], limit_pct: f64, max_days: usize) -> usize {
    bars.windows(2)
        .rev()
        .take(max_days)
        .take_while(|w| {
            let (prev, bar) = (&w[0], &w[1]);
            prev.close > 0.0
                && (bar.close - prev.close) / prev.close * 100.0 >= limit_pct - 0.1
                && (bar.close - bar.high).abs() < prev.close * 0.001
        })
        .count()
}

// ============================================================================
// Summary
// ============================================================================

/// Latest values of the common indicators, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorSummary {
    pub rsi14: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub new_high_20d: bool,
    pub near_ma20: bool,
    pub support_resistance: Option<SupportResistance>,
}

pub fn summarize(bars: &[DailyBar]) -> IndicatorSummary {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let bands = bollinger(&closes, 20, 2.0);

    IndicatorSummary {
        rsi14: rsi(&closes, 14).last().copied().flatten(),
        macd_histogram: macd(&closes, 12, 26, 9).histogram.last().copied(),
        bollinger_upper: bands.upper.last().copied().flatten(),
        bollinger_lower: bands.lower.last().copied().flatten(),
        volume_ratio: volume_ratio(&volumes),
        new_high_20d: is_new_high(&closes, 20),
        near_ma20: above_ma(&closes, 20),
        support_resistance: support_resistance(bars, 20),
    }
}
