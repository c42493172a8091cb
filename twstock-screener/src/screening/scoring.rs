//! Potential score of a stock that passed screening.
//!
//! Matched conditions add fixed weights, some combinations add a bonus, and
//! the total is capped at 100.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::conditions::{CheckResult, ConditionKind};

/// Maximum total score.
pub const MAX_SCORE: u32 = 100;

const PERFECT_VOLUME_BONUS: u32 = 10;
const TECH_FUNDAMENTAL_BONUS: u32 = 15;
const INSTITUTIONAL_BONUS: u32 = 10;

const TECH_CONDITIONS: [ConditionKind; 3] = [
    ConditionKind::DailyKdGolden,
    ConditionKind::AboveMa20,
    ConditionKind::Break60dHigh,
];

const FUNDAMENTAL_CONDITIONS: [ConditionKind; 3] = [
    ConditionKind::EpsPositive,
    ConditionKind::RoeAbove,
    ConditionKind::YieldAbove,
];

const INSTITUTIONAL_CONDITIONS: [ConditionKind; 3] = [
    ConditionKind::TrustBuy,
    ConditionKind::Trust5d,
    ConditionKind::Inst5d,
];

/// Points a matched condition adds.
pub fn weight(kind: ConditionKind) -> u32 {
    use ConditionKind::*;

    match kind {
        // Volume
        VolumeSurge60d => 20,
        VolumeSurge20d => 10,
        VolumeSurge5d => 5,
        MinVolume => 3,
        // Technical
        DailyKdGolden => 10,
        MonthlyKdGolden => 8,
        AboveMa20 => 5,
        Break60dHigh => 15,
        // Institutional
        TrustBuy => 10,
        TrustPct => 5,
        Trust5d => 10,
        Inst5d => 5,
        TrustHolding => 0,
        // Fundamentals
        EpsPositive => 5,
        RoeAbove => 5,
        YieldAbove => 5,
        // Others
        DailyChangeModerate => 3,
        Change5dModerate => 3,
        MarginRatio => 2,
        Margin5d => 2,
        NotWarning => 2,
        NotDisposition => 2,
        NotLimitUp => 3,
    }
}

// ============================================================================
// Grade
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "B+")]
    BPlus,
    B,
    C,
}

impl Grade {
    pub const ALL: [Grade; 5] = [Self::APlus, Self::A, Self::BPlus, Self::B, Self::C];

    pub fn from_score(score: u32) -> Self {
        match score {
            90.. => Self::APlus,
            80..=89 => Self::A,
            70..=79 => Self::BPlus,
            60..=69 => Self::B,
            _ => Self::C,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::APlus => "A+",
            Self::A => "A",
            Self::BPlus => "B+",
            Self::B => "B",
            Self::C => "C",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Score Card
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub total_score: u32,
    pub base_score: u32,
    pub combo_score: u32,
    pub grade: Grade,
    pub key_signal: String,
    pub matched_conditions: Vec<ConditionKind>,
}

impl ScoreCard {
    pub fn from_check(check: &CheckResult) -> Self {
        let matched: Vec<ConditionKind> = check.matched().collect();
        let base_score: u32 = matched.iter().map(|k| weight(*k)).sum();
        let combo_score = combo_bonus(&matched);
        let total_score = (base_score + combo_score).min(MAX_SCORE);

        Self {
            total_score,
            base_score,
            combo_score,
            grade: Grade::from_score(total_score),
            key_signal: key_signal(&matched),
            matched_conditions: matched,
        }
    }
}

fn count_of(matched: &[ConditionKind], group: &[ConditionKind]) -> usize {
    group.iter().filter(|k| matched.contains(k)).count()
}

/// Bonus for strong combinations of matched conditions.
pub fn combo_bonus(matched: &[ConditionKind]) -> u32 {
    let mut bonus = 0;

    let surges = [
        ConditionKind::VolumeSurge5d,
        ConditionKind::VolumeSurge20d,
        ConditionKind::VolumeSurge60d,
    ];
    if count_of(matched, &surges) == surges.len() {
        bonus += PERFECT_VOLUME_BONUS;
    }

    if count_of(matched, &TECH_CONDITIONS) >= 2 && count_of(matched, &FUNDAMENTAL_CONDITIONS) >= 2 {
        bonus += TECH_FUNDAMENTAL_BONUS;
    }

    if count_of(matched, &INSTITUTIONAL_CONDITIONS) >= 2 {
        bonus += INSTITUTIONAL_BONUS;
    }

    bonus
}

/// Up to three headline signals, strongest volume surge first.
pub fn key_signal(matched: &[ConditionKind]) -> String {
    use ConditionKind::*;

    let has = |kind: ConditionKind| matched.contains(&kind);
    let mut signals = Vec::new();

    if has(VolumeSurge60d) {
        signals.push("極度爆量");
    } else if has(VolumeSurge20d) {
        signals.push("中度爆量");
    } else if has(VolumeSurge5d) {
        signals.push("爆量");
    }
    if has(DailyKdGolden) {
        signals.push("KD黃金交叉");
    }
    if has(Break60dHigh) {
        signals.push("突破新高");
    }
    if has(TrustBuy) {
        signals.push("投信買超");
    }
    if has(Trust5d) {
        signals.push("投信連買");
    }
    if has(EpsPositive) && has(RoeAbove) {
        signals.push("基本面優良");
    }

    if signals.is_empty() {
        "觀察中".to_string()
    } else {
        signals.truncate(3);
        signals.join(" + ")
    }
}
