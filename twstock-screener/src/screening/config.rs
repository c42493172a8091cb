//! Screening parameters.
//!
//! Stored as the `screening_parameters` object of `config.json`. Every field
//! has a default, so a partial object (or none at all) is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use twstock_common::config::Config;

// ============================================================================
// Parameter Shapes
// ============================================================================

/// A condition with a numeric threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdParam {
    #[serde(default)]
    pub enabled: bool,
    pub value: f64,
}

impl ThresholdParam {
    pub const fn on(value: f64) -> Self {
        Self { enabled: true, value }
    }

    pub const fn off(value: f64) -> Self {
        Self { enabled: false, value }
    }
}

/// Exclusion of stocks with a run of limit-up days.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitUpParam {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_limit_up_days")]
    pub days: usize,
}

impl Default for LimitUpParam {
    fn default() -> Self {
        Self {
            enabled: false,
            days: default_limit_up_days(),
        }
    }
}

fn default_limit_up_days() -> usize {
    3
}

// ============================================================================
// Screening Parameters
// ============================================================================

/// All screening conditions and their thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningParameters {
    /// Minimum number of matched conditions for a stock to pass
    #[serde(default = "default_min_conditions")]
    pub min_conditions_to_pass: usize,

    // === Universe ===
    #[serde(default = "default_true")]
    pub market_twse: bool,
    #[serde(default = "default_true")]
    pub market_otc: bool,
    #[serde(default)]
    pub market_emerging: bool,

    // === Volume ===
    /// Today vs 5-day mean volume
    #[serde(default = "default_volume_surge1")]
    pub volume_surge1: ThresholdParam,
    /// Today vs 20-day mean volume
    #[serde(default = "default_volume_surge2")]
    pub volume_surge2: ThresholdParam,
    /// Today vs 60-day mean volume
    #[serde(default = "default_volume_surge3")]
    pub volume_surge3: ThresholdParam,
    /// Minimum daily volume in lots
    #[serde(default = "default_min_volume")]
    pub min_volume: ThresholdParam,

    // === Technical ===
    #[serde(default)]
    pub daily_kd_golden: bool,
    #[serde(default)]
    pub monthly_kd_golden: bool,
    #[serde(default)]
    pub above_ma20: bool,
    #[serde(default)]
    pub break_60d_high: bool,

    // === Institutional ===
    /// Latest-day trust net buy in lots
    #[serde(default = "default_trust_buy")]
    pub trust_buy: ThresholdParam,
    /// Latest-day trust net buy as % of the day's volume
    #[serde(default = "default_trust_pct")]
    pub trust_pct: ThresholdParam,
    /// Five-day trust net buy in lots
    #[serde(default = "default_trust_5d")]
    pub trust_5d: ThresholdParam,
    /// Estimated trust holding as % of shares issued
    #[serde(default = "default_trust_holding")]
    pub trust_holding: ThresholdParam,
    /// Five-day net buy of all institutions in lots
    #[serde(default = "default_inst_5d")]
    pub inst_5d: ThresholdParam,

    // === Margin ===
    /// Margin usage % (pass when below)
    #[serde(default = "default_margin_ratio")]
    pub margin_ratio: ThresholdParam,
    /// Five-day margin balance increase in lots (pass when below)
    #[serde(default = "default_margin_5d")]
    pub margin_5d: ThresholdParam,

    // === Fundamentals ===
    #[serde(default = "default_eps")]
    pub eps: ThresholdParam,
    #[serde(default = "default_roe")]
    pub roe: ThresholdParam,
    #[serde(default = "default_yield", rename = "yield")]
    pub dividend_yield: ThresholdParam,

    // === Price change ===
    #[serde(default = "default_daily_change")]
    pub daily_change: ThresholdParam,
    #[serde(default = "default_change_5d")]
    pub change_5d: ThresholdParam,

    // === Exclusions ===
    #[serde(default)]
    pub exclude_warning: bool,
    #[serde(default)]
    pub exclude_disposition: bool,
    #[serde(default)]
    pub exclude_limit_up: LimitUpParam,
}

impl Default for ScreeningParameters {
    fn default() -> Self {
        Self {
            min_conditions_to_pass: default_min_conditions(),
            market_twse: true,
            market_otc: true,
            market_emerging: false,
            volume_surge1: default_volume_surge1(),
            volume_surge2: default_volume_surge2(),
            volume_surge3: default_volume_surge3(),
            min_volume: default_min_volume(),
            daily_kd_golden: false,
            monthly_kd_golden: false,
            above_ma20: false,
            break_60d_high: false,
            trust_buy: default_trust_buy(),
            trust_pct: default_trust_pct(),
            trust_5d: default_trust_5d(),
            trust_holding: default_trust_holding(),
            inst_5d: default_inst_5d(),
            margin_ratio: default_margin_ratio(),
            margin_5d: default_margin_5d(),
            eps: default_eps(),
            roe: default_roe(),
            dividend_yield: default_yield(),
            daily_change: default_daily_change(),
            change_5d: default_change_5d(),
            exclude_warning: false,
            exclude_disposition: false,
            exclude_limit_up: LimitUpParam::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_min_conditions() -> usize {
    5
}

fn default_volume_surge1() -> ThresholdParam {
    ThresholdParam::on(1.5)
}

fn default_volume_surge2() -> ThresholdParam {
    ThresholdParam::off(3.0)
}

fn default_volume_surge3() -> ThresholdParam {
    ThresholdParam::off(5.0)
}

fn default_min_volume() -> ThresholdParam {
    ThresholdParam::on(1000.0)
}

fn default_trust_buy() -> ThresholdParam {
    ThresholdParam::off(500.0)
}

fn default_trust_pct() -> ThresholdParam {
    ThresholdParam::off(3.0)
}

fn default_trust_5d() -> ThresholdParam {
    ThresholdParam::off(1000.0)
}

fn default_trust_holding() -> ThresholdParam {
    ThresholdParam::off(15.0)
}

fn default_inst_5d() -> ThresholdParam {
    ThresholdParam::off(100.0)
}

fn default_margin_ratio() -> ThresholdParam {
    ThresholdParam::off(5.0)
}

fn default_margin_5d() -> ThresholdParam {
    ThresholdParam::off(10.0)
}

fn default_eps() -> ThresholdParam {
    ThresholdParam::off(2.0)
}

fn default_roe() -> ThresholdParam {
    ThresholdParam::off(10.0)
}

fn default_yield() -> ThresholdParam {
    ThresholdParam::off(3.0)
}

fn default_daily_change() -> ThresholdParam {
    ThresholdParam::off(7.0)
}

fn default_change_5d() -> ThresholdParam {
    ThresholdParam::off(20.0)
}

// ============================================================================
// Presets
// ============================================================================

/// Named adjustments applied on top of the loaded parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// 寬鬆: 3 conditions, lower volume thresholds
    Loose,
    /// 標準: 5 conditions with KD, MA20 and trust buying
    Standard,
    /// 嚴格: 10 conditions, every surge, technical and fundamental check
    Strict,
    /// Every condition off
    None,
}

impl Preset {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Loose => "寬鬆模式",
            Self::Standard => "標準模式",
            Self::Strict => "嚴格模式",
            Self::None => "關閉所有條件",
        }
    }
}

impl std::str::FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "loose" => Ok(Self::Loose),
            "standard" => Ok(Self::Standard),
            "strict" => Ok(Self::Strict),
            "none" => Ok(Self::None),
            _ => Err(format!(
                "Unknown preset: {} (expected loose, standard, strict or none)",
                s
            )),
        }
    }
}

impl ScreeningParameters {
    /// Apply a preset. Settings the preset does not mention keep their value.
    pub fn apply_preset(&mut self, preset: Preset) {
        match preset {
            Preset::Loose => {
                self.min_conditions_to_pass = 3;
                self.volume_surge1 = ThresholdParam::on(0.8);
                self.min_volume = ThresholdParam::on(500.0);
                self.daily_kd_golden = false;
                self.monthly_kd_golden = false;
                self.above_ma20 = false;
                self.break_60d_high = false;
                self.trust_buy.enabled = false;
                self.eps.enabled = false;
                self.roe.enabled = false;
                self.dividend_yield.enabled = false;
            }
            Preset::Standard => {
                self.min_conditions_to_pass = 5;
                self.volume_surge1 = ThresholdParam::on(1.0);
                self.min_volume = ThresholdParam::on(1000.0);
                self.daily_kd_golden = true;
                self.above_ma20 = true;
                self.trust_buy = ThresholdParam::on(100.0);
            }
            Preset::Strict => {
                self.min_conditions_to_pass = 10;
                self.volume_surge1.enabled = true;
                self.volume_surge2.enabled = true;
                self.volume_surge3.enabled = true;
                self.daily_kd_golden = true;
                self.monthly_kd_golden = true;
                self.above_ma20 = true;
                self.break_60d_high = true;
                self.trust_buy.enabled = true;
                self.eps.enabled = true;
                self.roe.enabled = true;
                self.dividend_yield.enabled = true;
            }
            Preset::None => {
                self.min_conditions_to_pass = 0;
                for param in [
                    &mut self.volume_surge1,
                    &mut self.volume_surge2,
                    &mut self.volume_surge3,
                    &mut self.min_volume,
                    &mut self.trust_buy,
                    &mut self.trust_pct,
                    &mut self.trust_5d,
                    &mut self.trust_holding,
                    &mut self.inst_5d,
                    &mut self.margin_ratio,
                    &mut self.margin_5d,
                    &mut self.eps,
                    &mut self.roe,
                    &mut self.dividend_yield,
                    &mut self.daily_change,
                    &mut self.change_5d,
                ] {
                    param.enabled = false;
                }
                self.daily_kd_golden = false;
                self.monthly_kd_golden = false;
                self.above_ma20 = false;
                self.break_60d_high = false;
                self.exclude_warning = false;
                self.exclude_disposition = false;
                self.exclude_limit_up.enabled = false;
            }
        }
    }

    /// Read the parameters from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        match &config.screening_parameters {
            Some(value) => serde_json::from_value(value.clone())
                .context("Invalid screening_parameters in config.json"),
            None => Ok(Self::default()),
        }
    }

    /// JSON form, as stored in `config.json`.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Number of enabled conditions.
    pub fn enabled_count(&self) -> usize {
        super::ConditionKind::ALL
            .iter()
            .filter(|kind| kind.is_enabled(self))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let params = ScreeningParameters::default();
        assert_eq!(params.min_conditions_to_pass, 5);
        assert!(params.market_twse && params.market_otc && !params.market_emerging);
        assert_eq!(params.volume_surge1, ThresholdParam::on(1.5));
        assert_eq!(params.min_volume, ThresholdParam::on(1000.0));
        assert_eq!(params.exclude_limit_up.days, 3);
        assert_eq!(params.enabled_count(), 2);
    }

    #[test]
    fn test_partial_object_uses_defaults() {
        let params: ScreeningParameters = serde_json::from_value(json!({
            "min_conditions_to_pass": 2,
            "daily_kd_golden": true,
            "yield": {"enabled": true, "value": 4.5},
            "exclude_limit_up": {"enabled": true}
        }))
        .unwrap();

        assert_eq!(params.min_conditions_to_pass, 2);
        assert!(params.daily_kd_golden);
        assert_eq!(params.dividend_yield, ThresholdParam::on(4.5));
        assert_eq!(params.exclude_limit_up, LimitUpParam { enabled: true, days: 3 });
        assert_eq!(params.trust_buy, ThresholdParam::off(500.0));
    }

    #[test]
    fn test_to_value_uses_config_keys() {
        let value = ScreeningParameters::default().to_value();
        assert_eq!(value["yield"]["value"], json!(3.0));
        assert_eq!(value["volume_surge1"]["enabled"], json!(true));
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        assert_eq!(
            ScreeningParameters::from_config(&config).unwrap(),
            ScreeningParameters::default()
        );

        config.screening_parameters = Some(json!({"min_conditions_to_pass": "many"}));
        assert!(ScreeningParameters::from_config(&config).is_err());
    }

    #[test]
    fn test_loose_preset() {
        let mut params = ScreeningParameters {
            daily_kd_golden: true,
            eps: ThresholdParam::on(2.0),
            ..Default::default()
        };
        params.apply_preset(Preset::Loose);

        assert_eq!(params.min_conditions_to_pass, 3);
        assert_eq!(params.volume_surge1, ThresholdParam::on(0.8));
        assert_eq!(params.min_volume, ThresholdParam::on(500.0));
        assert!(!params.daily_kd_golden);
        assert!(!params.eps.enabled);
        assert_eq!(params.enabled_count(), 2);
    }

    #[test]
    fn test_standard_preset() {
        let mut params = ScreeningParameters::default();
        params.apply_preset(Preset::Standard);

        assert_eq!(params.min_conditions_to_pass, 5);
        assert_eq!(params.volume_surge1, ThresholdParam::on(1.0));
        assert_eq!(params.min_volume, ThresholdParam::on(1000.0));
        assert_eq!(params.trust_buy, ThresholdParam::on(100.0));
        assert!(params.daily_kd_golden && params.above_ma20);
        assert_eq!(params.enabled_count(), 5);
    }

    #[test]
    fn test_strict_preset_keeps_thresholds() {
        let mut params = ScreeningParameters::default();
        params.apply_preset(Preset::Strict);

        assert_eq!(params.min_conditions_to_pass, 10);
        assert_eq!(params.volume_surge2, ThresholdParam::on(3.0));
        assert_eq!(params.volume_surge3, ThresholdParam::on(5.0));
        assert_eq!(params.roe, ThresholdParam::on(10.0));
        assert!(params.monthly_kd_golden && params.break_60d_high);
        // Surges, KD, MA20, 60-day high, trust buying, fundamentals and min volume.
        assert_eq!(params.enabled_count(), 12);
    }

    #[test]
    fn test_none_preset_disables_everything() {
        let mut params = ScreeningParameters {
            exclude_warning: true,
            margin_5d: ThresholdParam::on(10.0),
            ..Default::default()
        };
        params.exclude_limit_up.enabled = true;
        params.apply_preset(Preset::None);

        assert_eq!(params.min_conditions_to_pass, 0);
        assert_eq!(params.enabled_count(), 0);
        assert_eq!(params.margin_5d.value, 10.0);
    }

    #[test]
    fn test_preset_names() {
        assert_eq!("Strict".parse::<Preset>().unwrap(), Preset::Strict);
        assert_eq!(" none ".parse::<Preset>().unwrap(), Preset::None);
        assert!("aggressive".parse::<Preset>().is_err());
    }
}
