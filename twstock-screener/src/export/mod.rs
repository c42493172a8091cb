//! Report export.
//!
//! A finished [`ScreeningRun`] is written as one file per requested format,
//! all sharing the stem `screening_<YYYYmmdd_HHMMSS>` in local time.

mod excel;
mod report;

pub use excel::ExcelExporter;
pub use report::ScreeningReport;

use anyhow::Result;
use chrono::Local;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::screening::ScreeningRun;

/// Output format of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportFormat {
    Xlsx,
    Markdown,
    Json,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Markdown => "md",
            Self::Json => "json",
        }
    }

    /// Parse a list of format names, dropping duplicates.
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<Vec<Self>, String> {
        let mut formats = Vec::new();
        for name in names {
            let format: Self = name.as_ref().parse()?;
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        Ok(formats)
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xlsx => write!(f, "xlsx"),
            Self::Markdown => write!(f, "markdown"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "xlsx" | "excel" => Ok(Self::Xlsx),
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown report format: {}", s)),
        }
    }
}

/// File stem shared by every report of a run.
pub fn report_file_stem(run: &ScreeningRun) -> String {
    format!(
        "screening_{}",
        run.completed_at.with_timezone(&Local).format("%Y%m%d_%H%M%S")
    )
}

/// Write the run in each format into `dir`. Returns the written paths.
pub fn save_reports(
    run: &ScreeningRun,
    dir: &Path,
    formats: &[ReportFormat],
) -> Result<Vec<PathBuf>> {
    let stem = report_file_stem(run);
    let mut paths = Vec::with_capacity(formats.len());

    for format in formats {
        let path = match format {
            ReportFormat::Xlsx => ExcelExporter::new(dir).export(run)?,
            ReportFormat::Markdown | ReportFormat::Json => {
                ScreeningReport::new(run).save_to_file(&dir.join(&stem), *format)?
            }
        };
        info!(format = %format, path = %path.display(), "Report saved");
        paths.push(path);
    }

    Ok(paths)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::{Market, StockInfo};
    use crate::screening::{
        CheckResult, ConditionKind, ConditionOutcome, ConditionStat, Metrics, ScoreCard,
        ScreenedStock, ScreeningParameters,
    };
    use chrono::{TimeZone, Utc};

    /// A one-result run: 2330 matched the 5-day surge, min volume and the 60-day high.
    pub(crate) fn sample_run() -> ScreeningRun {
        let matched = [
            ConditionKind::VolumeSurge5d,
            ConditionKind::MinVolume,
            ConditionKind::Break60dHigh,
        ];
        let outcomes = matched
            .iter()
            .map(|kind| ConditionOutcome {
                condition: *kind,
                passed: true,
                display: "ok".to_string(),
            })
            .collect();
        let check = CheckResult::new(outcomes, 3);
        let metrics = Metrics {
            close: Some(612.0),
            daily_change: Some(2.35),
            change_5d: Some(-1.2),
            volume_lots: Some(45_210.0),
            trust_net_lots: Some(1_200.0),
            foreign_net_lots: Some(-350.0),
            eps: Some(39.2),
            ..Default::default()
        };
        let at = Utc.with_ymd_and_hms(2024, 5, 2, 15, 0, 0).unwrap();

        ScreeningRun {
            id: "screen_20240502_150000".to_string(),
            started_at: at,
            completed_at: at,
            duration_secs: 12.5,
            total: 3,
            processed: 3,
            passed: 1,
            failed: 1,
            errored: 1,
            cancelled: false,
            condition_stats: vec![ConditionStat {
                condition: ConditionKind::VolumeSurge5d,
                evaluated: 2,
                passed: 1,
            }],
            results: vec![ScreenedStock {
                rank: 1,
                info: StockInfo::new("2330", "台積電", Market::Twse).with_industry("半導體業"),
                score: ScoreCard::from_check(&check),
                check,
                metrics,
            }],
            parameters: ScreeningParameters::default(),
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("excel".parse::<ReportFormat>(), Ok(ReportFormat::Xlsx));
        assert_eq!("MD".parse::<ReportFormat>(), Ok(ReportFormat::Markdown));
        assert!("pdf".parse::<ReportFormat>().is_err());
        assert_eq!(
            ReportFormat::parse_list(&["xlsx", "json", "excel"]).unwrap(),
            vec![ReportFormat::Xlsx, ReportFormat::Json]
        );
    }

    #[test]
    fn test_save_reports_shares_stem() {
        let tmp = tempfile::tempdir().unwrap();
        let run = sample_run();
        let paths = save_reports(
            &run,
            tmp.path(),
            &[ReportFormat::Markdown, ReportFormat::Json, ReportFormat::Xlsx],
        )
        .unwrap();

        assert_eq!(paths.len(), 3);
        let stem = report_file_stem(&run);
        assert!(stem.starts_with("screening_2024050"));
        for path in &paths {
            assert!(path.exists());
            assert_eq!(path.file_stem().and_then(|s| s.to_str()), Some(stem.as_str()));
        }
    }
}
