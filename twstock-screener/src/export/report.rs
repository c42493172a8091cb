//! Markdown and JSON reports of a screening run.

use anyhow::{Context, Result};
use chrono::Local;
use std::path::{Path, PathBuf};

use twstock_common::util::{pad_display, truncate_with_ellipsis};

use crate::screening::{ScreenedStock, ScreeningRun};

use super::ReportFormat;

fn opt(value: Option<f64>, decimals: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.*}", decimals, v))
}

/// Report generator for a screening run.
pub struct ScreeningReport<'a> {
    run: &'a ScreeningRun,
}

impl<'a> ScreeningReport<'a> {
    pub fn new(run: &'a ScreeningRun) -> Self {
        Self { run }
    }

    /// Generate the report text. `Xlsx` has no text form and yields JSON.
    pub fn generate(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Markdown => self.to_markdown(),
            ReportFormat::Json | ReportFormat::Xlsx => self.to_json(),
        }
    }

    /// Save the report, adding the format's extension when the path has none.
    pub fn save_to_file(&self, path: &Path, format: ReportFormat) -> Result<PathBuf> {
        let file_path = if path.extension().is_none() {
            path.with_extension(format.extension())
        } else {
            path.to_path_buf()
        };

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create report directory")?;
        }

        std::fs::write(&file_path, self.generate(format))
            .with_context(|| format!("Failed to write report {}", file_path.display()))?;

        Ok(file_path)
    }

    pub fn to_markdown(&self) -> String {
        let run = self.run;
        let mut md = String::new();

        md.push_str(&format!(
            "# 台股篩選報告\n\n**篩選ID**: {}\n**時間**: {}\n**耗時**: {:.1}秒\n\n",
            run.id,
            run.completed_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            run.duration_secs
        ));

        md.push_str("## 篩選摘要\n\n");
        md.push_str(&format!("- **股票總數**: {}\n", run.total));
        md.push_str(&format!("- **完成處理**: {}\n", run.processed));
        md.push_str(&format!("- **通過篩選**: {}\n", run.passed));
        md.push_str(&format!("- **資料錯誤**: {}\n", run.errored));
        md.push_str(&format!(
            "- **最少符合條件數**: {}\n",
            run.parameters.min_conditions_to_pass
        ));
        if run.cancelled {
            md.push_str("- **狀態**: 已中斷，結果僅含已處理股票\n");
        }
        md.push('\n');

        md.push_str("## 篩選結果\n\n");
        if run.results.is_empty() {
            md.push_str("沒有符合條件的股票。\n\n");
        } else {
            md.push_str("| 排名 | 代碼 | 名稱 | 分數 | 評級 | 收盤價 | 日漲跌% | 成交量(張) | 符合條件 | 關鍵信號 |\n");
            md.push_str("|------|------|------|------|------|--------|---------|------------|----------|----------|\n");
            for stock in &run.results {
                md.push_str(&self.result_row(stock));
            }
            md.push('\n');
        }

        if !run.condition_stats.is_empty() {
            md.push_str("## 條件統計\n\n");
            md.push_str("| 條件 | 評估 | 通過 | 通過率 |\n");
            md.push_str("|------|------|------|--------|\n");
            for stat in &run.condition_stats {
                md.push_str(&format!(
                    "| {} | {} | {} | {:.1}% |\n",
                    stat.condition.label(),
                    stat.evaluated,
                    stat.passed,
                    stat.pass_rate()
                ));
            }
            md.push('\n');
        }

        md.push_str("---\n\n");
        md.push_str(&format!(
            "*報告產生於 {}*\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));

        md
    }

    fn result_row(&self, stock: &ScreenedStock) -> String {
        format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |\n",
            stock.rank,
            stock.stock_id(),
            stock.stock_name(),
            stock.score.total_score,
            stock.score.grade,
            opt(stock.metrics.close, 2),
            opt(stock.metrics.daily_change, 2),
            opt(stock.metrics.volume_lots, 0),
            stock.check.matched_count,
            stock.score.key_signal
        )
    }

    /// Fixed-width table of the top `limit` results for the terminal.
    pub fn to_console_table(&self, limit: usize) -> String {
        const COLUMNS: [(&str, usize); 8] = [
            ("排名", 6),
            ("代碼", 8),
            ("名稱", 12),
            ("分數", 6),
            ("評級", 6),
            ("收盤價", 10),
            ("漲跌%", 8),
            ("關鍵信號", 0),
        ];

        let mut out = String::new();
        for (name, width) in COLUMNS {
            out.push_str(&pad_display(name, width));
        }
        out.push('\n');
        out.push_str(&"-".repeat(COLUMNS.iter().map(|(_, w)| w).sum::<usize>() + 24));
        out.push('\n');

        for stock in self.run.top(limit) {
            let cells = [
                stock.rank.to_string(),
                stock.stock_id().to_string(),
                truncate_with_ellipsis(stock.stock_name(), 4),
                stock.score.total_score.to_string(),
                stock.score.grade.to_string(),
                opt(stock.metrics.close, 2),
                opt(stock.metrics.daily_change, 2),
                stock.score.key_signal.clone(),
            ];
            for (cell, (_, width)) in cells.iter().zip(COLUMNS) {
                out.push_str(&pad_display(cell, width));
            }
            out.push('\n');
        }

        out
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self.run).unwrap_or_else(|_| "{}".to_string())
    }
}
