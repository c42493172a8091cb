//! Excel workbook export.
//!
//! Sheets:
//! - 篩選結果: ranked results, frozen header, autofilter, colored changes and grades
//! - 統計分析: run counters, score statistics and grade counts
//! - 條件統計: per-condition pass rates
//! - 產業分布: results per industry
//! - 參數設定: the parameters the run used

use anyhow::{Context, Result};
use chrono::Local;
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::screening::{ConditionKind, Grade, ScreenedStock, ScreeningParameters, ScreeningRun};

use super::report_file_stem;

const RESULT_HEADERS: [(&str, f64); 17] = [
    ("排名", 8.0),
    ("股票代碼", 12.0),
    ("股票名稱", 15.0),
    ("潛力分數", 10.0),
    ("評級", 8.0),
    ("收盤價", 10.0),
    ("日漲跌%", 10.0),
    ("5日漲跌%", 10.0),
    ("成交量(張)", 12.0),
    ("投信買超", 12.0),
    ("外資買超", 12.0),
    ("融資餘額", 12.0),
    ("EPS", 10.0),
    ("ROE%", 10.0),
    ("殖利率%", 10.0),
    ("符合條件數", 10.0),
    ("關鍵信號", 20.0),
];

/// Header row index of the result sheet; the title and timestamp sit above it.
const HEADER_ROW: u32 = 2;

// ============================================================================
// Formats
// ============================================================================

struct Formats {
    title: Format,
    header: Format,
    text: Format,
    center: Format,
    integer: Format,
    decimal: Format,
    rise: Format,
    fall: Format,
    grade_a_plus: Format,
    grade_a: Format,
    grade_b_plus: Format,
}

impl Formats {
    fn new() -> Self {
        let cell = Format::new().set_border(FormatBorder::Thin);
        let change = "+#,##0.00;-#,##0.00;0.00";

        Self {
            title: Format::new()
                .set_bold()
                .set_font_size(14)
                .set_align(FormatAlign::Center)
                .set_align(FormatAlign::VerticalCenter),
            header: Format::new()
                .set_bold()
                .set_font_color(Color::White)
                .set_background_color(Color::RGB(0x4CAF50))
                .set_border(FormatBorder::Thin)
                .set_align(FormatAlign::Center)
                .set_text_wrap(),
            text: cell.clone(),
            center: cell.clone().set_align(FormatAlign::Center),
            integer: cell.clone().set_num_format("#,##0"),
            decimal: cell.clone().set_num_format("#,##0.00"),
            rise: cell.clone().set_num_format(change).set_font_color(Color::Red),
            fall: cell.clone().set_num_format(change).set_font_color(Color::Green),
            grade_a_plus: cell
                .clone()
                .set_align(FormatAlign::Center)
                .set_bold()
                .set_font_color(Color::Red)
                .set_background_color(Color::RGB(0xFFE6E6)),
            grade_a: cell
                .clone()
                .set_align(FormatAlign::Center)
                .set_font_color(Color::RGB(0xC00000))
                .set_background_color(Color::RGB(0xFFF2F2)),
            grade_b_plus: cell
                .set_align(FormatAlign::Center)
                .set_font_color(Color::RGB(0x0070C0))
                .set_background_color(Color::RGB(0xE6F3FF)),
        }
    }

    fn grade(&self, grade: Grade) -> &Format {
        match grade {
            Grade::APlus => &self.grade_a_plus,
            Grade::A => &self.grade_a,
            Grade::BPlus => &self.grade_b_plus,
            Grade::B | Grade::C => &self.center,
        }
    }

    fn change(&self, value: f64) -> &Format {
        if value > 0.0 {
            &self.rise
        } else if value < 0.0 {
            &self.fall
        } else {
            &self.decimal
        }
    }
}

fn write_optional(
    sheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: Option<f64>,
    format: &Format,
    blank: &Format,
) -> Result<(), XlsxError> {
    match value {
        Some(v) => sheet.write_number_with_format(row, col, v, format)?,
        None => sheet.write_string_with_format(row, col, "-", blank)?,
    };
    Ok(())
}

fn write_title(
    sheet: &mut Worksheet,
    last_col: u16,
    title: &str,
    f: &Formats,
) -> Result<(), XlsxError> {
    sheet.merge_range(0, 0, 0, last_col, title, &f.title)?;
    sheet.set_row_height(0, 24)?;
    Ok(())
}

fn write_headers(
    sheet: &mut Worksheet,
    row: u32,
    headers: &[(&str, f64)],
    f: &Formats,
) -> Result<(), XlsxError> {
    for (col, (name, width)) in headers.iter().enumerate() {
        let col = col as u16;
        sheet.write_string_with_format(row, col, *name, &f.header)?;
        sheet.set_column_width(col, *width)?;
    }
    Ok(())
}

// ============================================================================
// Exporter
// ============================================================================

/// Writes a screening run as an `.xlsx` workbook.
pub struct ExcelExporter {
    output_dir: PathBuf,
}

impl ExcelExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write `screening_<timestamp>.xlsx` and return its path.
    pub fn export(&self, run: &ScreeningRun) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("Failed to create report directory {}", self.output_dir.display())
        })?;
        let path = self
            .output_dir
            .join(format!("{}.xlsx", report_file_stem(run)));

        let mut workbook = self
            .build_workbook(run)
            .context("Failed to build Excel workbook")?;
        workbook
            .save(&path)
            .with_context(|| format!("Failed to save Excel report {}", path.display()))?;

        Ok(path)
    }

    fn build_workbook(&self, run: &ScreeningRun) -> Result<Workbook, XlsxError> {
        let formats = Formats::new();
        let mut workbook = Workbook::new();

        write_results(workbook.add_worksheet().set_name("篩選結果")?, run, &formats)?;
        write_statistics(workbook.add_worksheet().set_name("統計分析")?, run, &formats)?;
        write_condition_stats(workbook.add_worksheet().set_name("條件統計")?, run, &formats)?;
        write_industries(workbook.add_worksheet().set_name("產業分布")?, run, &formats)?;
        write_parameters(
            workbook.add_worksheet().set_name("參數設定")?,
            &run.parameters,
            &formats,
        )?;

        Ok(workbook)
    }
}

// ============================================================================
// Sheets
// ============================================================================

fn write_results(sheet: &mut Worksheet, run: &ScreeningRun, f: &Formats) -> Result<(), XlsxError> {
    let last_col = (RESULT_HEADERS.len() - 1) as u16;
    write_title(sheet, last_col, "台股智能篩選結果報表", f)?;
    sheet.write_string(
        1,
        0,
        format!(
            "篩選時間: {}",
            run.completed_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ),
    )?;
    write_headers(sheet, HEADER_ROW, &RESULT_HEADERS, f)?;

    for (i, stock) in run.results.iter().enumerate() {
        write_result_row(sheet, HEADER_ROW + 1 + i as u32, stock, f)?;
    }

    sheet.set_freeze_panes(HEADER_ROW + 1, 3)?;
    sheet.autofilter(HEADER_ROW, 0, HEADER_ROW + run.results.len() as u32, last_col)?;
    Ok(())
}

fn write_result_row(
    sheet: &mut Worksheet,
    row: u32,
    stock: &ScreenedStock,
    f: &Formats,
) -> Result<(), XlsxError> {
    let m = &stock.metrics;

    sheet.write_number_with_format(row, 0, stock.rank as f64, &f.center)?;
    sheet.write_string_with_format(row, 1, stock.stock_id(), &f.center)?;
    sheet.write_string_with_format(row, 2, stock.stock_name(), &f.text)?;
    sheet.write_number_with_format(row, 3, stock.score.total_score, &f.center)?;
    sheet.write_string_with_format(row, 4, stock.score.grade.as_str(), f.grade(stock.score.grade))?;
    write_optional(sheet, row, 5, m.close, &f.decimal, &f.center)?;
    for (col, change) in [(6, m.daily_change), (7, m.change_5d)] {
        let format = change.map_or(&f.decimal, |v| f.change(v));
        write_optional(sheet, row, col, change, format, &f.center)?;
    }
    write_optional(sheet, row, 8, m.volume_lots, &f.integer, &f.center)?;
    write_optional(sheet, row, 9, m.trust_net_lots, &f.integer, &f.center)?;
    write_optional(sheet, row, 10, m.foreign_net_lots, &f.integer, &f.center)?;
    write_optional(sheet, row, 11, m.margin_balance, &f.integer, &f.center)?;
    write_optional(sheet, row, 12, m.eps, &f.decimal, &f.center)?;
    write_optional(sheet, row, 13, m.roe, &f.decimal, &f.center)?;
    write_optional(sheet, row, 14, m.dividend_yield, &f.decimal, &f.center)?;
    sheet.write_number_with_format(row, 15, stock.check.matched_count as f64, &f.center)?;
    sheet.write_string_with_format(row, 16, &stock.score.key_signal, &f.text)?;
    Ok(())
}

fn write_statistics(
    sheet: &mut Worksheet,
    run: &ScreeningRun,
    f: &Formats,
) -> Result<(), XlsxError> {
    write_title(sheet, 1, "篩選統計分析", f)?;
    write_headers(sheet, 1, &[("統計項目", 20.0), ("數值", 15.0)], f)?;

    let mut rows: Vec<(String, f64)> = vec![
        ("篩選股票總數".into(), run.total as f64),
        ("完成處理".into(), run.processed as f64),
        ("通過篩選".into(), run.passed as f64),
        ("未達條件數".into(), run.failed as f64),
        ("資料錯誤".into(), run.errored as f64),
        ("報表股票數".into(), run.results.len() as f64),
    ];

    let mut scores: Vec<u32> = run.results.iter().map(|s| s.score.total_score).collect();
    if let Some((avg, max, min)) = run.score_stats() {
        scores.sort_unstable();
        let mid = scores.len() / 2;
        let median = if scores.len() % 2 == 0 {
            f64::from(scores[mid - 1] + scores[mid]) / 2.0
        } else {
            f64::from(scores[mid])
        };
        rows.push(("平均分數".into(), (avg * 100.0).round() / 100.0));
        rows.push(("最高分數".into(), f64::from(max)));
        rows.push(("最低分數".into(), f64::from(min)));
        rows.push(("中位數分數".into(), median));
    }
    for (grade, count) in run.grade_distribution() {
        rows.push((format!("{} 級股票數", grade), count as f64));
    }

    for (i, (label, value)) in rows.iter().enumerate() {
        let row = 2 + i as u32;
        sheet.write_string_with_format(row, 0, label.as_str(), &f.text)?;
        sheet.write_number_with_format(row, 1, *value, &f.center)?;
    }
    Ok(())
}

fn write_condition_stats(
    sheet: &mut Worksheet,
    run: &ScreeningRun,
    f: &Formats,
) -> Result<(), XlsxError> {
    write_title(sheet, 5, "條件統計", f)?;
    write_headers(
        sheet,
        1,
        &[
            ("條件類別", 12.0),
            ("條件名稱", 20.0),
            ("門檻", 12.0),
            ("評估數", 10.0),
            ("通過數", 10.0),
            ("通過率%", 10.0),
        ],
        f,
    )?;

    for (i, stat) in run.condition_stats.iter().enumerate() {
        let row = 2 + i as u32;
        let threshold = stat
            .condition
            .threshold_text(&run.parameters)
            .unwrap_or_else(|| "-".to_string());
        sheet.write_string_with_format(row, 0, stat.condition.category(), &f.text)?;
        sheet.write_string_with_format(row, 1, stat.condition.label(), &f.text)?;
        sheet.write_string_with_format(row, 2, threshold, &f.center)?;
        sheet.write_number_with_format(row, 3, stat.evaluated as f64, &f.integer)?;
        sheet.write_number_with_format(row, 4, stat.passed as f64, &f.integer)?;
        sheet.write_number_with_format(row, 5, stat.pass_rate(), &f.decimal)?;
    }
    Ok(())
}

fn write_industries(
    sheet: &mut Worksheet,
    run: &ScreeningRun,
    f: &Formats,
) -> Result<(), XlsxError> {
    write_title(sheet, 2, "產業分布", f)?;
    write_headers(sheet, 1, &[("產業", 20.0), ("股票數", 10.0), ("平均分數", 10.0)], f)?;

    let mut groups: HashMap<&str, Vec<u32>> = HashMap::new();
    for stock in &run.results {
        let industry = stock.info.industry.as_deref().unwrap_or("未分類");
        groups.entry(industry).or_default().push(stock.score.total_score);
    }
    let mut groups: Vec<(&str, Vec<u32>)> = groups.into_iter().collect();
    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(b.0)));

    for (i, (industry, scores)) in groups.iter().enumerate() {
        let row = 2 + i as u32;
        let avg = scores.iter().sum::<u32>() as f64 / scores.len() as f64;
        sheet.write_string_with_format(row, 0, *industry, &f.text)?;
        sheet.write_number_with_format(row, 1, scores.len() as f64, &f.center)?;
        sheet.write_number_with_format(row, 2, avg, &f.decimal)?;
    }
    Ok(())
}

fn write_parameters(
    sheet: &mut Worksheet,
    params: &ScreeningParameters,
    f: &Formats,
) -> Result<(), XlsxError> {
    write_title(sheet, 3, "篩選參數設定", f)?;
    write_headers(
        sheet,
        1,
        &[
            ("參數類別", 15.0),
            ("參數名稱", 20.0),
            ("設定值", 15.0),
            ("是否啟用", 10.0),
        ],
        f,
    )?;

    let yes_no = |on: bool| if on { "是" } else { "否" };
    let mut rows: Vec<(&str, &str, String, &str)> = vec![
        ("通用", "最少符合條件數", params.min_conditions_to_pass.to_string(), "是"),
        ("市場", "上市", "-".into(), yes_no(params.market_twse)),
        ("市場", "上櫃", "-".into(), yes_no(params.market_otc)),
        ("市場", "興櫃", "-".into(), yes_no(params.market_emerging)),
    ];
    for kind in ConditionKind::ALL {
        rows.push((
            kind.category(),
            kind.label(),
            kind.threshold_text(params).unwrap_or_else(|| "-".to_string()),
            yes_no(kind.is_enabled(params)),
        ));
    }

    for (i, (category, name, value, enabled)) in rows.iter().enumerate() {
        let row = 2 + i as u32;
        sheet.write_string_with_format(row, 0, *category, &f.text)?;
        sheet.write_string_with_format(row, 1, *name, &f.text)?;
        sheet.write_string_with_format(row, 2, value.as_str(), &f.center)?;
        sheet.write_string_with_format(row, 3, *enabled, &f.center)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::tests::sample_run;

    #[test]
    fn test_export_writes_timestamped_workbook() {
        let tmp = tempfile::tempdir().unwrap();
        let run = sample_run();
        let exporter = ExcelExporter::new(tmp.path().join("reports"));
        let path = exporter.export(&run).unwrap();

        assert!(path.starts_with(exporter.output_dir()));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("screening_"));
        assert!(name.ends_with(".xlsx"));
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_export_empty_run() {
        let tmp = tempfile::tempdir().unwrap();
        let mut run = sample_run();
        run.results.clear();
        run.condition_stats.clear();

        let path = ExcelExporter::new(tmp.path()).export(&run).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_change_format_by_sign() {
        let f = Formats::new();
        assert!(std::ptr::eq(f.change(1.0), &f.rise));
        assert!(std::ptr::eq(f.change(-0.5), &f.fall));
        assert!(std::ptr::eq(f.change(0.0), &f.decimal));
    }
}
