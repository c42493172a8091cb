//! Taiwan Stock Screener - command line entry point.
//!
//! `run` (the default) performs the preflight, screens the universe and
//! writes the reports. `check` and `inspect` are diagnostics.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use twstock_common::config::Config;
use twstock_common::config_loader::check_modular_files;
use twstock_common::logging::init_logging_with_file;
use twstock_screener::export::{ReportFormat, ScreeningReport};
use twstock_screener::launcher::{pause_for_acknowledgement, Preflight};
use twstock_screener::screening::Preset;
use twstock_screener::{init_config, Inspection, RunOptions, ScreenerService};

/// Exit status of failures after the preflight passed.
const RUNTIME_FAILURE: u8 = 2;

/// Rows of the result table printed to the terminal.
const CONSOLE_ROWS: usize = 20;

/// 台股智能篩選器 - Taiwan stock screener
#[derive(Parser, Debug)]
#[command(name = "twstock-screener")]
#[command(version)]
#[command(
    about = "Screen Taiwan stocks by volume, technical, chip and fundamental conditions",
    long_about = None
)]
struct Cli {
    /// Directory holding config.json and api_config.json
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check prerequisites, screen the stock universe and write reports
    Run(RunArgs),

    /// Check configuration and data source connectivity
    Check,

    /// Rewrite the reference stock list from the data provider
    RefreshList {
        /// Output CSV (default: output.reference_list)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Evaluate every condition for one stock
    Inspect {
        /// Stock id, e.g. 2330
        stock_id: String,
    },

    /// Write default config.json and api_config.json if absent
    InitConfig,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Screen only a handful of stocks
    #[arg(long)]
    test_mode: bool,

    /// Results kept in the reports
    #[arg(long)]
    max_results: Option<usize>,

    /// Parameter preset: loose, standard, strict or none
    #[arg(long)]
    preset: Option<Preset>,

    /// Minimum matched conditions (overrides the saved parameters and preset)
    #[arg(long)]
    min_conditions: Option<usize>,

    /// Report formats, comma separated (xlsx, json, markdown)
    #[arg(long, value_delimiter = ',')]
    format: Vec<ReportFormat>,

    /// Wait for Enter before exiting
    #[arg(long)]
    pause: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load_with_env(cli.config_dir.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("錯誤: 無法載入設定檔: {:#}", e);
            return ExitCode::from(1);
        }
    };
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.observability.log_format = format;
    }

    match cli.command.unwrap_or_else(|| Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run(config, args).await,
        Commands::Check => check(config).await,
        Commands::RefreshList { output } => {
            init_logs(&config, false);
            let result = async {
                let service = ScreenerService::new(config)?;
                service.refresh_list(output.as_deref()).await
            }
            .await;
            match result {
                Ok((path, counts)) => {
                    println!("已更新股票清單: {}", path.display());
                    println!("{}", counts);
                    ExitCode::SUCCESS
                }
                Err(e) => runtime_failure(e),
            }
        }
        Commands::Inspect { stock_id } => {
            init_logs(&config, false);
            let result = async {
                let service = ScreenerService::new(config)?;
                service.inspect(&stock_id).await
            }
            .await;
            match result {
                Ok(inspection) => {
                    print_inspection(&inspection);
                    ExitCode::SUCCESS
                }
                Err(e) => runtime_failure(e),
            }
        }
        Commands::InitConfig => {
            init_logs(&config, false);
            match init_config(&config.base_dir) {
                Ok(files) => {
                    for (path, written) in files {
                        let state = if written { "已建立" } else { "已存在，略過" };
                        println!("{}: {}", state, path.display());
                    }
                    ExitCode::SUCCESS
                }
                Err(e) => runtime_failure(e),
            }
        }
    }
}

fn init_logs(config: &Config, to_file: bool) {
    let log_dir = (to_file && config.output.log_to_file).then(|| config.logs_dir());
    init_logging_with_file(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
        log_dir.as_deref(),
    );
    tracing::info!("Taiwan Stock Screener v{}", env!("CARGO_PKG_VERSION"));
}

fn runtime_failure(e: anyhow::Error) -> ExitCode {
    tracing::error!(error = %e, "Command failed");
    eprintln!("錯誤: {:#}", e);
    ExitCode::from(RUNTIME_FAILURE)
}

async fn pause() {
    let _ = tokio::task::spawn_blocking(|| {
        pause_for_acknowledgement(std::io::stdin().lock(), std::io::stdout())
    })
    .await;
}

async fn run(config: Config, args: RunArgs) -> ExitCode {
    // Nothing is logged to file, fetched or written until this passes.
    if let Err(e) = Preflight::run(&config) {
        eprintln!("{}", e);
        if args.pause {
            pause().await;
        }
        return ExitCode::from(e.exit_code());
    }
    init_logs(&config, true);

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing stocks in progress");
            flag.store(true, Ordering::Relaxed);
        }
    });

    let options = RunOptions {
        test_mode: args.test_mode,
        max_results: args.max_results,
        preset: args.preset,
        min_conditions: args.min_conditions,
        formats: (!args.format.is_empty()).then(|| args.format.clone()),
    };

    let result = async {
        let service = ScreenerService::new(config)?;
        service.run(&options, cancel).await
    }
    .await;

    let code = match result {
        Ok(outcome) => {
            let run = &outcome.run;
            println!();
            println!("股票來源: {}", outcome.universe_source);
            println!("{}", run.summary());
            if run.results.is_empty() {
                println!("沒有符合條件的股票");
            } else {
                println!();
                print!("{}", ScreeningReport::new(run).to_console_table(CONSOLE_ROWS));
            }
            println!();
            for path in &outcome.reports {
                println!("報表: {}", path.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => runtime_failure(e),
    };

    if args.pause {
        pause().await;
    }
    code
}

async fn check(config: Config) -> ExitCode {
    let preflight = match Preflight::run(&config) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(e.exit_code());
        }
    };
    init_logs(&config, false);

    println!("設定目錄: {}", preflight.config_dir.display());
    println!("報表目錄: {}", preflight.reports_dir.display());
    println!("日誌目錄: {}", preflight.logs_dir.display());
    println!("FinMind Token: {}", preflight.token_hint);
    for (file, exists) in check_modular_files(Some(config.base_dir.clone())) {
        let state = if exists { "已載入" } else { "不存在，使用預設值" };
        println!("{}: {}", file, state);
    }

    let result = async { ScreenerService::new(config)?.check().await }.await;
    let report = match result {
        Ok(report) => report,
        Err(e) => return runtime_failure(e),
    };

    let line = |name: &str, result: Result<String, String>| match result {
        Ok(detail) => println!("[OK]   {} ({})", name, detail),
        Err(e) => println!("[FAIL] {}: {}", name, e),
    };
    line(
        "FinMind v3",
        report
            .finmind
            .v3
            .as_ref()
            .map(|n| format!("{} 筆", n))
            .map_err(|e| e.to_string()),
    );
    line(
        "FinMind v4",
        match &report.finmind.v4 {
            Some(Ok(n)) => Ok(format!("{} 筆", n)),
            Some(Err(e)) => Err(e.to_string()),
            None => Err("未設定 token".to_string()),
        },
    );
    line(
        "TWSE OpenAPI",
        report
            .twse
            .as_ref()
            .map(|n| format!("{} 檔報價", n))
            .map_err(|e| e.to_string()),
    );

    if report.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(RUNTIME_FAILURE)
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{:.2}", v))
}

fn fmt_flag(flag: Option<bool>) -> &'static str {
    match flag {
        Some(true) => "是",
        Some(false) => "否",
        None => "未知",
    }
}

fn print_inspection(inspection: &Inspection) {
    let s = &inspection.snapshot;
    let m = &inspection.metrics;
    let t = &inspection.indicators;

    println!("{} {} ({})", s.info.stock_id, s.info.stock_name, s.info.market);
    if let Some(bar) = s.latest_bar() {
        println!("資料日期: {} ({} 根K線)", bar.date, s.bars.len());
    }
    println!();
    println!("收盤價      {}", fmt_opt(m.close));
    println!("日漲跌%     {}", fmt_opt(m.daily_change));
    println!("5日漲跌%    {}", fmt_opt(m.change_5d));
    println!("成交量(張)  {}", fmt_opt(m.volume_lots));
    println!(
        "量比        5日 {} / 20日 {} / 60日 {}",
        fmt_opt(m.surge_5d),
        fmt_opt(m.surge_20d),
        fmt_opt(m.surge_60d)
    );
    let kd = |v: Option<(f64, f64)>| {
        v.map_or_else(|| "N/A".to_string(), |(k, d)| format!("K {:.1} / D {:.1}", k, d))
    };
    println!("日KD        {}", kd(m.daily_kd));
    println!("月KD        {}", kd(m.monthly_kd));
    println!("MA20        {}", fmt_opt(m.ma20));
    println!("60日高點    {}", fmt_opt(m.high_60d));
    println!("RSI(14)     {}", fmt_opt(t.rsi14));
    println!("MACD柱狀    {}", fmt_opt(t.macd_histogram));
    println!(
        "布林通道    {} ~ {}",
        fmt_opt(t.bollinger_lower),
        fmt_opt(t.bollinger_upper)
    );
    if let Some(levels) = t.support_resistance {
        println!("支撐/壓力   {:.2} / {:.2}", levels.support, levels.resistance);
    }
    println!("投信買超    {}", fmt_opt(m.trust_net_lots));
    println!("外資買超    {}", fmt_opt(m.foreign_net_lots));
    println!("融資使用率% {}", fmt_opt(m.margin_usage));
    println!("EPS         {}", fmt_opt(m.eps));
    println!("ROE%        {}", fmt_opt(m.roe));
    println!("殖利率%     {}", fmt_opt(m.dividend_yield));
    println!("警示股      {}", fmt_flag(s.is_warning));
    println!("處置股      {}", fmt_flag(s.is_disposition));

    println!();
    println!("條件檢查 (不論是否啟用):");
    for outcome in &inspection.check.outcomes {
        let mark = if outcome.passed { "✓" } else { "✗" };
        println!("  [{}] {}: {}", mark, outcome.condition.label(), outcome.display);
    }
    println!();
    println!(
        "符合 {}/{} 項，潛力分數 {} ({})，{}",
        inspection.check.matched_count,
        inspection.check.outcomes.len(),
        inspection.score.total_score,
        inspection.score.grade,
        inspection.score.key_signal
    );
}
