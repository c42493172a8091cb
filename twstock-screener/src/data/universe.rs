//! Stock universe: which stocks a screening run looks at.
//!
//! Sources, in order of preference:
//! 1. The reference list CSV (`stock_id,stock_name,type,industry`)
//! 2. The stock list of the first data provider that serves one
//! 3. A built-in list of ten large caps, so a run can always start

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::fetcher::StockDataFetcher;
use super::{Market, StockInfo};

/// Name fragments marking ETFs, ETNs and leveraged products.
const FUND_KEYWORDS: &[&str] = &["ETF", "ETN", "正2", "反1", "槓桿", "期貨"];

/// Fallback universe used when no list can be loaded.
const BACKUP_STOCKS: &[(&str, &str, &str)] = &[
    ("2330", "台積電", "半導體業"),
    ("2454", "聯發科", "半導體業"),
    ("2317", "鴻海", "其他電子業"),
    ("2308", "台達電", "電子零組件業"),
    ("2382", "廣達", "電腦及週邊設備業"),
    ("2303", "聯電", "半導體業"),
    ("2412", "中華電", "通信網路業"),
    ("2886", "兆豐金", "金融保險業"),
    ("2891", "中信金", "金融保險業"),
    ("1301", "台塑", "塑膠工業"),
];

/// Whether an id/name pair is an ordinary share.
///
/// Ordinary shares have a four-digit numeric id that does not start with
/// `0` (ETFs) and a name without fund keywords. Longer ids are warrants or
/// preferred shares.
pub fn is_ordinary_share(stock_id: &str, stock_name: &str) -> bool {
    let id = stock_id.trim();
    id.len() == 4
        && id.chars().all(|c| c.is_ascii_digit())
        && !id.starts_with('0')
        && !FUND_KEYWORDS.iter().any(|k| stock_name.contains(k))
}

/// The built-in fallback universe.
pub fn backup_list() -> Vec<StockInfo> {
    BACKUP_STOCKS
        .iter()
        .map(|(id, name, industry)| {
            StockInfo::new(*id, *name, Market::Twse).with_industry(*industry)
        })
        .collect()
}

/// Keep only stocks whose market is enabled.
pub fn filter_by_market(
    stocks: Vec<StockInfo>,
    twse: bool,
    tpex: bool,
    emerging: bool,
) -> Vec<StockInfo> {
    stocks
        .into_iter()
        .filter(|s| match s.market {
            Market::Twse => twse,
            Market::Tpex => tpex,
            Market::Emerging => emerging,
        })
        .collect()
}

// ============================================================================
// Reference List CSV
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct ReferenceRecord {
    stock_id: String,
    stock_name: String,
    #[serde(rename = "type")]
    market: String,
    #[serde(default)]
    industry: Option<String>,
}

/// Load the reference list, skipping rows that are not ordinary shares.
pub fn load_reference_list(path: &Path) -> Result<Vec<StockInfo>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let content = content.trim_start_matches('\u{feff}');

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut stocks = Vec::new();
    let mut skipped = 0usize;

    for (line, record) in reader.deserialize::<ReferenceRecord>().enumerate() {
        let record = record.with_context(|| {
            format!("Invalid row {} in {}", line + 2, path.display())
        })?;

        match Market::parse(&record.market) {
            Some(market) if is_ordinary_share(&record.stock_id, &record.stock_name) => {
                let mut info = StockInfo::new(record.stock_id, record.stock_name, market);
                info.industry = record.industry.filter(|s| !s.is_empty());
                stocks.push(info);
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        info!(skipped, path = %path.display(), "Skipped non-ordinary rows in reference list");
    }

    Ok(stocks)
}

/// Write the reference list CSV, replacing any existing file.
pub fn save_reference_list(path: &Path, stocks: &[StockInfo]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    for stock in stocks {
        writer
            .serialize(ReferenceRecord {
                stock_id: stock.stock_id.clone(),
                stock_name: stock.stock_name.clone(),
                market: stock.market.code().to_string(),
                industry: stock.industry.clone(),
            })
            .context("Failed to write reference list row")?;
    }

    writer.flush().context("Failed to flush reference list")?;
    Ok(())
}

/// Stock counts per market.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarketCounts {
    pub twse: usize,
    pub tpex: usize,
    pub emerging: usize,
}

impl MarketCounts {
    pub fn of(stocks: &[StockInfo]) -> Self {
        stocks.iter().fold(Self::default(), |mut counts, s| {
            match s.market {
                Market::Twse => counts.twse += 1,
                Market::Tpex => counts.tpex += 1,
                Market::Emerging => counts.emerging += 1,
            }
            counts
        })
    }

    pub fn total(&self) -> usize {
        self.twse + self.tpex + self.emerging
    }
}

impl fmt::Display for MarketCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "上市 {} / 上櫃 {} / 興櫃 {} (共 {})",
            self.twse,
            self.tpex,
            self.emerging,
            self.total()
        )
    }
}

// ============================================================================
// Universe Loading
// ============================================================================

/// Where the universe of a run came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniverseSource {
    ReferenceList(PathBuf),
    Provider,
    Backup,
}

impl fmt::Display for UniverseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReferenceList(path) => write!(f, "參考清單 {}", path.display()),
            Self::Provider => write!(f, "資料來源股票清單"),
            Self::Backup => write!(f, "內建備用清單"),
        }
    }
}

/// Load the universe from the best available source.
pub async fn load_universe(
    reference_list: &Path,
    fetcher: &StockDataFetcher,
) -> (Vec<StockInfo>, UniverseSource) {
    if reference_list.exists() {
        match load_reference_list(reference_list) {
            Ok(stocks) if !stocks.is_empty() => {
                info!(
                    count = stocks.len(),
                    path = %reference_list.display(),
                    "Loaded reference list"
                );
                return (stocks, UniverseSource::ReferenceList(reference_list.to_path_buf()));
            }
            Ok(_) => warn!(path = %reference_list.display(), "Reference list is empty"),
            Err(e) => warn!(error = %e, "Reference list unreadable"),
        }
    }

    match fetcher.list_stocks().await {
        Ok(stocks) if !stocks.is_empty() => {
            info!(count = stocks.len(), "Loaded stock list from data provider");
            return (stocks, UniverseSource::Provider);
        }
        Ok(_) => warn!("Data provider returned an empty stock list"),
        Err(e) => warn!(error = %e, "Stock list unavailable from data providers"),
    }

    warn!("Falling back to the built-in stock list");
    (backup_list(), UniverseSource::Backup)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_ordinary_share() {
        assert!(is_ordinary_share("2330", "台積電"));
        assert!(is_ordinary_share(" 1301 ", "台塑"));
        assert!(!is_ordinary_share("0050", "元大台灣50"));
        assert!(!is_ordinary_share("00632R", "元大台灣50反1"));
        assert!(!is_ordinary_share("2330A", "台積電特"));
        assert!(!is_ordinary_share("030001", "台積電購01"));
        assert!(!is_ordinary_share("6666", "某某ETF"));
    }

    #[test]
    fn test_backup_list() {
        let stocks = backup_list();
        assert_eq!(stocks.len(), 10);
        assert_eq!(stocks[0].stock_id, "2330");
        assert!(stocks.iter().all(|s| s.market == Market::Twse));
    }

    #[test]
    fn test_filter_by_market() {
        let stocks = vec![
            StockInfo::new("2330", "台積電", Market::Twse),
            StockInfo::new("6488", "環球晶", Market::Tpex),
            StockInfo::new("7777", "興櫃股", Market::Emerging),
        ];
        let filtered = filter_by_market(stocks, true, true, false);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|s| s.market != Market::Emerging));
    }

    #[test]
    fn test_reference_list_round_trip_skips_funds() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("list.csv");
        std::fs::write(
            &path,
            "\u{feff}stock_id,stock_name,type,industry\n\
             2330,台積電,twse,半導體業\n\
             0050,元大台灣50,twse,\n\
             6488,環球晶,otc,半導體業\n\
             1234,未知,warrant,\n",
        )
        .unwrap();

        let stocks = load_reference_list(&path).unwrap();
        assert_eq!(stocks.len(), 2);
        assert_eq!(stocks[1].market, Market::Tpex);
        assert_eq!(stocks[0].industry.as_deref(), Some("半導體業"));

        let out = tmp.path().join("out").join("copy.csv");
        save_reference_list(&out, &stocks).unwrap();
        let reloaded = load_reference_list(&out).unwrap();
        assert_eq!(reloaded, stocks);
    }

    #[test]
    fn test_market_counts() {
        let counts = MarketCounts::of(&backup_list());
        assert_eq!(counts.twse, 10);
        assert_eq!(counts.total(), 10);
        assert!(counts.to_string().contains("上市 10"));
    }
}
