//! Integration tests for the FinMind client against a mock server.
//!
//! Covers endpoint routing (v3 without token, v4 with bearer token), the
//! response envelope, the institutional long-format pivot, retry rules and
//! the requests one snapshot costs.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{json, Value};
use twstock_common::config::Config;
use twstock_screener::data::{
    DataProvider, FinMindClient, Market, ProviderError, StockDataFetcher, StockInfo,
};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, token: Option<&str>) -> Config {
    let mut config = Config::default();
    config.finmind.v3_url = format!("{}/api/v3/data", server.uri());
    config.finmind.v4_url = format!("{}/api/v4/data", server.uri());
    config.finmind.api_token = token.map(str::to_string);
    config.finmind.retry_delay_ms = 10;
    config.finmind.min_interval_ms = 0;
    config
}

fn envelope(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "msg": "success",
        "status": 200,
        "data": data,
    }))
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
}

#[tokio::test]
async fn test_prices_use_v3_without_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/data"))
        .and(query_param("dataset", "TaiwanStockPrice"))
        .and(query_param("data_id", "2330"))
        .and(query_param("start_date", "2024-05-01"))
        .respond_with(envelope(json!([
            {"date": "2024-05-03", "stock_id": "2330", "Trading_Volume": 30000000,
             "Trading_money": 18000000000_i64, "open": 600, "max": 612, "min": 598, "close": 610},
            {"date": "2024-05-02", "stock_id": "2330", "Trading_Volume": 25000000,
             "Trading_money": 15000000000_i64, "open": 590, "max": 601, "min": 588, "close": 600},
            {"date": "2024-05-01", "stock_id": "2330", "Trading_Volume": 0,
             "Trading_money": 0, "open": 0, "max": 0, "min": 0, "close": 0}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = FinMindClient::from_config(&config_for(&server, None)).unwrap();
    let bars = client.daily_bars("2330", date(1), date(3)).await.unwrap();

    // The suspended day is dropped and the rest sorted oldest first.
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].date, date(2));
    assert_eq!(bars[1].close, 610.0);
    assert_eq!(bars[1].high, 612.0);
    assert_eq!(bars[1].volume_lots(), 30_000.0);
}

#[tokio::test]
async fn test_institutional_rows_are_pivoted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/data"))
        .and(header("authorization", "Bearer secret-token"))
        .and(query_param("dataset", "TaiwanStockInstitutionalInvestorsBuySell"))
        .respond_with(envelope(json!([
            {"date": "2024-05-02", "stock_id": "2330", "name": "Foreign_Investor", "buy": 5000000, "sell": 2000000},
            {"date": "2024-05-02", "stock_id": "2330", "name": "Investment_Trust", "buy": 800000, "sell": 100000},
            {"date": "2024-05-02", "stock_id": "2330", "name": "Dealer_self", "buy": 1000, "sell": 3000},
            {"date": "2024-05-03", "stock_id": "2330", "name": "Investment_Trust", "buy": 0, "sell": 200000}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = FinMindClient::from_config(&config_for(&server, Some("secret-token"))).unwrap();
    let flows = client
        .institutional_flows("2330", date(1), date(3))
        .await
        .unwrap();

    assert_eq!(flows.len(), 2);
    assert_eq!(flows[0].foreign_net(), 3_000_000.0);
    assert_eq!(flows[0].trust_net(), 700_000.0);
    assert_eq!(flows[0].dealer_net(), -2_000.0);
    assert_eq!(flows[1].trust_net(), -200_000.0);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/data"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/data"))
        .respond_with(envelope(json!([
            {"date": "2024-05-02", "stock_id": "2330", "Trading_Volume": 1000,
             "Trading_money": 600000, "open": 600, "max": 600, "min": 600, "close": 600}
        ])))
        .mount(&server)
        .await;

    let client = FinMindClient::from_config(&config_for(&server, None)).unwrap();
    let bars = client.daily_bars("2330", date(1), date(3)).await.unwrap();

    assert_eq!(bars.len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_token_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "msg": "Token is invalid or expired",
            "status": 400,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = FinMindClient::from_config(&config_for(&server, Some("stale"))).unwrap();
    let err = client.margin_records("2330", date(1), date(3)).await.unwrap_err();

    assert!(matches!(err, ProviderError::Auth(_)));
}

#[tokio::test]
async fn test_v4_dataset_without_token_sends_nothing() {
    let server = MockServer::start().await;

    let client = FinMindClient::from_config(&config_for(&server, None)).unwrap();
    assert!(!client.has_token());
    let err = client.valuation("2330", date(31)).await.unwrap_err();

    assert!(matches!(err, ProviderError::Auth(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stock_list_keeps_ordinary_shares() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/data"))
        .and(query_param("dataset", "TaiwanStockInfo"))
        .respond_with(envelope(json!([
            {"stock_id": "2330", "stock_name": "台積電", "type": "twse", "industry_category": "半導體業"},
            {"stock_id": "2330", "stock_name": "台積電", "type": "twse", "industry_category": "電子工業"},
            {"stock_id": "0050", "stock_name": "元大台灣50", "type": "twse", "industry_category": "ETF"},
            {"stock_id": "6488", "stock_name": "環球晶", "type": "tpex", "industry_category": "半導體業"},
            {"stock_id": "2882A", "stock_name": "國泰金甲特", "type": "twse", "industry_category": "金融保險"},
            {"stock_id": "9999", "stock_name": "未知", "type": "index", "industry_category": ""}
        ])))
        .mount(&server)
        .await;

    let client = FinMindClient::from_config(&config_for(&server, None)).unwrap();
    let stocks = client.list_stocks().await.unwrap();

    let ids: Vec<&str> = stocks.iter().map(|s| s.stock_id.as_str()).collect();
    assert_eq!(ids, vec!["2330", "6488"]);
    assert_eq!(stocks[0].industry.as_deref(), Some("半導體業"));
    assert_eq!(stocks[1].market, Market::Tpex);
}

#[tokio::test]
async fn test_rate_limited_until_retries_run_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/data"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let client = FinMindClient::from_config(&config_for(&server, None)).unwrap();
    let err = client.daily_bars("2330", date(1), date(3)).await.unwrap_err();

    assert!(matches!(
        err,
        ProviderError::RateLimited {
            retry_after_secs: Some(1)
        }
    ));
}

#[tokio::test]
async fn test_rate_limit_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/data"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/data"))
        .respond_with(envelope(json!([
            {"date": "2024-05-02", "stock_id": "2330", "Trading_Volume": 1000,
             "Trading_money": 600000, "open": 600, "max": 600, "min": 600, "close": 600}
        ])))
        .mount(&server)
        .await;

    let client = FinMindClient::from_config(&config_for(&server, None)).unwrap();
    let bars = client.daily_bars("2330", date(1), date(3)).await.unwrap();

    assert_eq!(bars.len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_max_retries_counts_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/data"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = FinMindClient::from_config(&config_for(&server, None)).unwrap();
    let err = client.daily_bars("2330", date(1), date(3)).await.unwrap_err();

    assert!(matches!(err, ProviderError::Unavailable(_)));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

/// Serve every per-stock dataset; statements only for an `end_date` of `as_of`.
async fn mount_all_datasets(server: &MockServer, as_of: &str) {
    Mock::given(method("GET"))
        .and(path("/api/v3/data"))
        .and(query_param("dataset", "TaiwanStockPrice"))
        .and(query_param("end_date", as_of))
        .respond_with(envelope(json!([
            {"date": "2024-05-30", "stock_id": "2330", "Trading_Volume": 20000000,
             "Trading_money": 0, "open": 800, "max": 810, "min": 795, "close": 800},
            {"date": "2024-05-31", "stock_id": "2330", "Trading_Volume": 25000000,
             "Trading_money": 0, "open": 800, "max": 820, "min": 798, "close": 816}
        ])))
        .expect(1)
        .mount(server)
        .await;

    for dataset in [
        "TaiwanStockInstitutionalInvestorsBuySell",
        "TaiwanStockMarginPurchaseShortSale",
    ] {
        Mock::given(method("GET"))
            .and(path("/api/v4/data"))
            .and(query_param("dataset", dataset))
            .respond_with(envelope(json!([])))
            .expect(1)
            .mount(server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/api/v4/data"))
        .and(query_param("dataset", "TaiwanStockPER"))
        .and(query_param("end_date", as_of))
        .respond_with(envelope(json!([
            {"date": "2024-05-31", "stock_id": "2330", "PER": 24.0, "PBR": 6.0,
             "dividend_yield": 1.6}
        ])))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v4/data"))
        .and(query_param("dataset", "TaiwanStockFinancialStatements"))
        .and(query_param("end_date", as_of))
        .respond_with(envelope(json!([
            {"date": "2023-06-30", "type": "EPS", "value": 7.0, "origin_name": "基本每股盈餘（元）"},
            {"date": "2023-09-30", "type": "EPS", "value": 8.0, "origin_name": "基本每股盈餘（元）"},
            {"date": "2023-12-31", "type": "EPS", "value": 9.0, "origin_name": "基本每股盈餘（元）"},
            {"date": "2024-03-31", "type": "EPS", "value": 10.0, "origin_name": "基本每股盈餘（元）"},
            {"date": "2023-06-30", "type": "IncomeAfterTaxes", "value": 100.0, "origin_name": ""},
            {"date": "2023-09-30", "type": "IncomeAfterTaxes", "value": 110.0, "origin_name": ""},
            {"date": "2023-12-31", "type": "IncomeAfterTaxes", "value": 120.0, "origin_name": ""},
            {"date": "2024-03-31", "type": "IncomeAfterTaxes", "value": 130.0, "origin_name": ""}
        ])))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v4/data"))
        .and(query_param("dataset", "TaiwanStockBalanceSheet"))
        .and(query_param("end_date", as_of))
        .respond_with(envelope(json!([
            {"date": "2024-03-31", "type": "Equity", "value": 2300.0, "origin_name": "權益總計"}
        ])))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v4/data"))
        .and(query_param("dataset", "TaiwanStockShareholding"))
        .and(query_param("end_date", as_of))
        .respond_with(envelope(json!([
            {"date": "2024-05-31", "stock_id": "2330", "NumberOfSharesIssued": 25930380458_i64}
        ])))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_snapshot_reads_each_statement_dataset_once() {
    let server = MockServer::start().await;
    mount_all_datasets(&server, "2024-05-31").await;

    let config = config_for(&server, Some("secret-token"));
    let client: Arc<dyn DataProvider> = Arc::new(FinMindClient::from_config(&config).unwrap());
    let fetcher = StockDataFetcher::new(vec![client], &config.fetch).with_as_of(date(31));

    let snapshot = fetcher
        .fetch_snapshot(&StockInfo::new("2330", "台積電", Market::Twse))
        .await
        .unwrap();

    assert_eq!(snapshot.bars.len(), 2);
    assert_eq!(snapshot.eps, Some(34.0));
    let roe = snapshot.roe.unwrap();
    assert!((roe - 20.0).abs() < 1e-9, "roe = {}", roe);
    assert_eq!(snapshot.shares_issued, Some(25_930_380_458.0));
    assert_eq!(snapshot.valuation.and_then(|v| v.per), Some(24.0));

    let statement_requests = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.query().unwrap_or_default().contains("FinancialStatements"))
        .count();
    assert_eq!(statement_requests, 1);
}
