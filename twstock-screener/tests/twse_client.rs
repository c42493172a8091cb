//! Integration tests for the TWSE OpenAPI / announcement client.

use chrono::NaiveDate;
use serde_json::json;
use twstock_common::config::Config;
use twstock_screener::data::{DataProvider, Market, TwseClient};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> TwseClient {
    let mut config = Config::default();
    config.twse.openapi_url = server.uri();
    config.twse.www_url = server.uri();
    TwseClient::from_config(&config).unwrap()
}

async fn mount_quotes(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/exchangeReport/STOCK_DAY_ALL"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"Code": "2330", "Name": "台積電", "TradeVolume": "25,312,000",
             "ClosingPrice": "612.00", "Change": "+5.0000"},
            {"Code": "0050", "Name": "元大台灣50", "TradeVolume": "8,000,000",
             "ClosingPrice": "150.20", "Change": "-0.3500"},
            {"Code": "1101", "Name": "台泥", "TradeVolume": "0",
             "ClosingPrice": "", "Change": ""}
        ])))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_daily_quotes_are_parsed_and_cached() {
    let server = MockServer::start().await;
    mount_quotes(&server).await;
    let client = client_for(&server);

    let quotes = client.daily_quotes().await.unwrap();
    assert_eq!(quotes.len(), 3);
    assert_eq!(quotes["2330"].close(), Some(612.0));
    assert_eq!(quotes["2330"].volume(), Some(25_312_000.0));
    assert_eq!(quotes["1101"].close(), None);

    // Served from the hourly cache; the mock expects a single call.
    let again = client.daily_quotes().await.unwrap();
    assert_eq!(again.len(), 3);
}

#[tokio::test]
async fn test_stock_list_excludes_funds() {
    let server = MockServer::start().await;
    mount_quotes(&server).await;
    let client = client_for(&server);

    let stocks = client.list_stocks().await.unwrap();
    let ids: Vec<&str> = stocks.iter().map(|s| s.stock_id.as_str()).collect();

    assert_eq!(ids, vec!["1101", "2330"]);
    assert!(stocks.iter().all(|s| s.market == Market::Twse));
}

#[tokio::test]
async fn test_valuation_from_bwibbu() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exchangeReport/BWIBBU_ALL"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"Code": "2330", "Name": "台積電", "PEratio": "25.50", "DividendYield": "1.80", "PBratio": "6.20"},
            {"Code": "2888", "Name": "新光金", "PEratio": "-", "DividendYield": "0.00", "PBratio": "0.80"}
        ])))
        .mount(&server)
        .await;
    let client = client_for(&server);
    let as_of = NaiveDate::from_ymd_opt(2024, 5, 31).unwrap();

    let valuation = client.valuation("2330", as_of).await.unwrap();
    assert_eq!(valuation.per, Some(25.5));
    assert_eq!(valuation.dividend_yield, Some(1.8));

    let loss_maker = client.valuation("2888", as_of).await.unwrap();
    assert_eq!(loss_maker.per, None);

    assert!(client.valuation("9999", as_of).await.is_err());
}

#[tokio::test]
async fn test_attention_lists() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rwd/zh/announcement/notice"))
        .and(query_param("response", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stat": "OK",
            "data": [["1", "2330", "台積電", "第一款"], ["2", "3008", "大立光", "第二款"]]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rwd/zh/announcement/punish"))
        .and(query_param("response", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stat": "OK",
            "data": [["1", "113/05/02", "6666", "某某"]]
        })))
        .mount(&server)
        .await;
    let client = client_for(&server);

    let lists = client.attention_lists().await.unwrap();
    assert!(lists.is_warning("2330"));
    assert!(lists.is_warning("3008"));
    assert!(!lists.is_warning("6666"));
    assert!(lists.is_disposition("6666"));
}

#[tokio::test]
async fn test_http_error_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exchangeReport/STOCK_DAY_ALL"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let client = client_for(&server);

    assert!(client.health_check().await.is_err());
}
