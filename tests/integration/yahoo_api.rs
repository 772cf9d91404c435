//! Yahoo client against a local mock server

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::logging;
use finance_etl::api::{FinancialDataProvider, TickerUniverse, YahooClient};
use finance_etl::error::EtlError;
use finance_etl::models::{Config, Frequency, StatementKind, Ticker};
use finance_etl::validation::is_valid;

const TIMESERIES_PATH: &str = "/ws/fundamentals-timeseries/v1/finance/timeseries/AAPL";

fn client_for(server: &MockServer) -> YahooClient {
    let config = Config {
        yahoo_base_url: server.uri(),
        rate_limit_per_minute: 0,
        ..Config::default()
    };
    YahooClient::new(&config).unwrap()
}

fn item(name: &str, points: &[(&str, f64)]) -> Value {
    let values: Vec<Value> = points
        .iter()
        .map(|(date, value)| {
            json!({
                "asOfDate": date,
                "periodType": "12M",
                "currencyCode": "USD",
                "reportedValue": { "raw": value }
            })
        })
        .collect();
    let mut result = json!({ "meta": { "symbol": ["AAPL"], "type": [name] } });
    result[name] = Value::Array(values);
    result
}

async fn mount_quote(server: &MockServer, symbol: &str, result: Value) {
    Mock::given(method("GET"))
        .and(path("/v7/finance/quote"))
        .and(query_param("symbols", symbol))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "quoteResponse": { "result": result, "error": null }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fetch_snapshot_combines_quote_and_timeseries() {
    logging::init_test_logging();
    let server = MockServer::start().await;

    mount_quote(
        &server,
        "AAPL",
        json!([{ "symbol": "AAPL", "marketCap": 3.4e12, "currency": "USD" }]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path(TIMESERIES_PATH))
        .and(query_param("type", "annualTotalRevenue,annualFreeCashFlow,annualTotalAssets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "timeseries": {
                "result": [
                    item(
                        "annualTotalRevenue",
                        &[("2023-09-30", 3.83e11), ("2024-09-30", 3.91e11)]
                    ),
                    item("annualFreeCashFlow", &[("2024-09-30", 1.08e11)]),
                    item("annualTotalAssets", &[("2024-09-30", 3.65e11)])
                ],
                "error": null
            }
        })))
        .mount(&server)
        .await;

    let snapshot = client_for(&server)
        .fetch_snapshot("AAPL", Frequency::Annual)
        .await
        .unwrap();

    assert_eq!(snapshot.market_cap, Some(3.4e12));
    assert_eq!(snapshot.total_revenue, Some(3.91e11));
    assert_eq!(snapshot.period_label.as_deref(), Some("2024-09-30"));
    assert!(is_valid(&snapshot));
}

#[tokio::test]
async fn test_stale_revenue_does_not_fill_latest_snapshot() {
    logging::init_test_logging();
    let server = MockServer::start().await;

    mount_quote(
        &server,
        "AAPL",
        json!([{ "symbol": "AAPL", "marketCap": 2.1e9, "currency": "USD" }]),
    )
    .await;
    let mut revenue = item("annualTotalRevenue", &[("2020-12-31", 5e8)]);
    if let Some(points) = revenue["annualTotalRevenue"].as_array_mut() {
        for date in ["2021-12-31", "2022-12-31", "2024-12-31"] {
            points.push(json!({ "asOfDate": date, "periodType": "12M", "currencyCode": "USD" }));
        }
    }
    Mock::given(method("GET"))
        .and(path(TIMESERIES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "timeseries": {
                "result": [
                    revenue,
                    item("annualFreeCashFlow", &[("2024-12-31", 4e7)]),
                    item("annualTotalAssets", &[("2024-12-31", 1.2e9)])
                ],
                "error": null
            }
        })))
        .mount(&server)
        .await;

    let snapshot = client_for(&server)
        .fetch_snapshot("AAPL", Frequency::Annual)
        .await
        .unwrap();

    assert_eq!(snapshot.period_label.as_deref(), Some("2024-12-31"));
    assert_eq!(snapshot.total_revenue, None);
    assert!(!is_valid(&snapshot));
}

#[tokio::test]
async fn test_unknown_symbol_is_not_found() {
    let server = MockServer::start().await;
    mount_quote(&server, "XYZ123", json!([])).await;

    let result = client_for(&server).fetch_snapshot("XYZ123", Frequency::Annual).await;
    assert_matches!(result, Err(EtlError::NotFound(symbol)) if symbol == "XYZ123");
}

#[tokio::test]
async fn test_http_status_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v7/finance/quote"))
        .and(query_param("symbols", "SLOW"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v7/finance/quote"))
        .and(query_param("symbols", "BROKEN"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert_matches!(client.get_quote("SLOW").await, Err(EtlError::RateLimited));
    assert_matches!(client.get_quote("BROKEN").await, Err(EtlError::Api(_)));
    assert_matches!(client.get_quote("MISSING").await, Err(EtlError::NotFound(_)));
}

#[tokio::test]
async fn test_fetch_statement_groups_periods() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TIMESERIES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "timeseries": {
                "result": [
                    item(
                        "annualTotalAssets",
                        &[("2022-09-30", 3.52e11), ("2023-09-30", 3.53e11)]
                    ),
                    item("annualTotalDebt", &[("2023-09-30", 1.11e11)])
                ],
                "error": null
            }
        })))
        .mount(&server)
        .await;

    let periods = client_for(&server)
        .fetch_statement("AAPL", StatementKind::BalanceSheet, Frequency::Annual)
        .await
        .unwrap();

    assert_eq!(periods.len(), 2);
    assert_eq!(periods[0].values.len(), 1);
    assert_eq!(periods[1].values["TotalDebt"], 1.11e11);
    assert_eq!(periods[1].currency_code.as_deref(), Some("USD"));
}

#[tokio::test]
async fn test_candidates_come_from_universe() {
    let server = MockServer::start().await;
    let universe = TickerUniverse::from_tickers(vec![
        Ticker::new("AAPL", "USA"),
        Ticker::new("SAP", "Germany"),
    ]);
    let client = client_for(&server).with_universe(universe);

    let usa = client.list_candidate_tickers("USA").await.unwrap();
    assert_eq!(usa, vec![Ticker::new("AAPL", "USA")]);
    assert!(client.list_candidate_tickers("Japan").await.unwrap().is_empty());
}
