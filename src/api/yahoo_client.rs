use chrono::{NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use url::Url;

use super::{ApiRateLimiter, FinancialDataProvider, TickerUniverse};
use crate::error::{EtlError, Result};
use crate::models::{Config, FinancialSnapshot, Frequency, StatementKind, StatementPeriod, Ticker};

/// Earliest period requested from the timeseries endpoint (1985-08-22)
const TIMESERIES_PERIOD_START: i64 = 493_590_046;

/// Line items that feed a validity snapshot
const SNAPSHOT_ITEMS: [&str; 3] = ["TotalRevenue", "FreeCashFlow", "TotalAssets"];

#[derive(Debug, Deserialize)]
struct QuoteEnvelope {
    #[serde(rename = "quoteResponse")]
    quote_response: QuoteResponse,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(default)]
    result: Vec<YahooQuote>,
    error: Option<Value>,
}

/// Subset of the quote payload the pipeline needs
#[derive(Debug, Clone, Deserialize)]
pub struct YahooQuote {
    pub symbol: String,
    #[serde(rename = "marketCap")]
    pub market_cap: Option<f64>,
    pub currency: Option<String>,
    #[serde(rename = "financialCurrency")]
    pub financial_currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimeseriesEnvelope {
    timeseries: TimeseriesBody,
}

#[derive(Debug, Deserialize)]
struct TimeseriesBody {
    #[serde(default)]
    result: Vec<Value>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    #[serde(rename = "asOfDate")]
    as_of_date: String,
    #[serde(rename = "currencyCode")]
    currency_code: Option<String>,
    #[serde(rename = "reportedValue")]
    reported_value: Option<ReportedValue>,
}

#[derive(Debug, Deserialize)]
struct ReportedValue {
    raw: Option<f64>,
}

/// One reported slot of a line item; `value` is `None` when the period was
/// reported without a figure
#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesPoint {
    pub as_of_date: NaiveDate,
    pub currency_code: Option<String>,
    pub value: Option<f64>,
}

/// Line item name (without frequency prefix) to its points, oldest first
pub type Timeseries = BTreeMap<String, Vec<TimeseriesPoint>>;

/// Yahoo Finance client for quotes and fundamentals
pub struct YahooClient {
    client: Client,
    base_url: Url,
    rate_limiter: ApiRateLimiter,
    universe: TickerUniverse,
}

impl YahooClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; finance-etl/0.1)")
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(&config.yahoo_base_url)?,
            rate_limiter: ApiRateLimiter::new(config.rate_limit_per_minute),
            universe: TickerUniverse::default(),
        })
    }

    /// Candidate tickers served by `list_candidate_tickers`
    pub fn with_universe(mut self, universe: TickerUniverse) -> Self {
        self.universe = universe;
        self
    }

    async fn get_json(&self, url: Url, symbol: &str) -> Result<Value> {
        self.rate_limiter.wait().await;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(EtlError::NotFound(symbol.to_string())),
            StatusCode::TOO_MANY_REQUESTS => return Err(EtlError::RateLimited),
            status if !status.is_success() => {
                return Err(EtlError::Api(format!("HTTP {} for {}", status, symbol)));
            }
            _ => {}
        }

        Ok(response.json::<Value>().await?)
    }

    pub async fn get_quote(&self, symbol: &str) -> Result<YahooQuote> {
        let mut url = self.base_url.join("/v7/finance/quote")?;
        url.query_pairs_mut().append_pair("symbols", symbol);

        let body = self.get_json(url, symbol).await?;
        parse_quote(symbol, body)
    }

    pub async fn get_timeseries(
        &self,
        symbol: &str,
        frequency: Frequency,
        items: &[&str],
    ) -> Result<Timeseries> {
        let mut url = self
            .base_url
            .join("/ws/fundamentals-timeseries/v1/finance/timeseries/")?;
        url.path_segments_mut()
            .map_err(|_| {
                EtlError::Config(format!("base URL cannot carry a path: {}", self.base_url))
            })?
            .pop_if_empty()
            .push(symbol);

        let types: Vec<String> = items
            .iter()
            .map(|item| format!("{}{}", frequency.as_str(), item))
            .collect();
        url.query_pairs_mut()
            .append_pair("symbol", symbol)
            .append_pair("type", &types.join(","))
            .append_pair("period1", &TIMESERIES_PERIOD_START.to_string())
            .append_pair("period2", &Utc::now().timestamp().to_string());

        let body = self.get_json(url, symbol).await?;
        parse_timeseries(body, frequency)
    }
}

#[async_trait::async_trait]
impl FinancialDataProvider for YahooClient {
    async fn fetch_snapshot(
        &self,
        symbol: &str,
        frequency: Frequency,
    ) -> Result<FinancialSnapshot> {
        let quote = self.get_quote(symbol).await?;
        let series = self.get_timeseries(symbol, frequency, &SNAPSHOT_ITEMS).await?;
        let snapshot = build_snapshot(&quote, &series, frequency);
        debug!("Snapshot for {}: {:?}", symbol, snapshot);
        Ok(snapshot)
    }

    async fn list_candidate_tickers(&self, country: &str) -> Result<Vec<Ticker>> {
        let tickers = self.universe.for_country(country);
        if tickers.is_empty() {
            warn!("No candidate tickers listed for {}", country);
        }
        Ok(tickers)
    }

    async fn fetch_statement(
        &self,
        symbol: &str,
        kind: StatementKind,
        frequency: Frequency,
    ) -> Result<Vec<StatementPeriod>> {
        let series = self.get_timeseries(symbol, frequency, kind.line_items()).await?;
        let periods = group_periods(&series);
        info!("Fetched {} {} {} periods for {}", periods.len(), frequency, kind, symbol);
        Ok(periods)
    }
}

/// Extract the quote for `symbol`; an empty result means the ticker does not exist
pub fn parse_quote(symbol: &str, body: Value) -> Result<YahooQuote> {
    let envelope: QuoteEnvelope = serde_json::from_value(body)?;
    if let Some(error) = envelope.quote_response.error.filter(|e| !e.is_null()) {
        return Err(EtlError::Api(format!("quote error for {}: {}", symbol, error)));
    }

    envelope
        .quote_response
        .result
        .into_iter()
        .find(|q| q.symbol.eq_ignore_ascii_case(symbol))
        .ok_or_else(|| EtlError::NotFound(symbol.to_string()))
}

/// Collect every dated slot per line item, sorted by date. Slots reported
/// without a finite figure are kept with a `None` value.
pub fn parse_timeseries(body: Value, frequency: Frequency) -> Result<Timeseries> {
    let envelope: TimeseriesEnvelope = serde_json::from_value(body)?;
    if let Some(error) = envelope.timeseries.error.filter(|e| !e.is_null()) {
        return Err(EtlError::Api(format!("timeseries error: {}", error)));
    }

    let mut series = Timeseries::new();
    for result in &envelope.timeseries.result {
        let Some(type_name) = result.pointer("/meta/type/0").and_then(Value::as_str) else {
            continue;
        };
        let item = type_name.strip_prefix(frequency.as_str()).unwrap_or(type_name);
        let Some(entries) = result.get(type_name).and_then(Value::as_array) else {
            continue;
        };

        let mut points = Vec::new();
        for entry in entries.iter().filter(|e| !e.is_null()) {
            let raw: RawPoint = match serde_json::from_value(entry.clone()) {
                Ok(raw) => raw,
                Err(e) => {
                    debug!("Skipping malformed {} point: {}", type_name, e);
                    continue;
                }
            };
            let Ok(as_of_date) = NaiveDate::parse_from_str(&raw.as_of_date, "%Y-%m-%d") else {
                debug!("Skipping {} point with bad date {}", type_name, raw.as_of_date);
                continue;
            };
            points.push(TimeseriesPoint {
                as_of_date,
                currency_code: raw.currency_code,
                value: raw
                    .reported_value
                    .and_then(|v| v.raw)
                    .filter(|v| v.is_finite()),
            });
        }

        points.sort_by_key(|p| p.as_of_date);
        series.insert(item.to_string(), points);
    }

    Ok(series)
}

/// Newest date any of `items` reports, null slots included
fn latest_period(series: &Timeseries, items: &[&str]) -> Option<NaiveDate> {
    items
        .iter()
        .filter_map(|item| series.get(*item))
        .flat_map(|points| points.iter().map(|p| p.as_of_date))
        .max()
}

fn point_at<'a>(
    series: &'a Timeseries,
    item: &str,
    date: NaiveDate,
) -> Option<&'a TimeseriesPoint> {
    series
        .get(item)
        .and_then(|points| points.iter().rev().find(|p| p.as_of_date == date))
}

/// Combine a quote with the figures of the latest reported period. A field
/// that period leaves null stays `None` even if an older period has it.
pub fn build_snapshot(
    quote: &YahooQuote,
    series: &Timeseries,
    frequency: Frequency,
) -> FinancialSnapshot {
    let period = latest_period(series, &SNAPSHOT_ITEMS);
    let at_period = |item: &str| period.and_then(|date| point_at(series, item, date));

    let revenue = at_period("TotalRevenue");
    let free_cash_flow = at_period("FreeCashFlow");
    let assets = at_period("TotalAssets");

    let currency_code = quote
        .currency
        .clone()
        .or_else(|| quote.financial_currency.clone())
        .or_else(|| {
            [revenue, free_cash_flow, assets]
                .into_iter()
                .flatten()
                .find_map(|p| p.currency_code.clone())
        });

    FinancialSnapshot {
        symbol: quote.symbol.to_uppercase(),
        frequency,
        period_label: period.map(|d| d.format("%Y-%m-%d").to_string()),
        market_cap: quote.market_cap,
        total_revenue: revenue.and_then(|p| p.value),
        free_cash_flow: free_cash_flow.and_then(|p| p.value),
        total_assets: assets.and_then(|p| p.value),
        currency_code,
    }
}

/// Regroup per-item series into per-period statements, oldest first
pub fn group_periods(series: &Timeseries) -> Vec<StatementPeriod> {
    let mut periods: BTreeMap<NaiveDate, StatementPeriod> = BTreeMap::new();
    for (item, points) in series {
        for point in points {
            let Some(value) = point.value else {
                continue;
            };
            let period = periods.entry(point.as_of_date).or_insert_with(|| StatementPeriod {
                report_date: point.as_of_date,
                currency_code: None,
                values: BTreeMap::new(),
            });
            if period.currency_code.is_none() {
                period.currency_code = point.currency_code.clone();
            }
            period.values.insert(item.clone(), value);
        }
    }
    periods.into_values().collect()
}
