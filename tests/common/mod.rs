//! Common test utilities and helpers

#![allow(dead_code)]

pub mod database;

pub use database::TestDatabase;

use async_trait::async_trait;
use std::collections::HashMap;

use finance_etl::api::FinancialDataProvider;
use finance_etl::error::{EtlError, Result};
use finance_etl::models::{FinancialSnapshot, Frequency, StatementKind, StatementPeriod, Ticker};

/// Test data utilities
pub mod test_data {
    use chrono::NaiveDate;
    use finance_etl::models::{Config, FinancialSnapshot, Frequency, StatementPeriod};
    use std::collections::BTreeMap;

    /// Snapshot with every required field present
    pub fn complete_snapshot(symbol: &str) -> FinancialSnapshot {
        FinancialSnapshot {
            symbol: symbol.to_string(),
            frequency: Frequency::Annual,
            period_label: Some("2024-09-30".to_string()),
            market_cap: Some(1e9),
            total_revenue: Some(5e8),
            free_cash_flow: Some(1e8),
            total_assets: Some(2e9),
            currency_code: Some("USD".to_string()),
        }
    }

    /// Yearly balance sheet periods with growing total assets, oldest first
    pub fn increasing_periods(years: i32) -> Vec<StatementPeriod> {
        (0..years)
            .map(|i| StatementPeriod {
                report_date: NaiveDate::from_ymd_opt(2020 + i, 12, 31).unwrap(),
                currency_code: Some("USD".to_string()),
                values: BTreeMap::from([
                    ("TotalAssets".to_string(), 1e9 + f64::from(i) * 1e8),
                    ("TotalDebt".to_string(), 2e8),
                ]),
            })
            .collect()
    }

    /// Defaults with a small batch size so flushing happens mid-run
    pub fn test_config() -> Config {
        Config {
            batch_size: 2,
            rate_limit_per_minute: 0,
            ..Config::default()
        }
    }

    pub fn countries() -> Vec<String> {
        vec!["USA".to_string()]
    }
}

/// Logging utilities for tests
pub mod logging {
    use std::sync::Once;
    use tracing::{debug, info};

    static INIT: Once = Once::new();

    /// Initialize test logging
    pub fn init_test_logging() {
        INIT.call_once(|| {
            // Another test binary may already own the global subscriber
            let _ = tracing::subscriber::set_global_default(
                tracing_subscriber::fmt()
                    .with_env_filter("finance_etl=debug,main=debug")
                    .with_test_writer()
                    .finish(),
            );
        });
    }

    pub fn log_test_step(step: &str) {
        info!("🧪 Test Step: {}", step);
    }

    pub fn log_test_data<T: std::fmt::Debug>(label: &str, data: &T) {
        debug!("📊 {}: {:?}", label, data);
    }
}

/// In-memory provider; unknown symbols are `NotFound`
#[derive(Default)]
pub struct StaticProvider {
    pub candidates: Vec<Ticker>,
    pub snapshots: HashMap<String, FinancialSnapshot>,
    pub statements: HashMap<(String, StatementKind), Vec<StatementPeriod>>,
}

impl StaticProvider {
    pub fn with_candidates(symbols: &[&str]) -> Self {
        Self {
            candidates: symbols.iter().map(|s| Ticker::new(s, "USA")).collect(),
            ..Default::default()
        }
    }

    pub fn snapshot(mut self, snapshot: FinancialSnapshot) -> Self {
        self.snapshots.insert(snapshot.symbol.clone(), snapshot);
        self
    }

    pub fn statement(
        mut self,
        symbol: &str,
        kind: StatementKind,
        periods: Vec<StatementPeriod>,
    ) -> Self {
        self.statements.insert((symbol.to_string(), kind), periods);
        self
    }
}

#[async_trait]
impl FinancialDataProvider for StaticProvider {
    async fn fetch_snapshot(
        &self,
        symbol: &str,
        frequency: Frequency,
    ) -> Result<FinancialSnapshot> {
        self.snapshots
            .get(symbol)
            .cloned()
            .map(|s| FinancialSnapshot { frequency, ..s })
            .ok_or_else(|| EtlError::NotFound(symbol.to_string()))
    }

    async fn list_candidate_tickers(&self, country: &str) -> Result<Vec<Ticker>> {
        Ok(self
            .candidates
            .iter()
            .filter(|t| t.country.eq_ignore_ascii_case(country))
            .cloned()
            .collect())
    }

    async fn fetch_statement(
        &self,
        symbol: &str,
        kind: StatementKind,
        _frequency: Frequency,
    ) -> Result<Vec<StatementPeriod>> {
        if !self.snapshots.contains_key(symbol) {
            return Err(EtlError::NotFound(symbol.to_string()));
        }
        Ok(self
            .statements
            .get(&(symbol.to_string(), kind))
            .cloned()
            .unwrap_or_default())
    }
}
