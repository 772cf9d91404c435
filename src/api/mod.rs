use std::time::Duration;

use crate::error::Result;
use crate::models::{FinancialSnapshot, Frequency, StatementKind, StatementPeriod, Ticker};

pub mod ticker_universe;
pub mod yahoo_client;
pub use ticker_universe::TickerUniverse;
pub use yahoo_client::YahooClient;

/// Simple rate limiter for API requests
#[derive(Debug, Clone)]
pub struct ApiRateLimiter {
    delay_ms: u64,
}

impl ApiRateLimiter {
    /// Zero requests per minute disables the delay
    pub fn new(requests_per_minute: u32) -> Self {
        let delay_ms = if requests_per_minute > 0 {
            60_000 / requests_per_minute as u64
        } else {
            0
        };

        Self { delay_ms }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub async fn wait(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(self.delay()).await;
        }
    }
}

/// Source of raw financial data per ticker
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait FinancialDataProvider: Send + Sync {
    /// Latest values used to decide ticker validity; `NotFound` when the ticker is unknown
    async fn fetch_snapshot(&self, symbol: &str, frequency: Frequency) -> Result<FinancialSnapshot>;

    /// Tickers listed for a country
    async fn list_candidate_tickers(&self, country: &str) -> Result<Vec<Ticker>>;

    /// All reported periods of one statement, oldest first
    async fn fetch_statement(
        &self,
        symbol: &str,
        kind: StatementKind,
        frequency: Frequency,
    ) -> Result<Vec<StatementPeriod>>;
}
