//! Candidate ticker list loaded from a CSV export
//!
//! Expected header: `Ticker,Name,Exchange,Category Name,Country`.

use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::Ticker;

#[derive(Debug, Deserialize)]
struct UniverseRow {
    #[serde(rename = "Ticker")]
    ticker: String,
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Exchange")]
    exchange: Option<String>,
    #[serde(rename = "Category Name")]
    category_name: Option<String>,
    #[serde(rename = "Country")]
    country: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TickerUniverse {
    tickers: Vec<Ticker>,
}

impl TickerUniverse {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let universe = Self::from_reader(file)?;
        info!("Loaded {} tickers from {}", universe.len(), path.as_ref().display());
        Ok(universe)
    }

    /// Blank symbols are dropped and the first occurrence of a symbol wins
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut seen = HashSet::new();
        let mut tickers = Vec::new();

        for row in csv_reader.deserialize::<UniverseRow>() {
            let row = row?;
            let symbol = row.ticker.trim().to_uppercase();
            if symbol.is_empty() || !seen.insert(symbol.clone()) {
                debug!("Skipping blank or duplicate ticker row: {:?}", row.ticker);
                continue;
            }
            tickers.push(Ticker {
                symbol,
                name: row.name.map(|n| n.replace(['"', '\''], "")),
                exchange: row.exchange,
                category_name: row.category_name,
                country: row.country.unwrap_or_default(),
            });
        }

        Ok(Self { tickers })
    }

    pub fn from_tickers(tickers: Vec<Ticker>) -> Self {
        Self { tickers }
    }

    /// Tickers of a country, compared case-insensitively
    pub fn for_country(&self, country: &str) -> Vec<Ticker> {
        let country = country.trim();
        self.tickers
            .iter()
            .filter(|t| t.country.eq_ignore_ascii_case(country))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }
}
