use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::EtlError;
use crate::validation::IncrementRule;

/// Reporting frequency of financial statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Annual,
    Quarterly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Annual => "annual",
            Frequency::Quarterly => "quarterly",
        }
    }
}

impl Default for Frequency {
    fn default() -> Self {
        Frequency::Annual
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "annual" | "yearly" => Ok(Frequency::Annual),
            "quarterly" => Ok(Frequency::Quarterly),
            other => Err(EtlError::Config(format!("unknown frequency: {}", other))),
        }
    }
}

/// Financial statements extracted into their own tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum StatementKind {
    #[value(name = "balance_sheet")]
    BalanceSheet,
    #[value(name = "cashflow")]
    CashFlow,
    #[value(name = "income_stmt")]
    IncomeStatement,
}

impl StatementKind {
    pub const ALL: [StatementKind; 3] = [
        StatementKind::BalanceSheet,
        StatementKind::CashFlow,
        StatementKind::IncomeStatement,
    ];

    /// Name of the table the statement is stored in
    pub fn table_name(&self) -> &'static str {
        match self {
            StatementKind::BalanceSheet => "balance_sheet",
            StatementKind::CashFlow => "cashflow",
            StatementKind::IncomeStatement => "income_stmt",
        }
    }

    /// Line items requested from the upstream API for this statement
    pub fn line_items(&self) -> &'static [&'static str] {
        match self {
            StatementKind::BalanceSheet => &[
                "TotalAssets",
                "CurrentAssets",
                "CashAndCashEquivalents",
                "TotalLiabilitiesNetMinorityInterest",
                "CurrentLiabilities",
                "TotalDebt",
                "StockholdersEquity",
                "OrdinarySharesNumber",
            ],
            StatementKind::CashFlow => &[
                "OperatingCashFlow",
                "InvestingCashFlow",
                "FinancingCashFlow",
                "CapitalExpenditure",
                "FreeCashFlow",
                "RepurchaseOfCapitalStock",
                "CashDividendsPaid",
            ],
            StatementKind::IncomeStatement => &[
                "TotalRevenue",
                "CostOfRevenue",
                "GrossProfit",
                "OperatingIncome",
                "NetIncome",
                "EBITDA",
                "DilutedEPS",
                "BasicEPS",
            ],
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Candidate ticker from the ticker universe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub category_name: Option<String>,
    pub country: String,
}

impl Ticker {
    pub fn new(symbol: &str, country: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: None,
            exchange: None,
            category_name: None,
            country: country.to_string(),
        }
    }
}

/// Extracted values for one ticker at its latest reporting period
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FinancialSnapshot {
    pub symbol: String,
    pub frequency: Frequency,
    /// Fiscal period end of the most recent reported figure
    pub period_label: Option<String>,
    pub market_cap: Option<f64>,
    pub total_revenue: Option<f64>,
    pub free_cash_flow: Option<f64>,
    pub total_assets: Option<f64>,
    pub currency_code: Option<String>,
}

impl FinancialSnapshot {
    /// Build a snapshot from a loosely typed field mapping.
    ///
    /// Numbers may be JSON numbers or numeric strings; anything else (null, NaN,
    /// text) leaves the field empty. Keys are snake_case with the short aliases
    /// `revenue`, `assets` and `currency` accepted.
    pub fn from_map(symbol: &str, frequency: Frequency, fields: &Map<String, Value>) -> Self {
        let number = |keys: &[&str]| keys.iter().find_map(|k| fields.get(*k).and_then(as_number));
        let text = |keys: &[&str]| {
            keys.iter().find_map(|k| {
                fields
                    .get(*k)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
        };

        Self {
            symbol: symbol.to_string(),
            frequency,
            period_label: text(&["period_label", "period"]),
            market_cap: number(&["market_cap"]),
            total_revenue: number(&["total_revenue", "revenue"]),
            free_cash_flow: number(&["free_cash_flow"]),
            total_assets: number(&["total_assets", "assets"]),
            currency_code: text(&["currency_code", "currency"]),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (!n.is_nan()).then_some(n)
}

/// Row of the `valid_tickers` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidTicker {
    pub symbol: String,
    pub period_label: Option<String>,
    pub currency_code: String,
    pub market_cap: f64,
    pub total_revenue: f64,
    pub free_cash_flow: f64,
    pub total_assets: f64,
    pub validity: bool,
    pub insert_date: NaiveDate,
}

impl ValidTicker {
    /// Returns `None` unless every required field of the snapshot is present
    pub fn from_snapshot(snapshot: &FinancialSnapshot, insert_date: NaiveDate) -> Option<Self> {
        let present = |v: Option<f64>| v.filter(|n| !n.is_nan());
        Some(Self {
            symbol: snapshot.symbol.clone(),
            period_label: snapshot.period_label.clone(),
            currency_code: snapshot
                .currency_code
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())?
                .to_string(),
            market_cap: present(snapshot.market_cap)?,
            total_revenue: present(snapshot.total_revenue)?,
            free_cash_flow: present(snapshot.free_cash_flow)?,
            total_assets: present(snapshot.total_assets)?,
            validity: true,
            insert_date,
        })
    }
}

/// One reported period of a financial statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementPeriod {
    pub report_date: NaiveDate,
    pub currency_code: Option<String>,
    pub values: BTreeMap<String, f64>,
}

/// Row of a statement table (`balance_sheet`, `cashflow`, `income_stmt`)
#[derive(Debug, Clone, PartialEq)]
pub struct StatementRecord {
    pub symbol: String,
    pub insert_date: NaiveDate,
    pub report_date: NaiveDate,
    pub currency_code: String,
    pub frequency: Frequency,
    /// JSON object of line item values
    pub data: String,
}

/// Configuration for the application
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the database target, used to look up `{PROVIDER}_DATABASE_URL`
    pub provider: String,
    pub database_url: String,
    pub yahoo_base_url: String,
    pub tickers_list_path: String,
    pub countries: Vec<String>,
    pub batch_size: usize,
    pub migration_batch_size: usize,
    pub rate_limit_per_minute: u32,
    pub allowed_currencies: Vec<String>,
    pub incremental_fields: Vec<String>,
    pub increment_rule: IncrementRule,
    pub tolerated_breaks: usize,
    pub backup_tables: Vec<String>,
    pub backup_dir: String,
}

pub const DEFAULT_CURRENCIES: [&str; 7] = ["USD", "EUR", "GBP", "JPY", "CAD", "AUD", "CHF"];

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: "LOCAL".to_string(),
            database_url: "finance.db".to_string(),
            yahoo_base_url: "https://query2.finance.yahoo.com".to_string(),
            tickers_list_path: "data/tickers_list.csv".to_string(),
            countries: vec!["USA".to_string()],
            batch_size: 100,
            migration_batch_size: 5000,
            rate_limit_per_minute: 60,
            allowed_currencies: DEFAULT_CURRENCIES.iter().map(|c| c.to_string()).collect(),
            incremental_fields: vec!["TotalAssets".to_string()],
            increment_rule: IncrementRule::StrictlyIncreasing,
            tolerated_breaks: 0,
            backup_tables: ["balance_sheet", "cashflow", "income_stmt", "valid_tickers"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            backup_dir: "backups".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, EtlError> {
        dotenvy::dotenv().ok(); // Load .env file if it exists
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EtlError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let provider = lookup("PROVIDER")
            .map(|p| p.trim().to_uppercase())
            .filter(|p| !p.is_empty())
            .unwrap_or(defaults.provider);

        let database_url = lookup(&format!("{}_DATABASE_URL", provider))
            .or_else(|| lookup("DATABASE_URL"))
            .unwrap_or(defaults.database_url);

        let increment_rule = match lookup("INCREMENT_RULE") {
            Some(rule) => rule.parse()?,
            None => defaults.increment_rule,
        };

        Ok(Config {
            provider,
            database_url,
            yahoo_base_url: lookup("YAHOO_BASE_URL").unwrap_or(defaults.yahoo_base_url),
            tickers_list_path: lookup("TICKERS_LIST_PATH").unwrap_or(defaults.tickers_list_path),
            countries: lookup("COUNTRIES").map(|v| split_list(&v)).unwrap_or(defaults.countries),
            batch_size: parse_or(lookup("BATCH_SIZE"), defaults.batch_size).max(1),
            migration_batch_size: parse_or(
                lookup("MIGRATION_BATCH_SIZE"),
                defaults.migration_batch_size,
            )
            .max(1),
            rate_limit_per_minute: parse_or(
                lookup("RATE_LIMIT_PER_MINUTE"),
                defaults.rate_limit_per_minute,
            ),
            allowed_currencies: lookup("ALLOWED_CURRENCIES")
                .map(|v| split_list(&v).into_iter().map(|c| c.to_uppercase()).collect())
                .unwrap_or(defaults.allowed_currencies),
            incremental_fields: lookup("INCREMENTAL_FIELDS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.incremental_fields),
            increment_rule,
            tolerated_breaks: parse_or(
                lookup("INCREMENT_TOLERATED_BREAKS"),
                defaults.tolerated_breaks,
            ),
            backup_tables: lookup("BACKUP_TABLES")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.backup_tables),
            backup_dir: lookup("BACKUP_DIR").unwrap_or(defaults.backup_dir),
        })
    }

    /// Database URL of another provider, e.g. the hosted migration target
    pub fn database_url_for(provider: &str) -> Result<String, EtlError> {
        let key = format!("{}_DATABASE_URL", provider.trim().to_uppercase());
        std::env::var(&key)
            .map_err(|_| EtlError::Config(format!("{} environment variable required", key)))
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
