//! Dynamically typed rows used by batch inserts, migration and backups

use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::fmt;

use crate::models::{FinancialSnapshot, StatementRecord, Ticker, ValidTicker};

/// A single SQLite storage value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        if v.is_nan() {
            SqlValue::Null
        } else {
            SqlValue::Real(v)
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Text(v.format("%Y-%m-%d").to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// CSV field written for SQL `NULL`, so backups keep NULL apart from empty text
pub const CSV_NULL: &str = "\\N";

impl SqlValue {
    /// Field text for CSV backups; `NULL` becomes [`CSV_NULL`]
    pub fn to_csv_field(&self) -> String {
        match self {
            SqlValue::Null => CSV_NULL.to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => Ok(()),
            SqlValue::Integer(v) => write!(f, "{}", v),
            SqlValue::Real(v) => write!(f, "{}", v),
            SqlValue::Text(v) => f.write_str(v),
            SqlValue::Blob(bytes) => bytes.iter().try_for_each(|b| write!(f, "{:02x}", b)),
        }
    }
}

/// Ordered column/value pairs of one row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: &str, value: impl Into<SqlValue>) {
        self.columns.push(column.to_string());
        self.values.push(value.into());
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns.iter().position(|c| c == column).map(|i| &self.values[i])
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl From<&Ticker> for Record {
    fn from(ticker: &Ticker) -> Self {
        Record::new()
            .with("ticker", ticker.symbol.as_str())
            .with("name", ticker.name.clone())
            .with("exchange", ticker.exchange.clone())
            .with("category_name", ticker.category_name.clone())
            .with("country", ticker.country.as_str())
    }
}

impl From<&ValidTicker> for Record {
    fn from(row: &ValidTicker) -> Self {
        Record::new()
            .with("ticker", row.symbol.as_str())
            .with("period_label", row.period_label.clone())
            .with("currency_code", row.currency_code.as_str())
            .with("market_cap", row.market_cap)
            .with("total_revenue", row.total_revenue)
            .with("free_cash_flow", row.free_cash_flow)
            .with("total_assets", row.total_assets)
            .with("validity", row.validity)
            .with("insert_date", row.insert_date)
    }
}

impl From<&StatementRecord> for Record {
    fn from(row: &StatementRecord) -> Self {
        Record::new()
            .with("ticker", row.symbol.as_str())
            .with("insert_date", row.insert_date)
            .with("report_date", row.report_date)
            .with("currency_code", row.currency_code.as_str())
            .with("frequency", row.frequency.as_str())
            .with("data", row.data.as_str())
    }
}

/// Label stored for snapshots that carry no reported period
pub const UNREPORTED_PERIOD: &str = "unreported";

/// Row of the `financial_snapshots` table
pub fn snapshot_record(snapshot: &FinancialSnapshot, insert_date: NaiveDate) -> Record {
    Record::new()
        .with("ticker", snapshot.symbol.as_str())
        .with(
            "period_label",
            snapshot.period_label.as_deref().unwrap_or(UNREPORTED_PERIOD),
        )
        .with("frequency", snapshot.frequency.as_str())
        .with("market_cap", snapshot.market_cap)
        .with("total_revenue", snapshot.total_revenue)
        .with("free_cash_flow", snapshot.free_cash_flow)
        .with("total_assets", snapshot.total_assets)
        .with("currency_code", snapshot.currency_code.clone())
        .with("insert_date", insert_date)
}

/// Decode any SQLite row by the storage class of each value
pub(crate) fn decode_row(row: &SqliteRow) -> Result<Record, sqlx::Error> {
    let mut record = Record::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            let storage_class = raw.type_info().name().to_string();
            match storage_class.as_str() {
                "INTEGER" | "BOOLEAN" => SqlValue::Integer(row.try_get_unchecked::<i64, _>(i)?),
                "REAL" => SqlValue::Real(row.try_get_unchecked::<f64, _>(i)?),
                "BLOB" => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(i)?),
                _ => SqlValue::Text(row.try_get_unchecked::<String, _>(i)?),
            }
        };
        record.push(column.name(), value);
    }
    Ok(record)
}
