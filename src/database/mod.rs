use chrono::NaiveDate;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{Row, SqlitePool, Transaction};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{EtlError, Result};
use crate::models::{Frequency, StatementKind, Ticker, ValidTicker};

pub mod migration;
pub mod records;

pub use records::{snapshot_record, Record, SqlValue, CSV_NULL, UNREPORTED_PERIOD};

/// What to do when an inserted row collides with an existing key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Abort the whole batch with `ConstraintViolation`
    Fail,
    /// Keep the existing row
    Ignore,
    /// Overwrite the existing row
    Replace,
}

impl OnConflict {
    fn insert_verb(&self) -> &'static str {
        match self {
            OnConflict::Fail => "INSERT",
            OnConflict::Ignore => "INSERT OR IGNORE",
            OnConflict::Replace => "INSERT OR REPLACE",
        }
    }
}

/// A valid ticker due for a statement refresh
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshTarget {
    pub symbol: String,
    pub currency_code: String,
    pub last_insert: Option<NaiveDate>,
}

/// SQLite-backed store for tickers, snapshots and statements
#[derive(Clone, Debug)]
pub struct DatabaseManager {
    pool: SqlitePool,
    url: String,
}

impl DatabaseManager {
    /// Open (creating if missing) the database and ensure the schema exists
    pub async fn new(database_url: &str) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");
        let options = connect_options(database_url)?.create_if_missing(true);

        let options = if in_memory {
            options
        } else {
            options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
        };

        // Every connection to an in-memory database is a separate database
        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .acquire_timeout(Duration::from_secs(30));
        if in_memory {
            pool_options = pool_options
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>);
        }

        let pool = pool_options.connect_with(options).await?;
        Self::create_schema(&pool).await?;
        info!("Database ready at {}", database_url);

        Ok(Self {
            pool,
            url: database_url.to_string(),
        })
    }

    async fn create_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tickers_list (
                ticker TEXT PRIMARY KEY,
                name TEXT,
                exchange TEXT,
                category_name TEXT,
                country TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS valid_tickers (
                ticker TEXT PRIMARY KEY,
                period_label TEXT,
                currency_code TEXT NOT NULL,
                market_cap REAL NOT NULL,
                total_revenue REAL NOT NULL,
                free_cash_flow REAL NOT NULL,
                total_assets REAL NOT NULL,
                validity INTEGER NOT NULL DEFAULT 1,
                insert_date DATE NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS financial_snapshots (
                ticker TEXT NOT NULL,
                period_label TEXT NOT NULL,
                frequency TEXT NOT NULL,
                market_cap REAL,
                total_revenue REAL,
                free_cash_flow REAL,
                total_assets REAL,
                currency_code TEXT,
                insert_date DATE NOT NULL,
                PRIMARY KEY (ticker, period_label, frequency)
            )
            "#,
        )
        .execute(pool)
        .await?;

        for kind in StatementKind::ALL {
            let table = kind.table_name();
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    ticker TEXT NOT NULL,
                    insert_date DATE NOT NULL,
                    report_date DATE NOT NULL,
                    currency_code TEXT NOT NULL,
                    frequency TEXT NOT NULL,
                    data TEXT NOT NULL,
                    PRIMARY KEY (ticker, report_date, frequency)
                )
                "#
            ))
            .execute(pool)
            .await?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_insert_date \
                 ON {table}(ticker, frequency, insert_date)"
            ))
            .execute(pool)
            .await?;
        }

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_valid_tickers_validity ON valid_tickers(validity)",
        )
        .execute(pool)
        .await?;

        debug!("Schema verified");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Insert all rows in one transaction; any duplicate key rolls back the whole batch
    pub async fn insert_batch(&self, table: &str, rows: &[Record]) -> Result<u64> {
        self.insert_batch_with(table, rows, OnConflict::Fail).await
    }

    /// Insert all rows in one transaction with an explicit conflict policy
    pub async fn insert_batch_with(
        &self,
        table: &str,
        rows: &[Record],
        on_conflict: OnConflict,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let inserted = insert_rows(&mut tx, table, rows, on_conflict).await?;
        tx.commit().await?;

        debug!("Inserted {} of {} rows into {}", inserted, rows.len(), table);
        Ok(inserted)
    }

    /// Swap the candidate ticker list for a fresh one
    pub async fn replace_tickers_list(&self, tickers: &[Ticker]) -> Result<u64> {
        let records: Vec<Record> = tickers.iter().map(Record::from).collect();

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM tickers_list").execute(&mut *tx).await?;
        let inserted = insert_rows(&mut tx, "tickers_list", &records, OnConflict::Replace).await?;
        tx.commit().await?;

        info!("Stored {} candidate tickers", inserted);
        Ok(inserted)
    }

    pub async fn candidate_tickers(&self) -> Result<Vec<Ticker>> {
        let rows = sqlx::query(
            "SELECT ticker, name, exchange, category_name, country \
             FROM tickers_list ORDER BY ticker",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Ticker> {
                Ok(Ticker {
                    symbol: row.try_get("ticker")?,
                    name: row.try_get("name")?,
                    exchange: row.try_get("exchange")?,
                    category_name: row.try_get("category_name")?,
                    country: row.try_get("country")?,
                })
            })
            .collect()
    }

    /// Symbols already evaluated into `valid_tickers`, whatever their current validity
    pub async fn validated_symbols(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT ticker FROM valid_tickers")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("ticker").map_err(EtlError::from))
            .collect()
    }

    pub async fn valid_tickers(&self) -> Result<Vec<ValidTicker>> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, period_label, currency_code, market_cap, total_revenue,
                   free_cash_flow, total_assets, validity, insert_date
            FROM valid_tickers
            ORDER BY ticker
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ValidTicker> {
                Ok(ValidTicker {
                    symbol: row.try_get("ticker")?,
                    period_label: row.try_get("period_label")?,
                    currency_code: row.try_get("currency_code")?,
                    market_cap: row.try_get("market_cap")?,
                    total_revenue: row.try_get("total_revenue")?,
                    free_cash_flow: row.try_get("free_cash_flow")?,
                    total_assets: row.try_get("total_assets")?,
                    validity: row.try_get::<i64, _>("validity")? != 0,
                    insert_date: row.try_get("insert_date")?,
                })
            })
            .collect()
    }

    /// Returns false when the ticker is not in `valid_tickers`
    pub async fn set_validity(&self, symbol: &str, validity: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE valid_tickers SET validity = ? WHERE ticker = ?")
            .bind(validity as i64)
            .bind(symbol)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Valid tickers ordered by stalest statement first, never-fetched ones leading
    pub async fn tickers_to_refresh(
        &self,
        kind: StatementKind,
        frequency: Frequency,
        limit: usize,
    ) -> Result<Vec<RefreshTarget>> {
        let sql = format!(
            r#"
            SELECT vt.ticker AS ticker, vt.currency_code AS currency_code,
                   s.last_insert AS last_insert
            FROM valid_tickers vt
            LEFT JOIN (
                SELECT ticker, MAX(insert_date) AS last_insert
                FROM {}
                WHERE frequency = ?
                GROUP BY ticker
            ) s ON s.ticker = vt.ticker
            WHERE vt.validity = 1
            ORDER BY s.last_insert IS NOT NULL, s.last_insert, vt.ticker
            LIMIT ?
            "#,
            kind.table_name()
        );

        let rows = sqlx::query(&sql)
            .bind(frequency.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<RefreshTarget> {
                Ok(RefreshTarget {
                    symbol: row.try_get("ticker")?,
                    currency_code: row.try_get("currency_code")?,
                    last_insert: row.try_get("last_insert")?,
                })
            })
            .collect()
    }

    /// User tables, sorted by name
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(EtlError::from))
            .collect()
    }

    /// The `CREATE TABLE` statement of a table, if it exists
    pub async fn table_definition(&self, table: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(row.try_get("sql")?),
            None => Ok(None),
        }
    }

    pub async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let sql = format!("PRAGMA table_info({})", quote_identifier(table)?);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(EtlError::from))
            .collect()
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) AS count FROM {}", quote_identifier(table)?);
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.try_get("count")?)
    }

    /// Primary key columns in key order
    pub async fn primary_key_columns(&self, table: &str) -> Result<Vec<String>> {
        let sql = format!("PRAGMA table_info({})", quote_identifier(table)?);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut keyed = rows
            .iter()
            .map(|row| -> Result<(i64, String)> {
                Ok((row.try_get("pk")?, row.try_get("name")?))
            })
            .collect::<Result<Vec<_>>>()?;
        keyed.retain(|(pk, _)| *pk > 0);
        keyed.sort();
        Ok(keyed.into_iter().map(|(_, name)| name).collect())
    }

    /// One page of a table in insertion order, or key order for `WITHOUT ROWID` tables
    pub async fn fetch_page(
        &self,
        table: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Record>> {
        let without_rowid = self
            .table_definition(table)
            .await?
            .map(|sql| sql.to_uppercase().contains("WITHOUT ROWID"))
            .unwrap_or(false);

        let order_by = if without_rowid {
            self.primary_key_columns(table)
                .await?
                .iter()
                .map(|column| format!("\"{}\"", column.replace('"', "\"\"")))
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            "rowid".to_string()
        };
        let sql = format!(
            "SELECT * FROM {} ORDER BY {} LIMIT ? OFFSET ?",
            quote_identifier(table)?,
            order_by
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| records::decode_row(row).map_err(EtlError::from))
            .collect()
    }

    /// Row count of every user table
    pub async fn table_counts(&self) -> Result<Vec<(String, i64)>> {
        let mut counts = Vec::new();
        for table in self.list_tables().await? {
            let count = self.count_rows(&table).await?;
            counts.push((table, count));
        }
        Ok(counts)
    }

    /// Run a statement that takes no bind parameters, such as DDL
    pub async fn execute_raw(&self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }
}

/// SQLite options for a `sqlite:` URL or a bare file path. Any other
/// `scheme://` URL is rejected before a connection is attempted.
fn connect_options(database_url: &str) -> Result<SqliteConnectOptions> {
    if let Some((scheme, _)) = database_url.split_once("://") {
        if !scheme.eq_ignore_ascii_case("sqlite") {
            return Err(EtlError::Config(format!(
                "unsupported database scheme '{}': only SQLite URLs or file paths are supported",
                scheme
            )));
        }
    }

    if database_url.starts_with("sqlite:") {
        Ok(SqliteConnectOptions::from_str(database_url)?)
    } else {
        Ok(SqliteConnectOptions::new().filename(database_url))
    }
}

async fn insert_rows(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    rows: &[Record],
    on_conflict: OnConflict,
) -> Result<u64> {
    let Some(first) = rows.first() else {
        return Ok(0);
    };
    let columns = first.columns();
    if columns.is_empty() {
        return Err(EtlError::SchemaMismatch {
            table: table.to_string(),
            message: "row has no columns".to_string(),
        });
    }

    let column_list = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "{} INTO {} ({}) VALUES ({})",
        on_conflict.insert_verb(),
        quote_identifier(table)?,
        column_list,
        placeholders
    );

    let mut inserted = 0;
    for (index, row) in rows.iter().enumerate() {
        if row.columns() != columns {
            return Err(EtlError::SchemaMismatch {
                table: table.to_string(),
                message: format!(
                    "row {} columns {:?} differ from {:?}",
                    index,
                    row.columns(),
                    columns
                ),
            });
        }

        let query = row
            .values()
            .iter()
            .fold(sqlx::query(&sql), |query, value| bind_value(query, value));
        let result = query
            .execute(&mut **tx)
            .await
            .map_err(|e| map_insert_error(table, e))?;
        inserted += result.rows_affected();
    }

    Ok(inserted)
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Integer(v) => query.bind(*v),
        SqlValue::Real(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Blob(v) => query.bind(v.as_slice()),
    }
}

fn map_insert_error(table: &str, err: sqlx::Error) -> EtlError {
    if let sqlx::Error::Database(db_err) = &err {
        if !matches!(db_err.kind(), sqlx::error::ErrorKind::Other) {
            return EtlError::ConstraintViolation {
                table: table.to_string(),
                message: db_err.message().to_string(),
            };
        }
    }
    EtlError::Database(err)
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`
pub fn validate_identifier(name: &str) -> Result<&str> {
    let mut chars = name.chars();
    let starts_ok = chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
    if starts_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(EtlError::InvalidIdentifier(name.to_string()))
    }
}

fn quote_identifier(name: &str) -> Result<String> {
    Ok(format!("\"{}\"", validate_identifier(name)?))
}
