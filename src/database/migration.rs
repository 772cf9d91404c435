//! Copying tables between databases and exporting them to CSV

use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{validate_identifier, DatabaseManager, OnConflict, SqlValue};
use crate::error::{EtlError, Result};

/// Tables whose names contain any of these markers belong to tooling, not data
const SKIPPED_TABLE_MARKERS: [&str; 3] = ["alembic", "dbt", "_sqlx_migrations"];

#[derive(Debug, Clone, PartialEq)]
pub struct TableMigration {
    pub table: String,
    pub source_rows: i64,
    /// Rows actually written; rows already present in the destination are not counted
    pub inserted: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    pub tables: Vec<TableMigration>,
    pub skipped: Vec<String>,
}

impl MigrationReport {
    pub fn total_inserted(&self) -> u64 {
        self.tables.iter().map(|t| t.inserted).sum()
    }
}

pub fn is_migratable(table: &str) -> bool {
    let lower = table.to_lowercase();
    !SKIPPED_TABLE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Copy every data table of `source` into `destination`.
///
/// Missing destination tables are created from the source definition. Rows
/// whose key already exists in the destination are left untouched, so running
/// a migration twice does not duplicate data.
pub async fn migrate(
    source: &DatabaseManager,
    destination: &DatabaseManager,
    batch_size: usize,
) -> Result<MigrationReport> {
    if batch_size == 0 {
        return Err(EtlError::Config("migration batch size must be positive".to_string()));
    }

    let mut report = MigrationReport::default();

    for table in source.list_tables().await? {
        if !is_migratable(&table) || validate_identifier(&table).is_err() {
            info!("Skipping table {}", table);
            report.skipped.push(table);
            continue;
        }

        if destination.table_definition(&table).await?.is_none() {
            match source.table_definition(&table).await? {
                Some(sql) => {
                    destination.execute_raw(&create_if_not_exists(&sql)).await?;
                    info!("Created table {} in destination", table);
                }
                None => {
                    warn!("Table {} disappeared from source, skipping", table);
                    report.skipped.push(table);
                    continue;
                }
            }
        }

        let source_rows = source.count_rows(&table).await?;
        let mut inserted = 0;
        let mut offset = 0;
        loop {
            let page = source.fetch_page(&table, batch_size, offset).await?;
            if page.is_empty() {
                break;
            }
            inserted += destination
                .insert_batch_with(&table, &page, OnConflict::Ignore)
                .await?;
            offset += page.len();
            if page.len() < batch_size {
                break;
            }
        }

        info!(
            "Migrated table {}: {} source rows, {} inserted",
            table, source_rows, inserted
        );
        report.tables.push(TableMigration {
            table,
            source_rows,
            inserted,
        });
    }

    Ok(report)
}

fn create_if_not_exists(sql: &str) -> String {
    const CREATE: &str = "CREATE TABLE ";
    const IF_NOT_EXISTS: &str = "IF NOT EXISTS";

    let sql = sql.trim_start();
    let starts_with = |text: &str, prefix: &str| {
        text.get(..prefix.len())
            .map_or(false, |head| head.eq_ignore_ascii_case(prefix))
    };

    if !starts_with(sql, CREATE) {
        return sql.to_string();
    }
    let rest = sql[CREATE.len()..].trim_start();
    if starts_with(rest, IF_NOT_EXISTS) {
        sql.to_string()
    } else {
        format!("{}{} {}", CREATE, IF_NOT_EXISTS, rest)
    }
}

/// Write each table to `<dir>/<table>_<YYYYMMDD>.csv` with a header row.
/// `NULL` is written as `\N`. Tables missing from the database are skipped
/// with a warning.
pub async fn export_tables(
    db: &DatabaseManager,
    tables: &[String],
    dir: &Path,
    batch_size: usize,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let stamp = Utc::now().format("%Y%m%d");
    let page_size = batch_size.max(1);
    let mut written = Vec::new();

    for table in tables {
        validate_identifier(table)?;
        if db.table_definition(table).await?.is_none() {
            warn!("Table {} not found, nothing to back up", table);
            continue;
        }

        let path = dir.join(format!("{}_{}.csv", table, stamp));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(db.table_columns(table).await?)?;

        let mut rows = 0;
        let mut offset = 0;
        loop {
            let page = db.fetch_page(table, page_size, offset).await?;
            for record in &page {
                writer.write_record(record.values().iter().map(SqlValue::to_csv_field))?;
            }
            rows += page.len();
            offset += page.len();
            if page.len() < page_size {
                break;
            }
        }
        writer.flush()?;

        info!("Backed up {} rows of {} to {}", rows, table, path.display());
        written.push(path);
    }

    Ok(written)
}
