use chrono::{NaiveDate, Utc};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::api::FinancialDataProvider;
use crate::database::{snapshot_record, DatabaseManager, OnConflict, Record, RefreshTarget};
use crate::error::Result;
use crate::models::{
    Config, Frequency, StatementKind, StatementPeriod, StatementRecord, Ticker, ValidTicker,
};
use crate::validation::{SequenceChecker, TickerValidator};

/// Outcome of one validation pass over the candidate tickers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub candidates: usize,
    pub already_validated: usize,
    pub valid: usize,
    pub invalid: usize,
    pub not_found: usize,
    pub failed: usize,
}

/// Outcome of one statement extraction batch
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionReport {
    pub kind: StatementKind,
    pub frequency: Frequency,
    pub tickers: usize,
    pub periods_stored: u64,
    pub empty: usize,
    pub non_incremental: usize,
    pub failed: usize,
}

impl ExtractionReport {
    fn new(kind: StatementKind, frequency: Frequency) -> Self {
        Self {
            kind,
            frequency,
            tickers: 0,
            periods_stored: 0,
            empty: 0,
            non_incremental: 0,
            failed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub validation: ValidationReport,
    pub extractions: Vec<ExtractionReport>,
}

/// Drives extraction, validation and storage, one ticker at a time
pub struct DataCollector<P: FinancialDataProvider> {
    provider: P,
    database: DatabaseManager,
    config: Config,
    validator: TickerValidator,
    checker: SequenceChecker,
}

impl<P: FinancialDataProvider> DataCollector<P> {
    pub fn new(provider: P, database: DatabaseManager, config: Config) -> Self {
        let validator = TickerValidator::new(&config.allowed_currencies);
        let checker =
            SequenceChecker::new(config.increment_rule.clone()).tolerating(config.tolerated_breaks);

        Self {
            provider,
            database,
            config,
            validator,
            checker,
        }
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.database
    }

    /// Candidates of all countries, first occurrence of a symbol wins
    async fn candidates(&self, countries: &[String]) -> Result<Vec<Ticker>> {
        let mut seen = HashSet::new();
        let mut tickers = Vec::new();
        for country in countries {
            let listed = self.provider.list_candidate_tickers(country).await?;
            info!("{} candidate tickers listed for {}", listed.len(), country);
            tickers.extend(listed.into_iter().filter(|t| seen.insert(t.symbol.clone())));
        }
        Ok(tickers)
    }

    /// Replace the stored candidate list with the provider's current one
    pub async fn refresh_tickers_list(&self, countries: &[String]) -> Result<u64> {
        let tickers = self.candidates(countries).await?;
        self.database.replace_tickers_list(&tickers).await
    }

    /// Evaluate every candidate not yet present in `valid_tickers`.
    ///
    /// Provider failures are counted and logged; only storage errors abort the pass.
    pub async fn validate_tickers(
        &self,
        countries: &[String],
        frequency: Frequency,
    ) -> Result<ValidationReport> {
        let today = Utc::now().date_naive();
        let candidates = self.candidates(countries).await?;
        let known = self.database.validated_symbols().await?;
        let batch_size = self.config.batch_size.max(1);

        let mut report = ValidationReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        let mut snapshots = Vec::new();
        let mut valid = Vec::new();

        for ticker in &candidates {
            if known.contains(&ticker.symbol) {
                report.already_validated += 1;
                continue;
            }

            let snapshot = match self.provider.fetch_snapshot(&ticker.symbol, frequency).await {
                Ok(snapshot) => snapshot,
                Err(e) if e.is_not_found() => {
                    warn!("No data for {}: {}", ticker.symbol, e);
                    report.not_found += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Failed to fetch snapshot for {}: {}", ticker.symbol, e);
                    report.failed += 1;
                    continue;
                }
            };

            snapshots.push(snapshot_record(&snapshot, today));
            let verdict = self.validator.evaluate(&snapshot);
            match ValidTicker::from_snapshot(&snapshot, today) {
                Some(row) if verdict.is_valid() => {
                    debug!("{} is valid", ticker.symbol);
                    valid.push(Record::from(&row));
                    report.valid += 1;
                }
                _ => {
                    info!("{} rejected: {}", ticker.symbol, verdict);
                    report.invalid += 1;
                }
            }

            if snapshots.len() >= batch_size {
                self.flush_validation(&mut snapshots, &mut valid).await?;
            }
        }
        self.flush_validation(&mut snapshots, &mut valid).await?;

        info!(
            "Validation finished: {} candidates, {} valid, {} invalid, {} not found, \
             {} failed, {} skipped",
            report.candidates,
            report.valid,
            report.invalid,
            report.not_found,
            report.failed,
            report.already_validated
        );
        Ok(report)
    }

    async fn flush_validation(
        &self,
        snapshots: &mut Vec<Record>,
        valid: &mut Vec<Record>,
    ) -> Result<()> {
        self.database
            .insert_batch_with("financial_snapshots", snapshots, OnConflict::Replace)
            .await?;
        self.database.insert_batch("valid_tickers", valid).await?;
        snapshots.clear();
        valid.clear();
        Ok(())
    }

    /// Extract one statement for the stalest valid tickers, at most `batch_size` of them
    pub async fn extract_statements(
        &self,
        kind: StatementKind,
        frequency: Frequency,
    ) -> Result<ExtractionReport> {
        let today = Utc::now().date_naive();
        let targets = self
            .database
            .tickers_to_refresh(kind, frequency, self.config.batch_size)
            .await?;
        let mut report = ExtractionReport::new(kind, frequency);
        report.tickers = targets.len();
        info!("Extracting {} {} for {} tickers", frequency, kind, targets.len());

        for target in &targets {
            let fetched = self
                .provider
                .fetch_statement(&target.symbol, kind, frequency)
                .await;
            let mut periods = match fetched {
                Ok(periods) => periods,
                Err(e) => {
                    warn!("Failed to fetch {} for {}: {}, marking invalid", kind, target.symbol, e);
                    self.database.set_validity(&target.symbol, false).await?;
                    report.failed += 1;
                    continue;
                }
            };

            if periods.is_empty() {
                debug!("No {} periods reported for {}", kind, target.symbol);
                report.empty += 1;
                continue;
            }
            periods.sort_by_key(|p| p.report_date);

            if !self.is_incremental(&target.symbol, &periods) {
                report.non_incremental += 1;
                continue;
            }

            let records = statement_records(target, &periods, frequency, today)?;
            report.periods_stored += self
                .database
                .insert_batch_with(kind.table_name(), &records, OnConflict::Replace)
                .await?;
        }

        info!(
            "Extraction of {} finished: {} periods stored, {} empty, {} non-incremental, {} failed",
            kind, report.periods_stored, report.empty, report.non_incremental, report.failed
        );
        Ok(report)
    }

    /// Fields absent from every period are not applicable to this statement
    fn is_incremental(&self, symbol: &str, periods: &[StatementPeriod]) -> bool {
        for field in &self.config.incremental_fields {
            let values: Vec<Option<f64>> =
                periods.iter().map(|p| p.values.get(field).copied()).collect();
            if values.iter().all(Option::is_none) {
                continue;
            }
            match self.checker.check(&values) {
                Ok(true) => {}
                Ok(false) => {
                    warn!("{} of {} is not incremental, skipping", field, symbol);
                    return false;
                }
                Err(e) => {
                    warn!("{} of {} cannot be checked: {}, skipping", field, symbol, e);
                    return false;
                }
            }
        }
        true
    }

    /// Validation followed by every statement kind
    pub async fn run_batch(&self, countries: &[String], frequency: Frequency) -> Result<RunReport> {
        let validation = self.validate_tickers(countries, frequency).await?;
        let mut extractions = Vec::new();
        for kind in StatementKind::ALL {
            extractions.push(self.extract_statements(kind, frequency).await?);
        }
        Ok(RunReport {
            validation,
            extractions,
        })
    }
}

fn statement_records(
    target: &RefreshTarget,
    periods: &[StatementPeriod],
    frequency: Frequency,
    insert_date: NaiveDate,
) -> Result<Vec<Record>> {
    periods
        .iter()
        .map(|period| -> Result<Record> {
            let row = StatementRecord {
                symbol: target.symbol.clone(),
                insert_date,
                report_date: period.report_date,
                currency_code: period
                    .currency_code
                    .clone()
                    .unwrap_or_else(|| target.currency_code.clone()),
                frequency,
                data: serde_json::to_string(&period.values)?,
            };
            Ok(Record::from(&row))
        })
        .collect()
}
