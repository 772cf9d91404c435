use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use finance_etl::api::{TickerUniverse, YahooClient};
use finance_etl::data_collector::{DataCollector, ExtractionReport};
use finance_etl::database::{migration, DatabaseManager};
use finance_etl::models::{Config, Frequency, StatementKind};
use finance_etl::validation::{IncrementRule, SequenceChecker};

#[derive(Parser)]
#[command(
    name = "finance-etl",
    about = "📈 Financial statement ETL",
    long_about = "Extracts ticker fundamentals from Yahoo Finance, keeps only tickers with \
                  complete data, stores statements and migrates them between databases."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reload the candidate ticker list from the CSV universe
    LoadTickers,
    /// Fetch and validate candidates not yet in valid_tickers
    Validate {
        #[arg(long, value_enum, default_value_t = Frequency::Annual)]
        frequency: Frequency,
    },
    /// Extract statements for the stalest valid tickers
    Extract {
        /// Statement to extract; all of them when omitted
        #[arg(long, value_enum)]
        statement: Option<StatementKind>,
        #[arg(long, value_enum, default_value_t = Frequency::Annual)]
        frequency: Frequency,
    },
    /// Validation plus extraction of every statement, optionally followed by a migration
    Run {
        #[arg(long, value_enum, default_value_t = Frequency::Annual)]
        frequency: Frequency,
        /// Provider whose database receives a copy afterwards
        #[arg(long)]
        migrate_to: Option<String>,
    },
    /// Copy all data tables from one provider's database to another's
    Migrate {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Export the backup tables to CSV files
    Backup {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Row counts of every table
    Status,
    /// Check whether values follow the increment rule
    CheckSequence {
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<f64>,
        /// strict, non_decreasing or step:<n>
        #[arg(long)]
        rule: Option<IncrementRule>,
        /// Number of rule violations to accept
        #[arg(long)]
        tolerate: Option<usize>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("finance_etl=info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    match cli.command {
        Command::LoadTickers => {
            let collector = collector(&config).await?;
            let stored = collector.refresh_tickers_list(&config.countries).await?;
            println!("✅ Stored {} candidate tickers", stored);
        }
        Command::Validate { frequency } => {
            let collector = collector(&config).await?;
            let report = collector.validate_tickers(&config.countries, frequency).await?;
            println!(
                "✅ {} candidates: {} valid, {} invalid, {} not found, {} failed, \
                 {} already validated",
                report.candidates,
                report.valid,
                report.invalid,
                report.not_found,
                report.failed,
                report.already_validated
            );
        }
        Command::Extract { statement, frequency } => {
            let collector = collector(&config).await?;
            let kinds = statement.map_or_else(|| StatementKind::ALL.to_vec(), |kind| vec![kind]);
            for kind in kinds {
                let report = collector.extract_statements(kind, frequency).await?;
                print_extraction(&report);
            }
        }
        Command::Run { frequency, migrate_to } => {
            let collector = collector(&config).await?;
            let report = collector.run_batch(&config.countries, frequency).await?;
            println!(
                "✅ Validation: {} valid, {} invalid of {} candidates",
                report.validation.valid, report.validation.invalid, report.validation.candidates
            );
            report.extractions.iter().for_each(print_extraction);

            if let Some(provider) = migrate_to {
                let url = Config::database_url_for(&provider)?;
                let destination = DatabaseManager::new(&url)
                    .await
                    .with_context(|| format!("failed to open {} database", provider))?;
                let migrated = migration::migrate(
                    collector.database(),
                    &destination,
                    config.migration_batch_size,
                )
                .await?;
                println!("✅ Migrated {} rows to {}", migrated.total_inserted(), provider);
            }
        }
        Command::Migrate { from, to } => {
            let source = open_provider(&from).await?;
            let destination = open_provider(&to).await?;
            let report =
                migration::migrate(&source, &destination, config.migration_batch_size).await?;
            for table in &report.tables {
                println!(
                    "{:24} {:>10} rows, {:>10} inserted",
                    table.table, table.source_rows, table.inserted
                );
            }
            println!("✅ Migrated {} rows from {} to {}", report.total_inserted(), from, to);
        }
        Command::Backup { dir } => {
            let database = open_database(&config).await?;
            let dir = dir.unwrap_or_else(|| PathBuf::from(&config.backup_dir));
            let files = migration::export_tables(
                &database,
                &config.backup_tables,
                &dir,
                config.migration_batch_size,
            )
            .await?;
            for file in &files {
                println!("💾 {}", file.display());
            }
        }
        Command::Status => {
            let database = open_database(&config).await?;
            println!("📊 {}", database.url());
            for (table, count) in database.table_counts().await? {
                println!("{:24} {:>10}", table, count);
            }
        }
        Command::CheckSequence { values, rule, tolerate } => {
            let rule = rule.unwrap_or_else(|| config.increment_rule.clone());
            let checker = SequenceChecker::new(rule.clone())
                .tolerating(tolerate.unwrap_or(config.tolerated_breaks));
            let breaks = checker.breaks(&values.iter().copied().map(Some).collect::<Vec<_>>())?;
            if checker.check_values(&values)? {
                println!("✅ incremental under {}", rule);
            } else {
                println!("❌ not incremental under {}: breaks at positions {:?}", rule, breaks);
            }
        }
    }

    Ok(())
}

async fn open_database(config: &Config) -> Result<DatabaseManager> {
    DatabaseManager::new(&config.database_url)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))
}

async fn open_provider(provider: &str) -> Result<DatabaseManager> {
    let url = Config::database_url_for(provider)?;
    DatabaseManager::new(&url)
        .await
        .with_context(|| format!("failed to open {} database", provider))
}

async fn collector(config: &Config) -> Result<DataCollector<YahooClient>> {
    let universe = match TickerUniverse::from_path(&config.tickers_list_path) {
        Ok(universe) => universe,
        Err(e) => {
            warn!("Ticker list {} unavailable: {}", config.tickers_list_path, e);
            TickerUniverse::default()
        }
    };
    let client = YahooClient::new(config)?.with_universe(universe);
    let database = open_database(config).await?;
    info!("Using {} database", config.provider);
    Ok(DataCollector::new(client, database, config.clone()))
}

fn print_extraction(report: &ExtractionReport) {
    println!(
        "✅ {} {}: {} tickers, {} periods stored, {} empty, {} non-incremental, {} failed",
        report.frequency,
        report.kind,
        report.tickers,
        report.periods_stored,
        report.empty,
        report.non_incremental,
        report.failed
    );
}
