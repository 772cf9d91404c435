//! End-to-end runs of the collector against a static provider and a file database

use pretty_assertions::assert_eq;

use crate::common::{logging, test_data, StaticProvider, TestDatabase};
use finance_etl::data_collector::DataCollector;
use finance_etl::models::{Frequency, StatementKind};

#[tokio::test]
async fn test_only_complete_tickers_are_validated() {
    logging::init_test_logging();
    logging::log_test_step("Validating AAPL and XYZ123");

    let mut incomplete = test_data::complete_snapshot("XYZ123");
    incomplete.total_revenue = None;
    let provider = StaticProvider::with_candidates(&["AAPL", "XYZ123"])
        .snapshot(test_data::complete_snapshot("AAPL"))
        .snapshot(incomplete);

    let db = TestDatabase::new().await.unwrap();
    let collector = DataCollector::new(provider, db.manager.clone(), test_data::test_config());
    let report = collector
        .validate_tickers(&test_data::countries(), Frequency::Annual)
        .await
        .unwrap();
    logging::log_test_data("Validation report", &report);

    let symbols: Vec<String> = db
        .manager
        .valid_tickers()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.symbol)
        .collect();
    assert_eq!(symbols, vec!["AAPL"]);
    assert_eq!(report.valid, 1);
    assert_eq!(report.invalid, 1);
}

#[tokio::test]
async fn test_unknown_tickers_do_not_abort_validation() {
    logging::init_test_logging();

    let provider = StaticProvider::with_candidates(&["AAPL", "GHOST", "MSFT", "NVDA"])
        .snapshot(test_data::complete_snapshot("AAPL"))
        .snapshot(test_data::complete_snapshot("MSFT"))
        .snapshot(test_data::complete_snapshot("NVDA"));

    let db = TestDatabase::new().await.unwrap();
    let collector = DataCollector::new(provider, db.manager.clone(), test_data::test_config());
    let report = collector
        .validate_tickers(&test_data::countries(), Frequency::Annual)
        .await
        .unwrap();

    assert_eq!(report.not_found, 1);
    assert_eq!(report.valid, 3);
    assert_eq!(db.manager.count_rows("valid_tickers").await.unwrap(), 3);
    assert_eq!(db.manager.count_rows("financial_snapshots").await.unwrap(), 3);
}

#[tokio::test]
async fn test_run_batch_stores_incremental_statements() {
    logging::init_test_logging();
    logging::log_test_step("Full batch with statements");

    let mut shrinking = test_data::increasing_periods(3);
    shrinking.reverse();
    for (period, date) in shrinking.iter_mut().zip(test_data::increasing_periods(3)) {
        period.report_date = date.report_date;
    }

    let provider = StaticProvider::with_candidates(&["AAPL", "MSFT"])
        .snapshot(test_data::complete_snapshot("AAPL"))
        .snapshot(test_data::complete_snapshot("MSFT"))
        .statement("AAPL", StatementKind::BalanceSheet, test_data::increasing_periods(3))
        .statement("MSFT", StatementKind::BalanceSheet, shrinking);

    let db = TestDatabase::new().await.unwrap();
    let collector = DataCollector::new(provider, db.manager.clone(), test_data::test_config());
    let report = collector
        .run_batch(&test_data::countries(), Frequency::Annual)
        .await
        .unwrap();

    assert_eq!(report.validation.valid, 2);
    let balance_sheet = report
        .extractions
        .iter()
        .find(|r| r.kind == StatementKind::BalanceSheet)
        .unwrap();
    assert_eq!(balance_sheet.periods_stored, 3);
    assert_eq!(balance_sheet.non_incremental, 1);

    let cashflow = report
        .extractions
        .iter()
        .find(|r| r.kind == StatementKind::CashFlow)
        .unwrap();
    assert_eq!(cashflow.empty, 2);
    assert_eq!(db.manager.count_rows("balance_sheet").await.unwrap(), 3);
    assert_eq!(db.manager.count_rows("cashflow").await.unwrap(), 0);

    // Re-extraction replaces rows instead of duplicating them
    let again = collector
        .extract_statements(StatementKind::BalanceSheet, Frequency::Annual)
        .await
        .unwrap();
    assert_eq!(again.periods_stored, 3);
    assert_eq!(db.manager.count_rows("balance_sheet").await.unwrap(), 3);
}

#[tokio::test]
async fn test_refresh_tickers_list() {
    let provider = StaticProvider::with_candidates(&["AAPL", "MSFT"]);
    let db = TestDatabase::new().await.unwrap();
    let collector = DataCollector::new(provider, db.manager.clone(), test_data::test_config());

    assert_eq!(collector.refresh_tickers_list(&test_data::countries()).await.unwrap(), 2);
    assert_eq!(collector.refresh_tickers_list(&test_data::countries()).await.unwrap(), 2);
    assert_eq!(db.manager.candidate_tickers().await.unwrap().len(), 2);
}
