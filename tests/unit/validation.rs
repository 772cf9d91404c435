//! Properties of the ticker validator and the sequence checker

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use crate::common::{logging, test_data};
use finance_etl::error::EtlError;
use finance_etl::validation::{
    are_incremental, is_valid, missing_fields, IncrementRule, RequiredField, SequenceChecker,
    TickerValidator, Validation,
};

#[test]
fn test_single_element_sequences_are_incremental() {
    for rule in [
        IncrementRule::StrictlyIncreasing,
        IncrementRule::NonDecreasing,
        IncrementRule::fixed_step(5.0),
    ] {
        assert!(are_incremental(&[Some(42.0)], rule.clone()).unwrap(), "{}", rule);
        assert!(are_incremental(&[], rule).unwrap());
    }
}

#[test]
fn test_fixed_step_sequences() {
    let checker = SequenceChecker::new(IncrementRule::fixed_step(10.0));
    assert!(checker.check_values(&[10.0, 20.0, 30.0, 40.0]).unwrap());

    // Swapping two neighbours breaks the step twice
    assert!(!checker.check_values(&[10.0, 30.0, 20.0, 40.0]).unwrap());
    assert_eq!(
        checker
            .breaks(&[Some(10.0), Some(30.0), Some(20.0), Some(40.0)])
            .unwrap(),
        vec![1, 2, 3]
    );
}

#[test]
fn test_one_break_tolerated_when_configured() {
    let values = [Some(1.0), Some(3.0), Some(2.0), Some(4.0)];
    assert!(!SequenceChecker::default().check(&values).unwrap());
    assert!(SequenceChecker::default().tolerating(1).check(&values).unwrap());

    let two_breaks = [Some(3.0), Some(2.0), Some(1.0)];
    assert!(!SequenceChecker::default().tolerating(1).check(&two_breaks).unwrap());
}

#[test]
fn test_custom_rule_closure() {
    let doubling = |previous: f64, next: f64| (next - 2.0 * previous).abs() < 1e-9;
    assert!(are_incremental(&[Some(1.0), Some(2.0), Some(4.0), Some(8.0)], doubling).unwrap());
    assert!(!are_incremental(&[Some(1.0), Some(2.0), Some(5.0)], doubling).unwrap());
}

#[test]
fn test_malformed_values_are_rejected() {
    assert_matches!(
        are_incremental(&[Some(1.0), None, Some(3.0)], IncrementRule::StrictlyIncreasing),
        Err(EtlError::InvalidInput { index: 1, .. })
    );
    assert_matches!(
        SequenceChecker::default().check_values(&[1.0, f64::INFINITY]),
        Err(EtlError::InvalidInput { index: 1, .. })
    );
}

#[test]
fn test_complete_snapshot_is_valid() {
    logging::init_test_logging();
    let snapshot = test_data::complete_snapshot("AAPL");
    assert!(is_valid(&snapshot));
    assert_eq!(TickerValidator::default().evaluate(&snapshot), Validation::Valid);
}

#[test]
fn test_null_currency_is_invalid() {
    let mut snapshot = test_data::complete_snapshot("AAPL");
    snapshot.currency_code = None;
    assert!(!is_valid(&snapshot));
    assert_eq!(missing_fields(&snapshot), vec![RequiredField::CurrencyCode]);
}

#[test]
fn test_validation_is_idempotent() {
    let validator = TickerValidator::new(&["USD".to_string()]);
    let mut snapshot = test_data::complete_snapshot("SAP");
    snapshot.currency_code = Some("EUR".to_string());

    let first = validator.evaluate(&snapshot);
    let second = validator.evaluate(&snapshot);
    assert_eq!(first, second);
    assert_eq!(first, Validation::UnsupportedCurrency("EUR".to_string()));
}
