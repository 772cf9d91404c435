pub mod incremental;
pub mod ticker_validator;

pub use incremental::{are_incremental, IncrementRule, SequenceChecker, StepRule};
pub use ticker_validator::{is_valid, missing_fields, RequiredField, TickerValidator, Validation};
