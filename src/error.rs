//! Error types for the extraction, validation and storage layers

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EtlError {
    /// A value in a checked sequence was missing or not a finite number
    #[error("invalid input at position {index}: {reason}")]
    InvalidInput { index: usize, reason: String },

    /// The upstream API has no data for the ticker
    #[error("no data found for ticker {0}")]
    NotFound(String),

    /// Duplicate or otherwise rejected rows during a batch insert
    #[error("constraint violation on table {table}: {message}")]
    ConstraintViolation { table: String, message: String },

    /// Rows of one batch do not share the same columns
    #[error("schema mismatch on table {table}: {message}")]
    SchemaMismatch { table: String, message: String },

    #[error("invalid SQL identifier: {0}")]
    InvalidIdentifier(String),

    #[error("rate limit exceeded by upstream API")]
    RateLimited,

    #[error("upstream API error: {0}")]
    Api(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl EtlError {
    /// True for outcomes that mean "this ticker has no data" rather than a broken run
    pub fn is_not_found(&self) -> bool {
        matches!(self, EtlError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
