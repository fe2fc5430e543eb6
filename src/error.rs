//! Error types and result handling for dbqueue.
//!
//! ## What
//!
//! - [`Error`] enumerates every failure the data-access layer can surface: configuration
//!   mistakes detected at construction or first use, driver failures passed through from
//!   the SQL binding, and row-mapping problems.
//! - [`Result<T>`] is a convenient alias for `Result<T, Error>`.
//!
//! ## How
//!
//! Configuration errors (`UnsupportedDialect`, `MissingIdSequence`, `MissingConfig`,
//! `InvalidConfig`) are fatal and should stop startup. Driver errors reach the caller
//! as-is; classification and retry belong to the poller.
//!
//! ### Example
//!
//! ```rust
//! use dbqueue::error::{Error, Result};
//!
//! fn pick_dialect(name: &str) -> Result<()> {
//!     Err(Error::UnsupportedDialect { value: name.to_string() })
//! }
//! assert!(pick_dialect("db2").is_err());
//! ```
use thiserror::Error;

/// Result type for dbqueue operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error type for heterogeneous error sources
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error types for dbqueue operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (SQLx errors)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Required configuration field is missing
    #[error("Missing required configuration: {field}")]
    MissingConfig { field: String },

    /// Configuration field has an invalid value
    #[error("Invalid configuration value for {field}: {message}")]
    InvalidConfig { field: String, message: String },

    /// Dialect name does not map to any supported engine
    #[error("Unsupported database dialect: '{value}'")]
    UnsupportedDialect { value: String },

    /// The dialect needs a sequence to generate ids, but the location has none
    #[error("Id sequence must be specified for queue location {location}")]
    MissingIdSequence { location: String },

    /// A named parameter referenced by the SQL text was not bound
    #[error("Missing value for named parameter ':{name}'")]
    MissingParameter { name: String },

    /// An extension field was supplied that the table schema does not declare
    #[error("Extension field '{field}' is not declared in the queue table schema")]
    InvalidExtField { field: String },

    /// A result row lacks a column the mapper needs
    #[error("Column '{column}' is missing from the result row")]
    MissingColumn { column: String },

    /// A result value could not be converted to the requested type
    #[error("Unexpected value in column '{column}': expected {expected}")]
    UnexpectedValue { column: String, expected: String },

    /// The driver binding cannot perform this operation for the dialect
    #[error("Operation '{operation}' is not supported by the {dialect} driver")]
    Unsupported {
        dialect: &'static str,
        operation: &'static str,
    },

    /// Database transaction operation failed
    #[error("Database transaction failed: {source}. Context: {context}")]
    TransactionFailed { source: BoxError, context: String },

    /// Unexpected internal error occurred
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Whether this error stems from invalid configuration rather than a runtime failure.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::MissingConfig { .. }
                | Error::InvalidConfig { .. }
                | Error::UnsupportedDialect { .. }
                | Error::MissingIdSequence { .. }
                | Error::InvalidExtField { .. }
        )
    }
}
