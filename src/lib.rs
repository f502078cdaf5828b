//! # Bookcase
//!
//! Catalog storage layer for a book library.
//!
//! Bookcase presents one contract ([`BookStorage`]) for creating, listing,
//! filtering, paginating, updating and deleting book records, plus a single
//! administrator credential, implemented over several storage technologies:
//!
//! - An embedded read-only CSV file ([`storage::CsvBackend`])
//! - Relational engines: `SQLite` ([`storage::SqliteBackend`]) and PostgreSQL
//!   ([`storage::PostgresBackend`], `postgres` feature)
//! - A document store: Redis with `RediSearch` ([`storage::RedisBackend`], `redis` feature)
//!
//! The backend is chosen from a connection URL by [`storage::open_storage`].
//! Whole-collection jobs (export, seeding, image re-encoding) walk the catalog
//! with [`storage::BatchIterator`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use bookcase::storage::{Deadline, open_storage};
//! use bookcase::Filter;
//! use std::time::Duration;
//!
//! let storage = open_storage("sqlite::memory:")?;
//! let filter = Filter::new("cat", "")?;
//! let headers = storage.read_book_headers(Deadline::after(Duration::from_secs(5)), &filter, 10, 0)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod io;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

pub use config::BookcaseConfig;
pub use models::{Book, BookId, Filter, Header, StringBook, Subject};
pub use storage::{BatchIterator, BookStorage, Deadline, open_storage};

/// Error type for bookcase operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed filter tokens, non-positive page counts, bad URLs |
/// | `InvalidField` | A text field of a record cannot be coerced (pages, dates) |
/// | `NotFound` | A point read, update or delete matched no record |
/// | `IntegrityViolation` | A mutation affected more than one record |
/// | `OperationFailed` | Driver, I/O or connection errors |
/// | `Timeout` | The caller's deadline passed before the operation completed |
/// | `RollbackFailed` | A transaction failed and its rollback failed too |
/// | `Unsupported` | Mutations against the read-only CSV backend |
/// | `UnknownBackend` | The connection URL scheme names no backend |
/// | `FeatureNotEnabled` | The backend was compiled out |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A record field could not be parsed.
    #[error("invalid {key} {value:?}: {cause}")]
    InvalidField {
        /// Name of the offending field.
        key: &'static str,
        /// Raw text that failed to parse.
        value: String,
        /// Parser message.
        cause: String,
    },

    /// No record matched.
    #[error("not found: {0}")]
    NotFound(String),

    /// A mutation affected an unexpected number of records.
    #[error("{operation} affected {affected} records, expected exactly one")]
    IntegrityViolation {
        /// The mutation that was run.
        operation: String,
        /// Number of records it touched.
        affected: u64,
    },

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The caller's deadline passed.
    #[error("operation '{operation}' timed out")]
    Timeout {
        /// The operation that was aborted.
        operation: String,
    },

    /// A transaction failed and rolling it back failed as well.
    #[error("{source}; rollback failed: {rollback}")]
    RollbackFailed {
        /// The error that triggered the rollback.
        #[source]
        source: Box<Error>,
        /// The rollback failure.
        rollback: String,
    },

    /// The backend does not support the operation.
    #[error("not supported: {0}")]
    Unsupported(String),

    /// The connection URL does not name a known backend.
    #[error("unknown backend scheme: {0}")]
    UnknownBackend(String),

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),
}

impl Error {
    /// Builds an [`Error::OperationFailed`] from any displayable cause.
    pub fn operation(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Builds an [`Error::Timeout`].
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Chains a rollback failure onto the error that caused the rollback.
    #[must_use]
    pub fn with_rollback_failure(self, rollback: impl std::fmt::Display) -> Self {
        Self::RollbackFailed {
            source: Box::new(self),
            rollback: rollback.to_string(),
        }
    }

    /// Returns true for [`Error::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true for [`Error::Timeout`].
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type alias for bookcase operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("test error".to_string());
        assert_eq!(err.to_string(), "invalid input: test error");

        let err = Error::operation("read_book", "connection reset");
        assert_eq!(err.to_string(), "operation 'read_book' failed: connection reset");

        let err = Error::InvalidField {
            key: "pages",
            value: "many".to_string(),
            cause: "invalid digit found in string".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid pages \"many\": invalid digit found in string"
        );

        let err = Error::IntegrityViolation {
            operation: "delete_book".to_string(),
            affected: 2,
        };
        assert_eq!(
            err.to_string(),
            "delete_book affected 2 records, expected exactly one"
        );
    }

    #[test]
    fn test_rollback_failure_is_chained() {
        let err = Error::operation("insert_book", "constraint failed")
            .with_rollback_failure("connection closed");
        assert_eq!(
            err.to_string(),
            "operation 'insert_book' failed: constraint failed; rollback failed: connection closed"
        );
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(
            source.as_deref(),
            Some("operation 'insert_book' failed: constraint failed")
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(Error::NotFound("book 1".to_string()).is_not_found());
        assert!(Error::timeout("read_book").is_timeout());
        assert!(!Error::Unsupported("create_books".to_string()).is_timeout());
    }
}
