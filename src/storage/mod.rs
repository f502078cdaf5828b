//! Storage layer.
//!
//! One contract ([`BookStorage`]) with four adapters:
//! - **CSV**: read-only catalog held in memory ([`CsvBackend`])
//! - **`SQLite`**: embedded relational database ([`SqliteBackend`])
//! - **PostgreSQL**: pooled relational database ([`PostgresBackend`])
//! - **Redis**: hashes indexed by `RediSearch` ([`RedisBackend`])
//!
//! [`open_storage`] picks the adapter from a connection URL.

// Dropping the connection guard a few statements early buys nothing.
#![allow(clippy::significant_drop_tightening)]

mod batch;
mod csv_file;
mod deadline;
pub mod metrics;
mod postgresql;
mod redis;
pub mod sql;
pub mod sqlite;
mod traits;

pub use batch::{BatchIterator, DEFAULT_BATCH_SIZE, HeaderPage, read_header_page};
pub use csv_file::CsvBackend;
pub use deadline::Deadline;
pub use metrics::record_operation_metrics;
pub use postgresql::PostgresBackend;
pub use redis::RedisBackend;
pub use sqlite::SqliteBackend;
pub use traits::{ADMIN_USERNAME, BookStorage, clamp_page};

use crate::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A parsed connection URL naming one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageUrl {
    /// `csv:` - the catalog compiled into the binary.
    CsvEmbedded,
    /// `csv:///path/to/file.csv` or `csv:file.csv`.
    CsvFile(PathBuf),
    /// `sqlite::memory:`.
    SqliteMemory,
    /// `sqlite:///path.db` or `file:path.db`.
    SqliteFile(PathBuf),
    /// `postgres://...` or `postgresql://...`, kept verbatim.
    Postgres(String),
    /// `redis://...` or `rediss://...`, kept verbatim.
    Redis(String),
}

impl StorageUrl {
    /// Short backend name, matching [`BookStorage::backend_name`].
    #[must_use]
    pub const fn backend_name(&self) -> &'static str {
        match self {
            Self::CsvEmbedded | Self::CsvFile(_) => "csv",
            Self::SqliteMemory | Self::SqliteFile(_) => "sqlite",
            Self::Postgres(_) => "postgres",
            Self::Redis(_) => "redis",
        }
    }

    /// Opens the backend this URL names.
    ///
    /// # Errors
    ///
    /// Returns the adapter's construction error, or
    /// [`Error::FeatureNotEnabled`] if the adapter was compiled out.
    pub fn open(&self) -> Result<Box<dyn BookStorage>> {
        let storage: Box<dyn BookStorage> = match self {
            Self::CsvEmbedded => Box::new(CsvBackend::embedded()?),
            Self::CsvFile(path) => Box::new(CsvBackend::open(path)?),
            Self::SqliteMemory => Box::new(SqliteBackend::in_memory()?),
            Self::SqliteFile(path) => Box::new(SqliteBackend::new(path.clone())?),
            Self::Postgres(url) => Box::new(PostgresBackend::new(url)?),
            Self::Redis(url) => Box::new(RedisBackend::new(url)?),
        };
        tracing::info!(backend = storage.backend_name(), "Opened storage");
        Ok(storage)
    }
}

/// Strips the `//` authority marker of `scheme:///path` forms.
fn path_part(rest: &str) -> &str {
    rest.strip_prefix("//").unwrap_or(rest)
}

impl FromStr for StorageUrl {
    type Err = Error;

    fn from_str(url: &str) -> Result<Self> {
        let Some((scheme, rest)) = url.split_once(':') else {
            return Err(Error::UnknownBackend(url.to_string()));
        };

        match scheme.to_ascii_lowercase().as_str() {
            "csv" => {
                let path = path_part(rest);
                if path.is_empty() {
                    Ok(Self::CsvEmbedded)
                } else {
                    Ok(Self::CsvFile(PathBuf::from(path)))
                }
            },
            "sqlite" | "file" => {
                if rest == ":memory:" {
                    return Ok(Self::SqliteMemory);
                }
                let path = path_part(rest);
                if path.is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "sqlite url {url:?} names no database file"
                    )));
                }
                Ok(Self::SqliteFile(PathBuf::from(path)))
            },
            "postgres" | "postgresql" => Ok(Self::Postgres(url.to_string())),
            "redis" | "rediss" => Ok(Self::Redis(url.to_string())),
            other => Err(Error::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for StorageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CsvEmbedded => write!(f, "csv:"),
            Self::CsvFile(path) => write!(f, "csv://{}", path.display()),
            Self::SqliteMemory => write!(f, "sqlite::memory:"),
            Self::SqliteFile(path) => write!(f, "sqlite://{}", path.display()),
            Self::Postgres(url) | Self::Redis(url) => write!(f, "{url}"),
        }
    }
}

/// Opens the backend named by a connection URL.
///
/// # Errors
///
/// Returns [`Error::UnknownBackend`] for an unrecognized scheme,
/// [`Error::FeatureNotEnabled`] when the backend was compiled out, or the
/// adapter's construction error.
///
/// # Examples
///
/// ```
/// use bookcase::storage::open_storage;
///
/// let storage = open_storage("csv:").unwrap();
/// assert_eq!(storage.backend_name(), "csv");
/// assert!(open_storage("mongodb://localhost").is_err());
/// ```
pub fn open_storage(url: &str) -> Result<Box<dyn BookStorage>> {
    url.parse::<StorageUrl>()?.open()
}
