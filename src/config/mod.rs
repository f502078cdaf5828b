//! Configuration management.
//!
//! Settings come from three layers, later ones winning:
//! 1. Built-in defaults
//! 2. A TOML file (explicit path, or `bookcase/config.toml` in the platform config dir)
//! 3. `BOOKCASE_*` environment variables, with `.env` files honored

use crate::models::DEFAULT_DATE_LAYOUT;
use crate::observability::{LogFormat, LoggingConfig};
use crate::services::BulkOptions;
use crate::storage::{DEFAULT_BATCH_SIZE, Deadline};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection URL used when nothing else is configured.
pub const DEFAULT_DATABASE_URL: &str = "csv:";

/// Per-call timeout used when nothing else is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const ENV_DATABASE_URL: &str = "BOOKCASE_DATABASE_URL";
const ENV_TIMEOUT_MS: &str = "BOOKCASE_TIMEOUT_MS";
const ENV_BATCH_SIZE: &str = "BOOKCASE_BATCH_SIZE";
const ENV_DATE_LAYOUT: &str = "BOOKCASE_DATE_LAYOUT";
const ENV_LOG_FORMAT: &str = "BOOKCASE_LOG_FORMAT";
const ENV_LOG_FILE: &str = "BOOKCASE_LOG_FILE";

/// Main configuration for bookcase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookcaseConfig {
    /// Connection URL selecting the storage backend.
    pub database_url: String,
    /// Time budget for each storage call.
    pub timeout: Duration,
    /// Page size for whole-collection jobs.
    pub batch_size: usize,
    /// Date layout for CSV import and export.
    pub date_layout: String,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Default for BookcaseConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
            date_layout: DEFAULT_DATE_LAYOUT.to_string(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Connection URL.
    pub database_url: Option<String>,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Batch size.
    pub batch_size: Option<usize>,
    /// CSV date layout.
    pub date_layout: Option<String>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileLogging {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Filter directive.
    pub filter: Option<String>,
    /// Log file path.
    pub file: Option<String>,
}

impl BookcaseConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::operation("read_config_file", format!("{}: {e}", path.display())))?;

        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| Error::operation("parse_config_file", e))?;

        Self::from_config_file(file)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the platform config dir, then `~/.config/bookcase/` for Unix
    /// compatibility. Returns defaults if no file is found or it fails to load.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join("bookcase").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("bookcase")
                .join("config.toml"),
        ];

        for path in candidates.iter().filter(|path| path.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Ignoring config file"),
            }
        }

        Self::default()
    }

    /// Loads the full configuration: file (explicit or default), `.env`, then environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file fails to load or an environment
    /// override is malformed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // A missing .env is the common case.
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `BOOKCASE_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a malformed numeric or format value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URL).filter(|v| !v.is_empty()) {
            self.database_url = url;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            self.timeout = Duration::from_millis(parse_number(ENV_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_BATCH_SIZE) {
            self.batch_size = positive_batch(parse_number(ENV_BATCH_SIZE, &raw)?)?;
        }
        if let Some(layout) = lookup(ENV_DATE_LAYOUT).filter(|v| !v.is_empty()) {
            self.date_layout = layout;
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            self.logging.format = raw.parse::<LogFormat>()?;
        }
        if let Some(file) = lookup(ENV_LOG_FILE).filter(|v| !v.is_empty()) {
            self.logging.file = Some(PathBuf::from(file));
        }
        Ok(())
    }

    /// Sets the connection URL.
    #[must_use]
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// A fresh deadline one `timeout` from now.
    #[must_use]
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.timeout)
    }

    /// Bulk job options derived from this configuration.
    #[must_use]
    pub fn bulk_options(&self) -> BulkOptions {
        BulkOptions::default()
            .with_batch_size(self.batch_size)
            .with_timeout(self.timeout)
            .with_date_layout(self.date_layout.clone())
    }

    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = file.database_url {
            config.database_url = url;
        }
        if let Some(timeout_ms) = file.timeout_ms {
            config.timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(batch_size) = file.batch_size {
            config.batch_size = positive_batch(batch_size)?;
        }
        if let Some(layout) = file.date_layout {
            config.date_layout = layout;
        }
        if let Some(logging) = file.logging {
            if let Some(format) = logging.format {
                config.logging.format = format.parse()?;
            }
            config.logging.filter = logging.filter;
            config.logging.file = logging.file.map(PathBuf::from);
        }

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::InvalidInput(format!("{key}={raw:?}: {e}")))
}

fn positive_batch(batch_size: usize) -> Result<usize> {
    if batch_size == 0 {
        return Err(Error::InvalidInput(
            "batch_size must be at least 1".to_string(),
        ));
    }
    Ok(batch_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BookcaseConfig::default();
        assert_eq!(config.database_url, "csv:");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.date_layout, "%Y-%m-%d");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_from_toml() {
        let config = BookcaseConfig::from_toml(
            r#"
            database_url = "sqlite:///var/lib/bookcase.db"
            timeout_ms = 250
            batch_size = 20
            date_layout = "%d/%m/%Y"

            [logging]
            format = "json"
            filter = "bookcase=trace"
            file = "/tmp/bookcase.log"
            "#,
        )
        .unwrap();

        assert_eq!(config.database_url, "sqlite:///var/lib/bookcase.db");
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.date_layout, "%d/%m/%Y");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.filter.as_deref(), Some("bookcase=trace"));
        assert_eq!(config.logging.file, Some(PathBuf::from("/tmp/bookcase.log")));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BookcaseConfig::from_toml("batch_size = 7").unwrap();
        assert_eq!(config.batch_size, 7);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(BookcaseConfig::from_toml("batch_size = \"many\"").is_err());
        assert!(BookcaseConfig::from_toml("unknown_key = 1").is_err());
        assert!(BookcaseConfig::from_toml("batch_size = 0").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "database_url = \"sqlite::memory:\"\n").unwrap();

        let config = BookcaseConfig::load_from_file(&path).unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");

        let missing = BookcaseConfig::load_from_file(&dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(Error::OperationFailed { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BookcaseConfig::default();
        config
            .apply_env(env(&[
                ("BOOKCASE_DATABASE_URL", "redis://localhost:6379"),
                ("BOOKCASE_TIMEOUT_MS", "1500"),
                ("BOOKCASE_BATCH_SIZE", "50"),
                ("BOOKCASE_DATE_LAYOUT", "%Y/%m/%d"),
                ("BOOKCASE_LOG_FORMAT", "json"),
                ("BOOKCASE_LOG_FILE", "bookcase.log"),
            ]))
            .unwrap();

        assert_eq!(config.database_url, "redis://localhost:6379");
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.date_layout, "%Y/%m/%d");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.file, Some(PathBuf::from("bookcase.log")));
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut config = BookcaseConfig::default();
        config
            .apply_env(env(&[("BOOKCASE_DATABASE_URL", "")]))
            .unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
    }

    #[test]
    fn test_malformed_env_override() {
        let mut config = BookcaseConfig::default();
        let err = config
            .apply_env(env(&[("BOOKCASE_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = config
            .apply_env(env(&[("BOOKCASE_BATCH_SIZE", "0")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_bulk_options_follow_config() {
        let config = BookcaseConfig::default().with_timeout(Duration::from_millis(900));
        let options = config.bulk_options();
        assert_eq!(options.batch_size, 100);
        assert_eq!(options.timeout, Some(Duration::from_millis(900)));
        assert_eq!(options.date_layout, "%Y-%m-%d");
        assert!(!options.dry_run);

        assert!(!config.deadline().is_expired());
    }
}
