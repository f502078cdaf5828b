//! Log output settings.

use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log directive (takes precedence over `RUST_LOG`).
pub const LOG_ENV: &str = "BOOKCASE_LOG";

/// Directive used when neither the config nor the environment names one.
const DEFAULT_DIRECTIVE: &str = "bookcase=info,warn";

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown log format {other:?}, expected \"pretty\" or \"json\""
            ))),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Filter directive, e.g. `bookcase=debug`. `None` defers to the environment.
    pub filter: Option<String>,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds the [`EnvFilter`] for this configuration.
    ///
    /// `BOOKCASE_LOG` wins over `RUST_LOG`, which wins over the configured
    /// directive. An unparsable directive falls back to the default.
    #[must_use]
    pub fn env_filter(&self) -> EnvFilter {
        let directive = std::env::var(LOG_ENV)
            .ok()
            .or_else(|| std::env::var(EnvFilter::DEFAULT_ENV).ok())
            .or_else(|| self.filter.clone())
            .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string());

        EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
    }

    /// Bumps the default directive to `debug` when verbose output is requested.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        if verbose && self.filter.is_none() {
            self.filter = Some("bookcase=debug,info".to_string());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("pretty", LogFormat::Pretty ; "pretty")]
    #[test_case("TEXT", LogFormat::Pretty ; "text alias")]
    #[test_case(" json ", LogFormat::Json ; "json trimmed")]
    fn test_parse_log_format(raw: &str, expected: LogFormat) {
        assert_eq!(raw.parse::<LogFormat>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_log_format() {
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_verbose_keeps_explicit_filter() {
        let config = LoggingConfig {
            filter: Some("warn".to_string()),
            ..LoggingConfig::default()
        }
        .verbose(true);
        assert_eq!(config.filter.as_deref(), Some("warn"));

        let config = LoggingConfig::default().verbose(true);
        assert_eq!(config.filter.as_deref(), Some("bookcase=debug,info"));

        let config = LoggingConfig::default().verbose(false);
        assert!(config.filter.is_none());
    }
}
