//! Structured logging.

use super::{EnvLookup, parse_string};
use crate::config::LoggingSettings;
use std::path::PathBuf;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, falling back to pretty.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
    /// Log file; stderr when `None`.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from config settings with env overrides.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        Self::from_settings_with(settings, verbose, &|key| std::env::var(key).ok())
    }

    /// Builds logging configuration with overrides from `lookup`.
    ///
    /// `LAKESWEEP_LOG_LEVEL` (then `RUST_LOG`), `LAKESWEEP_LOG_FORMAT` and
    /// `LAKESWEEP_LOG_FILE` win over the file; `verbose` wins over both for
    /// the level.
    #[must_use]
    pub fn from_settings_with(
        settings: Option<&LoggingSettings>,
        verbose: bool,
        lookup: EnvLookup<'_>,
    ) -> Self {
        let filter = if verbose {
            "debug".to_string()
        } else {
            parse_string(lookup, "LAKESWEEP_LOG_LEVEL")
                .or_else(|| parse_string(lookup, "RUST_LOG"))
                .or_else(|| settings.and_then(|s| s.level.clone()))
                .unwrap_or_else(|| "info".to_string())
        };
        let format = parse_string(lookup, "LAKESWEEP_LOG_FORMAT")
            .or_else(|| settings.and_then(|s| s.format.clone()))
            .map_or_else(LogFormat::default, |f| LogFormat::parse(&f));
        let file = parse_string(lookup, "LAKESWEEP_LOG_FILE")
            .or_else(|| settings.and_then(|s| s.file.clone()))
            .map(PathBuf::from);

        Self {
            filter,
            format,
            file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::from_settings_with(None, false, &|_| None);
        assert_eq!(config.filter, "info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_env_wins_over_file_and_verbose_wins_over_env() {
        let settings = LoggingSettings {
            level: Some("warn".to_string()),
            format: Some("pretty".to_string()),
            file: Some("/tmp/from-file.log".to_string()),
        };
        let env = HashMap::from([
            ("LAKESWEEP_LOG_LEVEL", "lakesweep=trace"),
            ("LAKESWEEP_LOG_FORMAT", "JSON"),
        ]);
        let lookup = |key: &str| env.get(key).map(ToString::to_string);

        let config = LoggingConfig::from_settings_with(Some(&settings), false, &lookup);
        assert_eq!(config.filter, "lakesweep=trace");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file, Some(PathBuf::from("/tmp/from-file.log")));

        let verbose = LoggingConfig::from_settings_with(Some(&settings), true, &lookup);
        assert_eq!(verbose.filter, "debug");
    }
}
