//! Structured logging.

use crate::config::LoggingSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, falling back to [`LogFormat::Pretty`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Event filter.
    pub filter: EnvFilter,
    /// Output format.
    pub format: LogFormat,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from config settings with env overrides.
    ///
    /// Filter precedence: `--verbose`, then `RUST_LOG`, then `DUPSTACK_LOG`,
    /// then the configured level, then `info`.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        let directive = if verbose {
            "debug".to_string()
        } else {
            env_string("RUST_LOG")
                .or_else(|| env_string("DUPSTACK_LOG"))
                .or_else(|| settings.and_then(|s| s.level.clone()))
                .unwrap_or_else(|| "info".to_string())
        };
        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

        let format = env_string("DUPSTACK_LOG_FORMAT")
            .or_else(|| settings.and_then(|s| s.format.clone()))
            .map(|f| LogFormat::parse(&f))
            .unwrap_or_default();

        let file = env_string("DUPSTACK_LOG_FILE")
            .map(PathBuf::from)
            .or_else(|| settings.and_then(|s| s.file.clone()));

        Self {
            filter,
            format,
            file,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("yaml"), LogFormat::Pretty);
    }

    #[test]
    fn test_verbose_forces_debug() {
        let config = LoggingConfig::from_settings(None, true);
        assert_eq!(config.filter.to_string(), "debug");
    }

    #[test]
    fn test_settings_used_when_env_unset() {
        if std::env::var("RUST_LOG").is_ok()
            || std::env::var("DUPSTACK_LOG").is_ok()
            || std::env::var("DUPSTACK_LOG_FORMAT").is_ok()
        {
            return;
        }
        let settings = LoggingSettings {
            level: Some("dupstack=trace".to_string()),
            format: Some("json".to_string()),
            file: None,
        };
        let config = LoggingConfig::from_settings(Some(&settings), false);
        assert_eq!(config.filter.to_string(), "dupstack=trace");
        assert_eq!(config.format, LogFormat::Json);
    }
}
