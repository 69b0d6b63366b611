//! # livequery-logging
//!
//! One-call `tracing` setup for livequery hosts.
//!
//! The configured level and per-module overrides form the default filter;
//! `RUST_LOG` replaces it when set. Output is human-readable or one JSON
//! object per line.

#![deny(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log line format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event, with the span list.
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(LoggingError::InvalidFormat(other.to_owned())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        })
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Level name not recognized by `tracing`.
    #[error("invalid log level '{0}'")]
    InvalidLevel(String),
    /// Format name not recognized.
    #[error("invalid log format '{0}' (expected 'pretty' or 'json')")]
    InvalidFormat(String),
    /// Filter directives did not parse.
    #[error("invalid filter directive: {0}")]
    Directive(#[from] tracing_subscriber::filter::ParseError),
    /// A global subscriber was already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Subscriber configuration.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Default level. `RUST_LOG` overrides it.
    pub level: Level,
    /// Per-module overrides, e.g. `("livequery_engine", DEBUG)`.
    pub module_levels: Vec<(String, Level)>,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            module_levels: Vec::new(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    /// Config from level and format names as they appear in settings.
    pub fn from_names(level: &str, format: &str) -> Result<Self, LoggingError> {
        Ok(Self {
            level: parse_level(level)?,
            module_levels: Vec::new(),
            format: format.parse()?,
        })
    }

    /// Add a per-module override.
    #[must_use]
    pub fn with_module_level(mut self, module: impl Into<String>, level: Level) -> Self {
        self.module_levels.push((module.into(), level));
        self
    }

    /// Filter directives for this config, e.g. `info,livequery_engine=debug`.
    pub fn directives(&self) -> String {
        let mut out = self.level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            out.push(',');
            out.push_str(module);
            out.push('=');
            out.push_str(&level.to_string().to_lowercase());
        }
        out
    }
}

/// Parse a level name (`trace`, `debug`, `info`, `warn`, `error`).
pub fn parse_level(name: &str) -> Result<Level, LoggingError> {
    Level::from_str(name.trim()).map_err(|_| LoggingError::InvalidLevel(name.to_owned()))
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.directives())?,
    };

    let (json, pretty) = match config.format {
        LogFormat::Json => (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_list(true),
            ),
            None,
        ),
        LogFormat::Pretty => (None, Some(tracing_subscriber::fmt::layer().with_target(true))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_info_pretty() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.directives(), "info");
    }

    #[test]
    fn directives_include_module_levels() {
        let config = LoggingConfig::default()
            .with_module_level("livequery_engine", Level::DEBUG)
            .with_module_level("hyper", Level::WARN);
        assert_eq!(config.directives(), "info,livequery_engine=debug,hyper=warn");
        assert!(EnvFilter::try_new(config.directives()).is_ok());
    }

    #[test]
    fn from_names_parses_both() {
        let config = LoggingConfig::from_names("debug", "json").unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn from_names_rejects_unknown_level() {
        let err = LoggingConfig::from_names("loud", "json").unwrap_err();
        assert!(matches!(err, LoggingError::InvalidLevel(ref l) if l == "loud"));
    }

    #[test]
    fn format_parse_and_display() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Json.to_string(), "json");
    }

    #[test]
    fn format_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&LogFormat::Json).unwrap(), "\"json\"");
        let f: LogFormat = serde_json::from_str("\"pretty\"").unwrap();
        assert_eq!(f, LogFormat::Pretty);
    }

    #[test]
    fn second_init_reports_already_initialized() {
        let config = LoggingConfig::default();
        let first = init_logging(&config);
        let second = init_logging(&config);
        // another test binary may have installed a subscriber first
        assert!(first.is_ok() || matches!(first, Err(LoggingError::AlreadyInitialized(_))));
        assert!(matches!(second, Err(LoggingError::AlreadyInitialized(_))));
    }
}
