//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section implements [`Default`]
//! and accepts partial JSON.

use livequery_engine::{EngineConfig, ScalarPolicy};
use livequery_logging::{LogFormat, LoggingConfig, LoggingError};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings.
///
/// ```json
/// { "server": { "port": 4100 }, "engine": { "maxBatchSize": 25 } }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveQuerySettings {
    /// HTTP and WebSocket listener.
    pub server: ServerSettings,
    /// Execution and fan-out.
    pub engine: EngineSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl LiveQuerySettings {
    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue("server.host is empty".into()));
        }
        if self.server.max_body_bytes == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxBodyBytes must be positive".into(),
            ));
        }
        if self.server.subscriber_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "server.subscriberBuffer must be positive".into(),
            ));
        }
        if self.engine.max_batch_size == 0 {
            return Err(SettingsError::InvalidValue(
                "engine.maxBatchSize must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port. 0 picks an ephemeral port.
    pub port: u16,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// Outbound frames buffered per WebSocket subscriber before it is dropped.
    pub subscriber_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            max_body_bytes: 1024 * 1024,
            subscriber_buffer: 256,
        }
    }
}

impl ServerSettings {
    /// `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Engine settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Items per `batch_broadcast` call.
    pub max_batch_size: usize,
    /// How single-params invalidation targets are published.
    pub scalar_policy: ScalarPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_batch_size: livequery_engine::DEFAULT_MAX_BATCH_SIZE,
            scalar_policy: ScalarPolicy::default(),
        }
    }
}

impl EngineSettings {
    /// Engine config for these settings.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            scalar_policy: self.scalar_policy,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level name.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingSettings {
    /// Subscriber config for these settings.
    pub fn logging_config(&self) -> std::result::Result<LoggingConfig, LoggingError> {
        LoggingConfig::from_names(&self.level, &self.format.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = LiveQuerySettings::default();
        assert_eq!(s.server.bind_addr(), "0.0.0.0:4000");
        assert_eq!(s.server.max_body_bytes, 1_048_576);
        assert_eq!(s.engine.max_batch_size, 10);
        assert_eq!(s.engine.scalar_policy, ScalarPolicy::Immediate);
        assert_eq!(s.logging.level, "info");
        assert!(s.validate().is_ok());
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(LiveQuerySettings::default()).unwrap();
        assert_eq!(v["server"]["maxBodyBytes"], 1_048_576);
        assert_eq!(v["engine"]["maxBatchSize"], 10);
        assert_eq!(v["engine"]["scalarPolicy"], "immediate");
        assert_eq!(v["logging"]["format"], "pretty");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: LiveQuerySettings =
            serde_json::from_str(r#"{"engine": {"scalarPolicy": "batched"}}"#).unwrap();
        assert_eq!(s.engine.scalar_policy, ScalarPolicy::Batched);
        assert_eq!(s.engine.max_batch_size, 10);
        assert_eq!(s.server.port, 4000);
    }

    #[test]
    fn validate_rejects_zero_batch() {
        let mut s = LiveQuerySettings::default();
        s.engine.max_batch_size = 0;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("maxBatchSize"));
    }

    #[test]
    fn validate_rejects_empty_host() {
        let mut s = LiveQuerySettings::default();
        s.server.host = "  ".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn engine_and_logging_configs() {
        let mut s = LiveQuerySettings::default();
        s.engine.scalar_policy = ScalarPolicy::Batched;
        s.logging.level = "debug".into();
        s.logging.format = LogFormat::Json;
        assert_eq!(s.engine.engine_config().scalar_policy, ScalarPolicy::Batched);
        let logging = s.logging.logging_config().unwrap();
        assert_eq!(logging.level, tracing::Level::DEBUG);
        assert_eq!(logging.format, LogFormat::Json);
    }
}
