//! Server configuration.

use livequery_engine::{DEFAULT_MAX_BATCH_SIZE, EngineConfig};
use serde::{Deserialize, Serialize};

/// Configuration for [`LiveQueryServer`](crate::server::LiveQueryServer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,
    /// Frames buffered per WebSocket subscriber.
    pub subscriber_buffer: usize,
    /// Items per hub `batch_broadcast`.
    pub max_batch_size: usize,
    /// Engine tunables.
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_body_bytes: 1024 * 1024,
            subscriber_buffer: 256,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
