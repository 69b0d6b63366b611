//! Pub/sub broadcast capability.

mod memory;

pub use memory::{MemoryTransport, TransportCall};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default number of items per `batch_broadcast` call.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

/// Event name used for recomputed query results.
pub const UPDATE_EVENT: &str = "update";

/// One message in a batched publish.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BroadcastItem {
    /// Target channel.
    pub channel: String,
    /// Event name.
    pub name: String,
    /// Payload.
    pub data: Value,
}

impl BroadcastItem {
    /// An `update` event carrying a recomputed query result.
    pub fn update(channel: impl Into<String>, data: Value) -> Self {
        Self {
            channel: channel.into(),
            name: UPDATE_EVENT.to_owned(),
            data,
        }
    }
}

/// Errors surfaced by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The batch exceeds what the transport accepts in one call.
    #[error("batch of {size} items exceeds transport limit of {limit}")]
    BatchTooLarge {
        /// Items in the rejected batch.
        size: usize,
        /// Transport limit.
        limit: usize,
    },
    /// The payload could not be encoded for the wire.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    /// The transport is closed or unreachable.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    /// Publish failed for another reason.
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Host-provided pub/sub transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish one event to one channel.
    async fn broadcast(&self, channel: &str, event: &str, data: &Value)
    -> Result<(), TransportError>;

    /// Publish several events in one call. Callers keep batches within
    /// [`max_batch_size`](Self::max_batch_size).
    async fn batch_broadcast(&self, items: &[BroadcastItem]) -> Result<(), TransportError>;

    /// Largest batch accepted by [`batch_broadcast`](Self::batch_broadcast).
    fn max_batch_size(&self) -> usize {
        DEFAULT_MAX_BATCH_SIZE
    }
}
