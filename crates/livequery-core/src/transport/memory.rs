//! In-process transport that records every publish.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{BroadcastItem, DEFAULT_MAX_BATCH_SIZE, Transport, TransportError};

/// A call observed by [`MemoryTransport`].
#[derive(Clone, Debug, PartialEq)]
pub enum TransportCall {
    /// `broadcast(channel, event, data)`.
    Broadcast {
        /// Channel.
        channel: String,
        /// Event name.
        event: String,
        /// Payload.
        data: Value,
    },
    /// `batch_broadcast(items)`.
    Batch(Vec<BroadcastItem>),
}

/// Transport that keeps published messages in memory.
///
/// Channels passed to [`fail_channel`](Self::fail_channel) make any call that
/// touches them fail, which lets callers exercise partial failure.
pub struct MemoryTransport {
    max_batch_size: usize,
    calls: Mutex<Vec<TransportCall>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryTransport {
    /// Transport with the default batch size.
    pub fn new() -> Self {
        Self::with_max_batch_size(DEFAULT_MAX_BATCH_SIZE)
    }

    /// Transport with a custom batch size.
    pub fn with_max_batch_size(max_batch_size: usize) -> Self {
        Self {
            max_batch_size,
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make publishes to `channel` fail.
    pub fn fail_channel(&self, channel: impl Into<String>) {
        let _ = self.failing.lock().insert(channel.into());
    }

    /// Every call so far, in arrival order.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Single broadcasts as `(channel, event, data)`.
    pub fn broadcasts(&self) -> Vec<(String, String, Value)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Broadcast {
                    channel,
                    event,
                    data,
                } => Some((channel.clone(), event.clone(), data.clone())),
                TransportCall::Batch(_) => None,
            })
            .collect()
    }

    /// Batched publishes, one entry per `batch_broadcast` call.
    pub fn batches(&self) -> Vec<Vec<BroadcastItem>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Batch(items) => Some(items.clone()),
                TransportCall::Broadcast { .. } => None,
            })
            .collect()
    }

    /// Channels that received anything, single or batched.
    pub fn published_channels(&self) -> Vec<String> {
        let calls = self.calls.lock();
        let mut out = Vec::new();
        for call in calls.iter() {
            match call {
                TransportCall::Broadcast { channel, .. } => out.push(channel.clone()),
                TransportCall::Batch(items) => {
                    out.extend(items.iter().map(|i| i.channel.clone()));
                }
            }
        }
        out
    }

    /// Forget recorded calls.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn check(&self, channel: &str) -> Result<(), TransportError> {
        if self.failing.lock().contains(channel) {
            return Err(TransportError::Publish(format!(
                "channel '{channel}' rejected the message"
            )));
        }
        Ok(())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn broadcast(
        &self,
        channel: &str,
        event: &str,
        data: &Value,
    ) -> Result<(), TransportError> {
        self.check(channel)?;
        self.calls.lock().push(TransportCall::Broadcast {
            channel: channel.to_owned(),
            event: event.to_owned(),
            data: data.clone(),
        });
        Ok(())
    }

    async fn batch_broadcast(&self, items: &[BroadcastItem]) -> Result<(), TransportError> {
        if items.len() > self.max_batch_size {
            return Err(TransportError::BatchTooLarge {
                size: items.len(),
                limit: self.max_batch_size,
            });
        }
        for item in items {
            self.check(&item.channel)?;
        }
        self.calls.lock().push(TransportCall::Batch(items.to_vec()));
        Ok(())
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}
