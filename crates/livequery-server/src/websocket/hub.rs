//! In-process channel hub: the [`Transport`] WebSocket subscribers listen on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use livequery_core::{BroadcastItem, Transport, TransportError};
use metrics::counter;
use serde_json::{Value, json};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use super::connection::Subscriber;
use crate::metrics::{HUB_FRAMES_TOTAL, HUB_SEND_DROPS_TOTAL};

/// Routes published events to the subscribers of each channel.
pub struct ChannelHub {
    subscribers: RwLock<HashMap<String, Arc<Subscriber>>>,
    max_batch_size: usize,
    buffer: usize,
}

impl ChannelHub {
    /// Hub accepting batches of up to `max_batch_size` and buffering
    /// `buffer` frames per subscriber. Both are at least 1.
    pub fn new(max_batch_size: usize, buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            max_batch_size: max_batch_size.max(1),
            buffer: buffer.max(1),
        }
    }

    /// Register a new subscriber and return it with the receiving end of its
    /// frame queue.
    pub async fn register(&self) -> (Arc<Subscriber>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let subscriber = Arc::new(Subscriber::new(Subscriber::generate_id(), tx));
        let mut subs = self.subscribers.write().await;
        let _ = subs.insert(subscriber.id.clone(), Arc::clone(&subscriber));
        (subscriber, rx)
    }

    /// Forget a subscriber.
    pub async fn remove(&self, id: &str) {
        let _ = self.subscribers.write().await.remove(id);
    }

    /// Connected subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Distinct channels with at least one subscriber.
    pub async fn channel_count(&self) -> usize {
        let subs = self.subscribers.read().await;
        subs.values()
            .flat_map(|s| s.channels())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Queue one event frame for every subscriber of `channel`.
    async fn deliver(
        &self,
        channel: &str,
        event: &str,
        data: &Value,
    ) -> Result<usize, TransportError> {
        let frame = Arc::new(serde_json::to_string(&json!({
            "type": "event",
            "channel": channel,
            "event": event,
            "data": data,
        }))?);

        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let subs = self.subscribers.read().await;
            for sub in subs.values().filter(|s| s.is_subscribed(channel)) {
                if sub.send(Arc::clone(&frame)) {
                    delivered += 1;
                } else if sub.is_closed() {
                    closed.push(sub.id.clone());
                } else {
                    counter!(HUB_SEND_DROPS_TOTAL).increment(1);
                    warn!(subscriber = %sub.id, channel, "subscriber buffer full, frame dropped");
                }
            }
        }

        if !closed.is_empty() {
            let mut subs = self.subscribers.write().await;
            for id in &closed {
                let _ = subs.remove(id);
            }
            debug!(count = closed.len(), "removed closed subscribers");
        }

        counter!(HUB_FRAMES_TOTAL).increment(delivered as u64);
        Ok(delivered)
    }
}

#[async_trait]
impl Transport for ChannelHub {
    async fn broadcast(
        &self,
        channel: &str,
        event: &str,
        data: &Value,
    ) -> Result<(), TransportError> {
        let recipients = self.deliver(channel, event, data).await?;
        debug!(channel, event, recipients, "broadcast");
        Ok(())
    }

    async fn batch_broadcast(&self, items: &[BroadcastItem]) -> Result<(), TransportError> {
        if items.len() > self.max_batch_size {
            return Err(TransportError::BatchTooLarge {
                size: items.len(),
                limit: self.max_batch_size,
            });
        }
        let mut recipients = 0;
        for item in items {
            recipients += self.deliver(&item.channel, &item.name, &item.data).await?;
        }
        debug!(items = items.len(), recipients, "batch broadcast");
        Ok(())
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}
