//! State of one WebSocket subscriber.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A connected client and the channels it listens on.
pub struct Subscriber {
    /// Unique subscriber ID.
    pub id: String,
    tx: mpsc::Sender<Arc<String>>,
    channels: Mutex<HashSet<String>>,
    dropped_messages: AtomicU64,
    /// When the socket was accepted.
    pub connected_at: Instant,
}

impl Subscriber {
    /// Subscriber writing frames into `tx`.
    pub fn new(id: String, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx,
            channels: Mutex::new(HashSet::new()),
            dropped_messages: AtomicU64::new(0),
            connected_at: Instant::now(),
        }
    }

    /// Fresh `sub_`-prefixed ID.
    pub fn generate_id() -> String {
        format!("sub_{}", uuid::Uuid::now_v7())
    }

    /// Start listening on `channel`. Returns `false` if already subscribed.
    pub fn subscribe(&self, channel: &str) -> bool {
        self.channels.lock().insert(channel.to_owned())
    }

    /// Stop listening on `channel`. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, channel: &str) -> bool {
        self.channels.lock().remove(channel)
    }

    /// Whether frames for `channel` go to this subscriber.
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.channels.lock().contains(channel)
    }

    /// Snapshot of subscribed channels.
    pub fn channels(&self) -> Vec<String> {
        self.channels.lock().iter().cloned().collect()
    }

    /// Queue a text frame. Returns `false` and counts a drop when the
    /// buffer is full or the socket is gone.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize `value` and queue it.
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Frames dropped so far.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Whether the write half has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Time since the socket was accepted.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
