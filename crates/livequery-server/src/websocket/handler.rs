//! Subscriber socket lifecycle and control frames.
//!
//! Clients send JSON frames tagged by `type`:
//!
//! - `{"type":"subscribe","channel":"query_..."}` or
//!   `{"type":"subscribe","query":"getPost","params":{...}}`
//! - `{"type":"unsubscribe", ...}` with the same addressing
//! - `{"type":"ping"}`
//!
//! Published updates arrive as `{"type":"event","channel","event","data"}`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use livequery_core::channel_name;
use metrics::{counter, gauge};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::Subscriber;
use super::hub::ChannelHub;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Channel addressing in subscribe and unsubscribe frames.
#[derive(Debug, Deserialize)]
pub struct ChannelAddress {
    /// Explicit channel name.
    #[serde(default)]
    pub channel: Option<String>,
    /// Query name, used with `params` when `channel` is absent.
    #[serde(default)]
    pub query: Option<String>,
    /// Query params, as the query will parse them.
    #[serde(default)]
    pub params: Value,
}

impl ChannelAddress {
    /// The addressed channel, if the frame names one.
    pub fn resolve(&self) -> Option<String> {
        match (&self.channel, &self.query) {
            (Some(channel), _) if !channel.is_empty() => Some(channel.clone()),
            (_, Some(query)) if !query.is_empty() => Some(channel_name(query, &self.params)),
            _ => None,
        }
    }
}

/// Frames a subscriber may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start receiving a channel's events.
    Subscribe(ChannelAddress),
    /// Stop receiving a channel's events.
    Unsubscribe(ChannelAddress),
    /// Liveness check.
    Ping,
}

/// Apply one text frame to `subscriber` and build the reply.
pub fn handle_frame(subscriber: &Subscriber, text: &str) -> Value {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(subscriber = %subscriber.id, error = %e, "invalid client frame");
            return error_frame(&format!("invalid frame: {e}"));
        }
    };

    match frame {
        ClientFrame::Subscribe(address) => match address.resolve() {
            Some(channel) => {
                let _ = subscriber.subscribe(&channel);
                debug!(subscriber = %subscriber.id, channel, "subscribed");
                json!({"type": "subscribed", "channel": channel})
            }
            None => error_frame("subscribe requires a channel or a query"),
        },
        ClientFrame::Unsubscribe(address) => match address.resolve() {
            Some(channel) => {
                let was_subscribed = subscriber.unsubscribe(&channel);
                json!({"type": "unsubscribed", "channel": channel, "wasSubscribed": was_subscribed})
            }
            None => error_frame("unsubscribe requires a channel or a query"),
        },
        ClientFrame::Ping => json!({"type": "pong"}),
    }
}

fn error_frame(message: &str) -> Value {
    json!({"type": "error", "message": message})
}

/// Serve one upgraded socket until the client leaves or `shutdown` fires.
#[instrument(skip_all, fields(subscriber))]
pub async fn run_socket(socket: WebSocket, hub: Arc<ChannelHub>, shutdown: CancellationToken) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (subscriber, mut frames) = hub.register().await;
    let _ = tracing::Span::current().record("subscriber", subscriber.id.as_str());

    info!("subscriber connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let _ = subscriber.send_json(&json!({"type": "connected", "id": subscriber.id}));

    let writer_token = shutdown.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text((*frame).clone().into())).await.is_err() {
                        break;
                    }
                }
                () = writer_token.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                let text = match msg {
                    Message::Text(ref t) => t.as_str().to_owned(),
                    Message::Binary(ref data) => match std::str::from_utf8(data) {
                        Ok(s) => s.to_owned(),
                        Err(_) => {
                            warn!(len = data.len(), "non-UTF8 binary frame ignored");
                            continue;
                        }
                    },
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };
                let reply = handle_frame(&subscriber, &text);
                if !subscriber.send_json(&reply) {
                    warn!("failed to queue reply");
                }
            }
            () = shutdown.cancelled() => break,
        }
    }

    hub.remove(&subscriber.id).await;
    drop(subscriber);
    let _ = writer.await;

    info!("subscriber disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
}
