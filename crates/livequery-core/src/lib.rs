//! # livequery-core
//!
//! Capabilities shared by the serving side and live-subscription clients.
//!
//! - [`channel`]: canonical parameter serialization and channel naming
//! - [`schema`]: the opaque parameter validation capability
//! - [`transport`]: the pub/sub broadcast capability and an in-process implementation
//!
//! A client that subscribes to live updates must derive channel names with
//! [`channel::channel_name`]; the server publishes to exactly those names.

#![deny(unsafe_code)]

pub mod channel;
pub mod schema;
pub mod transport;

pub use channel::{CHANNEL_PREFIX, canonicalize, channel_name};
pub use schema::{AnySchema, FnSchema, Schema, Typed};
pub use transport::{
    BroadcastItem, DEFAULT_MAX_BATCH_SIZE, MemoryTransport, Transport, TransportCall,
    TransportError, UPDATE_EVENT,
};

/// Boxed error returned by caller-supplied handlers, predicates and targets.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
