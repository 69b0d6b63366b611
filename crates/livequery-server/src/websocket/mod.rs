//! WebSocket subscriptions backed by an in-process channel hub.

pub mod connection;
pub mod handler;
pub mod hub;

pub use connection::Subscriber;
pub use hub::ChannelHub;
