//! # livequery-server
//!
//! HTTP and WebSocket host for the livequery engine.
//!
//! - [`dispatcher`]: `POST .../query` and `POST .../mutation` with a `{key, params}` body
//! - [`websocket`]: subscribers, the channel hub, and the socket loop
//! - [`server`]: router, listener, and graceful shutdown
//! - [`health`], [`metrics`]: operational endpoints

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use context::ContextProvider;
pub use dispatcher::{DispatchResponse, OperationKind};
pub use server::{LiveQueryServer, ServerError, ServerHandle};
pub use shutdown::ShutdownCoordinator;
pub use websocket::{ChannelHub, Subscriber};
