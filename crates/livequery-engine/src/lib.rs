//! # livequery-engine
//!
//! Execution pipeline and invalidation fan-out for live queries.
//!
//! - [`registry`]: named query and mutation definitions, frozen at startup
//! - [`query`]: validate, authorize, run; recompute and publish
//! - [`mutation`]: run a mutation, then fan out in the background
//! - [`fanout`]: recompute stale queries and batch their broadcasts
//! - [`sink`]: where fan-out reports go once the caller has its result

#![deny(unsafe_code)]

pub mod config;
pub mod definition;
pub mod engine;
pub mod errors;
pub mod fanout;
pub mod handler;
pub mod metrics;
pub mod mutation;
mod pipeline;
pub mod query;
pub mod registry;
pub mod sink;

pub use config::{EngineConfig, ScalarPolicy};
pub use definition::{InvalidationMap, MutationDefinition, QueryDefinition};
pub use engine::Engine;
pub use errors::{DefinitionKind, EngineError, FanoutFailure};
pub use fanout::FanoutEngine;
pub use handler::{
    Authorizer, AuthorizerFn, Handler, HandlerFn, InvalidationTarget, TargetFn, TargetParams,
    TypedHandler,
};
pub use mutation::MutationExecutor;
pub use query::{InvalidationOutcome, QueryExecutor, QueryOutcome};
pub use registry::{DefinitionRegistry, RegistryBuilder, RegistryError};
pub use sink::{FanoutReport, FanoutSink, RecordingSink, TargetReport, TracingSink};

pub use livequery_core::{BoxError, DEFAULT_MAX_BATCH_SIZE, Schema, Transport, channel_name};
