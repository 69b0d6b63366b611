//! Engine error types.

use std::fmt;

use livequery_core::{BoxError, TransportError};

// ── Error code constants ────────────────────────────────────────────

/// No query or mutation registered under the requested name.
pub const UNKNOWN_DEFINITION: &str = "UNKNOWN_DEFINITION";
/// Parameters rejected by the definition's schema.
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
/// Authorization predicate refused or failed.
pub const AUTHORIZATION_ERROR: &str = "AUTHORIZATION_ERROR";
/// Handler returned an error.
pub const HANDLER_ERROR: &str = "HANDLER_ERROR";
/// Single broadcast failed after recomputation.
pub const BROADCAST_ERROR: &str = "BROADCAST_ERROR";

/// Which registry table a name was looked up in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefinitionKind {
    /// Read operation.
    Query,
    /// Write operation.
    Mutation,
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
        })
    }
}

/// Errors that abort a query or mutation request.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Name not registered.
    #[error("unknown {kind} '{name}'")]
    UnknownDefinition {
        /// Table searched.
        kind: DefinitionKind,
        /// Requested name.
        name: String,
    },

    /// Schema rejected the raw parameters.
    #[error("invalid params for '{name}': {message}")]
    Validation {
        /// Definition name.
        name: String,
        /// Validator message.
        message: String,
    },

    /// Predicate returned `false` or failed.
    #[error("not authorized to run '{name}'")]
    Authorization {
        /// Definition name.
        name: String,
        /// Predicate failure, if it raised instead of refusing.
        #[source]
        source: Option<BoxError>,
    },

    /// Handler failed.
    #[error("handler for '{name}' failed: {source}")]
    Handler {
        /// Definition name.
        name: String,
        /// Original handler error.
        #[source]
        source: BoxError,
    },

    /// Transport rejected the single broadcast of a recomputed result.
    #[error("broadcast to '{channel}' failed: {source}")]
    Broadcast {
        /// Channel published to.
        channel: String,
        /// Transport error.
        #[source]
        source: TransportError,
    },
}

impl EngineError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownDefinition { .. } => UNKNOWN_DEFINITION,
            Self::Validation { .. } => VALIDATION_ERROR,
            Self::Authorization { .. } => AUTHORIZATION_ERROR,
            Self::Handler { .. } => HANDLER_ERROR,
            Self::Broadcast { .. } => BROADCAST_ERROR,
        }
    }

    /// Whether the failure is the caller's fault (bad key or params).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownDefinition { .. } | Self::Validation { .. } | Self::Authorization { .. }
        )
    }
}

/// Failure absorbed by the fan-out engine. Never reaches the mutation caller.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FanoutFailure {
    /// Computing target params from the mutation failed.
    #[error("computing params for '{target}' failed: {message}")]
    InvalidationCompute {
        /// Target query.
        target: String,
        /// Error message.
        message: String,
    },

    /// A single-params target could not be recomputed.
    #[error("recomputing '{target}' failed: {message}")]
    Recompute {
        /// Target query.
        target: String,
        /// Error message.
        message: String,
    },

    /// A single-params target was recomputed but its broadcast failed.
    #[error("broadcast of '{target}' to '{channel}' failed: {message}")]
    Broadcast {
        /// Target query.
        target: String,
        /// Channel.
        channel: String,
        /// Error message.
        message: String,
    },

    /// Some elements of a list target failed to recompute.
    #[error("{failed} of {total} recomputations of '{target}' failed")]
    PartialInvalidation {
        /// Target query.
        target: String,
        /// Failed elements.
        failed: usize,
        /// Elements attempted.
        total: usize,
        /// One message per failed element.
        errors: Vec<String>,
    },

    /// One `batch_broadcast` chunk was rejected.
    #[error("batch of {} updates for '{target}' failed: {message}", .channels.len())]
    BatchDispatch {
        /// Target query.
        target: String,
        /// Channels in the rejected chunk.
        channels: Vec<String>,
        /// Error message.
        message: String,
    },

    /// The fan-out panicked before this target's outcome was known.
    #[error("fan-out for '{target}' panicked: {message}")]
    Panicked {
        /// Target query.
        target: String,
        /// Panic payload, when it was a string.
        message: String,
    },
}

impl FanoutFailure {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidationCompute { .. } => "invalidation_compute",
            Self::Recompute { .. } => "recompute",
            Self::Broadcast { .. } => "broadcast",
            Self::PartialInvalidation { .. } => "partial_invalidation",
            Self::BatchDispatch { .. } => "batch_dispatch",
            Self::Panicked { .. } => "panicked",
        }
    }

    /// Target query the failure belongs to.
    pub fn target(&self) -> &str {
        match self {
            Self::InvalidationCompute { target, .. }
            | Self::Recompute { target, .. }
            | Self::Broadcast { target, .. }
            | Self::PartialInvalidation { target, .. }
            | Self::BatchDispatch { target, .. }
            | Self::Panicked { target, .. } => target,
        }
    }
}
