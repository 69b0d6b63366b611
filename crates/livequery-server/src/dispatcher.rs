//! HTTP request dispatch onto the query and mutation executors.
//!
//! The request body is `{key, params}`. The last path segment picks the
//! executor: `/query` or `/mutation`.

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use livequery_engine::metrics::{ERRORS_TOTAL, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use livequery_engine::{Engine, EngineError};
use metrics::{counter, histogram};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

/// Body could not be parsed as `{key, params}`.
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
/// Path suffix is neither `query` nor `mutation`.
pub const UNKNOWN_OPERATION: &str = "UNKNOWN_OPERATION";

const SLOW_REQUEST_SECS: u64 = 5;

/// Which executor a request goes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    /// Read.
    Query,
    /// Write, followed by background fan-out.
    Mutation,
}

impl OperationKind {
    /// Kind selected by the last non-empty segment of `path`.
    pub fn from_path(path: &str) -> Option<Self> {
        match path.trim_end_matches('/').rsplit('/').next()? {
            "query" => Some(Self::Query),
            "mutation" => Some(Self::Mutation),
            _ => None,
        }
    }

    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
        }
    }
}

/// Request body.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    /// Registered query or mutation name.
    pub key: String,
    /// Raw params, validated by the definition's schema.
    #[serde(default)]
    pub params: Value,
}

/// Status code and JSON body produced by [`dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Response envelope.
    pub body: Value,
}

impl IntoResponse for DispatchResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// HTTP status for an engine error.
pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::UnknownDefinition { .. } | EngineError::Validation { .. } => {
            StatusCode::BAD_REQUEST
        }
        EngineError::Authorization { .. } => StatusCode::UNAUTHORIZED,
        EngineError::Handler { .. } | EngineError::Broadcast { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Route one request to the engine and build its response envelope.
pub async fn dispatch<C: Send + Sync + 'static>(
    engine: &Engine<C>,
    path: &str,
    body: &[u8],
    ctx: C,
) -> DispatchResponse {
    let Some(kind) = OperationKind::from_path(path) else {
        counter!(ERRORS_TOTAL, "kind" => "unknown", "code" => UNKNOWN_OPERATION).increment(1);
        return DispatchResponse {
            status: StatusCode::NOT_FOUND,
            body: json!({
                "data": null,
                "error": {
                    "code": UNKNOWN_OPERATION,
                    "message": format!("no operation at '{path}'"),
                },
            }),
        };
    };

    let envelope: Envelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(kind = kind.as_str(), error = %e, "invalid request body");
            counter!(ERRORS_TOTAL, "kind" => kind.as_str(), "code" => INVALID_REQUEST)
                .increment(1);
            return failure(
                kind,
                StatusCode::BAD_REQUEST,
                INVALID_REQUEST,
                format!("invalid request: {e}"),
            );
        }
    };

    let key = envelope.key;
    counter!(REQUESTS_TOTAL, "kind" => kind.as_str(), "key" => key.clone()).increment(1);
    let ctx = Arc::new(ctx);
    let start = Instant::now();

    let response = match kind {
        OperationKind::Query => {
            match engine
                .queries()
                .execute_with_channel(&key, &envelope.params, ctx)
                .await
            {
                Ok(outcome) => DispatchResponse {
                    status: StatusCode::OK,
                    body: json!({
                        "data": outcome.result,
                        "channel": outcome.channel,
                        "error": null,
                    }),
                },
                Err(err) => engine_failure(kind, &key, &err),
            }
        }
        OperationKind::Mutation => {
            match engine.mutations().execute(&key, &envelope.params, ctx).await {
                Ok(data) => DispatchResponse {
                    status: StatusCode::OK,
                    body: json!({"success": true, "data": data, "error": null}),
                },
                Err(err) => engine_failure(kind, &key, &err),
            }
        }
    };

    let duration = start.elapsed();
    histogram!(REQUEST_DURATION_SECONDS, "kind" => kind.as_str()).record(duration.as_secs_f64());
    if duration.as_secs() >= SLOW_REQUEST_SECS {
        warn!(
            kind = kind.as_str(),
            key = %key,
            duration_secs = duration.as_secs_f64(),
            "slow request"
        );
    }

    response
}

fn engine_failure(kind: OperationKind, key: &str, err: &EngineError) -> DispatchResponse {
    let code = err.code();
    counter!(ERRORS_TOTAL, "kind" => kind.as_str(), "code" => code).increment(1);
    let status = status_for(err);

    let message = if status.is_server_error() {
        error!(kind = kind.as_str(), key, code, error = %err, "request failed");
        "Internal error".to_owned()
    } else {
        debug!(kind = kind.as_str(), key, code, error = %err, "request rejected");
        err.to_string()
    };
    failure(kind, status, code, message)
}

fn failure(
    kind: OperationKind,
    status: StatusCode,
    code: &str,
    message: String,
) -> DispatchResponse {
    let error = json!({"code": code, "message": message});
    let body = match kind {
        OperationKind::Query => json!({"data": null, "channel": null, "error": error}),
        OperationKind::Mutation => json!({"success": false, "data": null, "error": error}),
    };
    DispatchResponse { status, body }
}
