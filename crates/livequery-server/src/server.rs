//! `LiveQueryServer`: axum HTTP dispatcher plus WebSocket subscriptions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use livequery_engine::{DefinitionRegistry, Engine, FanoutSink, Transport, TracingSink};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::context::ContextProvider;
use crate::dispatcher::{self, DispatchResponse};
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::ChannelHub;
use crate::websocket::handler::run_socket;

/// Errors starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding or inspecting the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Shared state for axum handlers.
pub struct AppState<C> {
    engine: Engine<C>,
    hub: Arc<ChannelHub>,
    contexts: Arc<dyn ContextProvider<C>>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            hub: Arc::clone(&self.hub),
            contexts: Arc::clone(&self.contexts),
            shutdown: Arc::clone(&self.shutdown),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        }
    }
}

/// Handle to a running listener.
pub struct ServerHandle {
    /// Bound address (with the real port when `0` was requested).
    pub addr: SocketAddr,
    join: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// HTTP + WebSocket host for an [`Engine`] publishing through a [`ChannelHub`].
pub struct LiveQueryServer<C> {
    config: ServerConfig,
    state: AppState<C>,
}

impl<C: Send + Sync + 'static> LiveQueryServer<C> {
    /// Server whose fan-out reports are logged.
    pub fn new(
        config: ServerConfig,
        registry: DefinitionRegistry<C>,
        contexts: impl ContextProvider<C> + 'static,
    ) -> Self {
        Self::with_sink(config, registry, contexts, Arc::new(TracingSink))
    }

    /// Server delivering fan-out reports to `sink`.
    pub fn with_sink(
        config: ServerConfig,
        registry: DefinitionRegistry<C>,
        contexts: impl ContextProvider<C> + 'static,
        sink: Arc<dyn FanoutSink>,
    ) -> Self {
        let hub = Arc::new(ChannelHub::new(
            config.max_batch_size,
            config.subscriber_buffer,
        ));
        let transport: Arc<dyn Transport> = hub.clone();
        let engine = Engine::with_options(registry, transport, config.engine.clone(), sink);
        Self {
            config,
            state: AppState {
                engine,
                hub,
                contexts: Arc::new(contexts),
                shutdown: Arc::new(ShutdownCoordinator::new()),
                metrics: None,
                start_time: Instant::now(),
            },
        }
    }

    /// Serve Prometheus text from `handle` on `/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Router with all routes and layers.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler::<C>))
            .route("/metrics", get(metrics_handler::<C>))
            .route("/ws", get(ws_handler::<C>))
            .route("/{*path}", post(dispatch_handler::<C>))
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(self.config.max_body_bytes))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind and serve in the background until [`shutdown`](Self::shutdown).
    pub async fn listen(&self) -> Result<ServerHandle, ServerError> {
        let addr = self.config.bind_addr();
        let bind_err = |source| ServerError::Bind {
            addr: addr.clone(),
            source,
        };
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let router = self.router();
        let token = self.state.shutdown.token();
        let join = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(error = %e, "server stopped with error");
            }
        });

        info!(addr = %local_addr, "livequery server listening");
        Ok(ServerHandle {
            addr: local_addr,
            join,
        })
    }

    /// Stop accepting, close sockets, and drain in-flight fan-outs.
    ///
    /// Returns `false` if `timeout` elapsed before everything finished.
    pub async fn shutdown(&self, handle: ServerHandle, timeout: Option<Duration>) -> bool {
        let engine = self.state.engine.clone();
        let drain = async move {
            let _ = handle.join.await;
            engine.drain().await;
        };
        let finished = self.state.shutdown.graceful_shutdown(drain, timeout).await;
        info!(finished, "livequery server stopped");
        finished
    }

    /// The engine behind the dispatcher.
    pub fn engine(&self) -> &Engine<C> {
        &self.state.engine
    }

    /// The hub subscribers listen on.
    pub fn hub(&self) -> &Arc<ChannelHub> {
        &self.state.hub
    }

    /// Shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Active configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

async fn dispatch_handler<C: Send + Sync + 'static>(
    State(state): State<AppState<C>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> DispatchResponse {
    let ctx = state.contexts.provide(&headers);
    dispatcher::dispatch(&state.engine, uri.path(), &body, ctx).await
}

async fn health_handler<C: Send + Sync + 'static>(
    State(state): State<AppState<C>>,
) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.subscriber_count().await,
        state.hub.channel_count().await,
        state.engine.mutations().in_flight(),
    ))
}

async fn metrics_handler<C: Send + Sync + 'static>(State(state): State<AppState<C>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

async fn ws_handler<C: Send + Sync + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<C>>,
) -> Response {
    let hub = Arc::clone(&state.hub);
    let token = state.shutdown.token();
    ws.on_upgrade(move |socket| run_socket(socket, hub, token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use livequery_engine::{BoxError, MutationDefinition, QueryDefinition};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn registry() -> DefinitionRegistry<()> {
        DefinitionRegistry::builder()
            .query(QueryDefinition::unparameterized("count", |_ctx: Arc<()>| async {
                Ok::<_, BoxError>(json!(1))
            }))
            .mutation(
                MutationDefinition::from_fn("bump", livequery_core::AnySchema, |_p, _ctx| async {
                    Ok(json!(2))
                })
                .invalidates_all("count"),
            )
            .build()
            .unwrap()
    }

    fn make_server() -> LiveQueryServer<()> {
        LiveQueryServer::new(ServerConfig::default(), registry(), |_h: &HeaderMap| ())
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_counts() {
        let app = make_server().router();
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["subscribers"], 0);
        assert_eq!(body["channels"], 0);
        assert_eq!(body["fanouts_in_flight"], 0);
    }

    #[tokio::test]
    async fn query_route_dispatches() {
        let app = make_server().router();
        let resp = app
            .oneshot(post_json("/api/query", &json!({"key": "count"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"], 1);
        assert_eq!(
            body["channel"],
            livequery_engine::channel_name("count", &json!({})).as_str()
        );
    }

    #[tokio::test]
    async fn mutation_route_dispatches() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(post_json("/mutation", &json!({"key": "bump", "params": {}})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["success"], true);
        server.engine().drain().await;
    }

    #[tokio::test]
    async fn unknown_suffix_is_404() {
        let app = make_server().router();
        let resp = app
            .oneshot(post_json("/api/other", &json!({"key": "count"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"]["code"], "UNKNOWN_OPERATION");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let config = ServerConfig {
            max_body_bytes: 32,
            ..ServerConfig::default()
        };
        let server = LiveQueryServer::new(config, registry(), |_h: &HeaderMap| ());
        let big = json!({"key": "count", "params": {"pad": "x".repeat(256)}});
        let resp = server.router().oneshot(post_json("/query", &big)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn metrics_without_handle_is_404() {
        let app = make_server().router();
        let resp = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_handle_renders() {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let app = make_server().with_metrics(handle).router();
        let resp = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn hub_uses_configured_batch_size() {
        let config = ServerConfig {
            max_batch_size: 4,
            ..ServerConfig::default()
        };
        let server = LiveQueryServer::new(config, registry(), |_h: &HeaderMap| ());
        assert_eq!(server.hub().max_batch_size(), 4);
    }

    #[tokio::test]
    async fn listen_and_shutdown() {
        let server = make_server();
        let handle = server.listen().await.unwrap();
        assert_ne!(handle.port(), 0);
        assert!(!server.shutdown_coordinator().is_shutting_down());

        assert!(server.shutdown(handle, Some(Duration::from_secs(5))).await);
        assert!(server.shutdown_coordinator().is_shutting_down());
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let server = make_server();
        let first = server.listen().await.unwrap();
        let config = ServerConfig {
            port: first.port(),
            ..ServerConfig::default()
        };
        let second = LiveQueryServer::new(config, registry(), |_h: &HeaderMap| ());
        let err = second.listen().await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
        let _ = server.shutdown(first, Some(Duration::from_secs(5))).await;
    }
}
