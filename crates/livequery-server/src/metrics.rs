//! Prometheus recorder and server-side metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder. Call once at startup, before
/// anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "livequery_ws_connections_total";
/// WebSocket connections closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "livequery_ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "livequery_ws_connections_active";
/// Frames the hub could not queue for a subscriber (counter).
pub const HUB_SEND_DROPS_TOTAL: &str = "livequery_hub_send_drops_total";
/// Frames queued for subscribers (counter).
pub const HUB_FRAMES_TOTAL: &str = "livequery_hub_frames_total";
