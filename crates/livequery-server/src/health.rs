//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while serving.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Connected WebSocket subscribers.
    pub subscribers: usize,
    /// Distinct channels with at least one subscriber.
    pub channels: usize,
    /// Background fan-outs still running.
    pub fanouts_in_flight: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    subscribers: usize,
    channels: usize,
    fanouts_in_flight: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        subscribers,
        channels,
        fanouts_in_flight,
    }
}
