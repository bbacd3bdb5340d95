//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, feed status reporting, and Prometheus metrics.
//! Runs on its own port, separate from the relay server.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (upstream connected and a tick cached)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::feed::FeedState;
use crate::domain::freshness::SharedFreshnessCache;
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream feed status.
    pub upstream: UpstreamInfo,
    /// Latest cached tick.
    pub cache: CacheInfo,
    /// Subscriber fan-out statistics.
    pub subscribers: SubscriberInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Upstream connected and a tick is cached.
    Healthy,
    /// Either upstream is down or no tick has arrived yet.
    Degraded,
    /// Upstream down and nothing to serve.
    Unhealthy,
}

/// Upstream feed status.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamInfo {
    /// Connection state.
    pub state: &'static str,
    /// Whether the feed is connected.
    pub connected: bool,
    /// Ticks received since startup.
    pub ticks_received: u64,
    /// Frames rejected since startup.
    pub frames_rejected: u64,
    /// Current reconnect attempt (0 if connected).
    pub reconnect_attempts: u32,
    /// Last successful connection.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last disconnect cause.
    pub last_error: Option<String>,
}

/// Freshness cache status.
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    /// Whether a tick is cached.
    pub populated: bool,
    /// Cache replacements since startup.
    pub updates: u64,
    /// Upstream event time of the cached tick.
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// Subscriber statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberInfo {
    /// Registered subscriber connections.
    pub active: usize,
    /// Broadcasts performed.
    pub broadcasts: u64,
    /// Successful deliveries.
    pub delivered: u64,
    /// Failed deliveries.
    pub failed: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed: Arc<FeedState>,
    cache: SharedFreshnessCache,
    hub: SharedBroadcastHub,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        feed: Arc<FeedState>,
        cache: SharedFreshnessCache,
        hub: SharedBroadcastHub,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
            cache,
            hub,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    addr: SocketAddr,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(
        addr: SocketAddr,
        state: Arc<HealthServerState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.addr.port(), e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if the HTTP server encounters a fatal
    /// error while running.
    pub async fn serve(self, listener: TcpListener) -> Result<(), HealthServerError> {
        let local = listener.local_addr().unwrap_or(self.addr);
        tracing::info!(addr = %local, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.feed.is_connected() && state.cache.is_populated() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feed = &state.feed;
    let upstream = UpstreamInfo {
        state: feed.state().as_str(),
        connected: feed.is_connected(),
        ticks_received: feed.ticks_received(),
        frames_rejected: feed.frames_rejected(),
        reconnect_attempts: feed.reconnect_attempts(),
        last_connected_at: feed.last_connected_at(),
        last_error: feed.last_error(),
    };

    let cache = CacheInfo {
        populated: state.cache.is_populated(),
        updates: state.cache.update_count(),
        last_tick_at: state.cache.latest().and_then(|tick| tick.event_time()),
    };

    let stats = state.hub.stats();

    HealthResponse {
        status: determine_health_status(upstream.connected, cache.populated),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        upstream,
        cache,
        subscribers: SubscriberInfo {
            active: stats.subscribers,
            broadcasts: stats.broadcasts,
            delivered: stats.delivered,
            failed: stats.failed,
        },
    }
}

const fn determine_health_status(connected: bool, populated: bool) -> HealthStatus {
    match (connected, populated) {
        (true, true) => HealthStatus::Healthy,
        (false, false) => HealthStatus::Unhealthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::feed::FeedConnectionState;
    use crate::domain::freshness::FreshnessCache;
    use crate::domain::tick::NormalizedTick;
    use crate::infrastructure::broadcast::BroadcastHub;

    fn state() -> (Arc<FeedState>, SharedFreshnessCache, Arc<HealthServerState>) {
        let feed = Arc::new(FeedState::new());
        let cache = Arc::new(FreshnessCache::new());
        let hub = Arc::new(BroadcastHub::with_defaults());
        let state = Arc::new(HealthServerState::new(
            "test".to_string(),
            Arc::clone(&feed),
            Arc::clone(&cache),
            hub,
        ));
        (feed, cache, state)
    }

    async fn get_status(state: &Arc<HealthServerState>, uri: &str) -> StatusCode {
        router(Arc::clone(state))
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn status_matrix() {
        assert_eq!(determine_health_status(true, true), HealthStatus::Healthy);
        assert_eq!(determine_health_status(true, false), HealthStatus::Degraded);
        assert_eq!(determine_health_status(false, true), HealthStatus::Degraded);
        assert_eq!(determine_health_status(false, false), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        let (_, _, state) = state();
        assert_eq!(get_status(&state, "/healthz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_requires_connection_and_tick() {
        let (feed, cache, state) = state();
        assert_eq!(get_status(&state, "/readyz").await, StatusCode::SERVICE_UNAVAILABLE);

        feed.set_state(FeedConnectionState::Connected);
        assert_eq!(get_status(&state, "/readyz").await, StatusCode::SERVICE_UNAVAILABLE);

        cache.replace(NormalizedTick::new("BTCUSDT", 1.0, 0.0, 1));
        assert_eq!(get_status(&state, "/readyz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_unhealthy_before_startup() {
        let (_, _, state) = state();
        assert_eq!(get_status(&state, "/health").await, StatusCode::SERVICE_UNAVAILABLE);

        let response = build_health_response(&state);
        assert_eq!(response.upstream.state, "disconnected");
        assert!(!response.cache.populated);
        assert_eq!(response.subscribers.active, 0);
    }

    #[tokio::test]
    async fn health_body_reflects_cache() {
        let (feed, cache, state) = state();
        feed.set_state(FeedConnectionState::Connected);
        cache.replace(NormalizedTick::new("BTCUSDT", 1.0, 0.0, 1_700_000_000_000));

        let response = router(Arc::clone(&state))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["cache"]["updates"], 1);
        assert_eq!(json["upstream"]["connected"], true);
    }
}
