//! Relay HTTP Server
//!
//! Public surface of the relay.
//!
//! # Endpoints
//!
//! - `GET /price` - Latest cached tick as JSON, or the "not yet available"
//!   body (both with 200)
//! - `GET /ws` - WebSocket upgrade; pushes one JSON tick per upstream tick

pub mod subscriber;

use std::net::SocketAddr;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::freshness::SharedFreshnessCache;
use crate::domain::tick::{PriceSnapshot, UnavailableBody};
use crate::infrastructure::broadcast::SharedBroadcastHub;

pub use subscriber::{Registration, WsSubscriberSink, serve_subscriber};

// =============================================================================
// Server State
// =============================================================================

/// Shared state for relay handlers.
#[derive(Clone)]
pub struct RelayState {
    cache: SharedFreshnessCache,
    hub: SharedBroadcastHub,
    cancel: CancellationToken,
}

impl RelayState {
    /// Create new relay state.
    #[must_use]
    pub const fn new(
        cache: SharedFreshnessCache,
        hub: SharedBroadcastHub,
        cancel: CancellationToken,
    ) -> Self {
        Self { cache, hub, cancel }
    }
}

/// Build the relay router.
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/price", get(price_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

// =============================================================================
// Relay Server
// =============================================================================

/// Relay HTTP server.
pub struct RelayServer {
    addr: SocketAddr,
    state: RelayState,
    cancel: CancellationToken,
}

impl RelayServer {
    /// Create a new relay server.
    #[must_use]
    pub fn new(addr: SocketAddr, state: RelayState) -> Self {
        let cancel = state.cancel.clone();
        Self {
            addr,
            state,
            cancel,
        }
    }

    /// Bind the configured address and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the server stops with an
    /// I/O error.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.addr, e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if the server stops with an I/O error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr().unwrap_or(self.addr);
        tracing::info!(addr = %local, "Relay server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Relay server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn price_handler(State(state): State<RelayState>) -> Response {
    price_response(&state.cache.snapshot())
}

fn price_response(snapshot: &PriceSnapshot) -> Response {
    match snapshot {
        PriceSnapshot::Available(tick) => Json(tick.as_ref()).into_response(),
        PriceSnapshot::Unavailable => Json(UnavailableBody::default()).into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_subscriber(socket, state.cache, state.hub, state.cancel))
}

// =============================================================================
// Errors
// =============================================================================

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
