//! Ticker Relay Binary
//!
//! Starts the exchange ticker relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `TICKER_RELAY_UPSTREAM_URL`: Exchange ticker stream (default: BTCUSDT 24h ticker)
//! - `TICKER_RELAY_HOST`: Bind address for both servers (default: 0.0.0.0)
//! - `TICKER_RELAY_PORT`: `/price` and `/ws` port (default: 8000)
//! - `TICKER_RELAY_HEALTH_PORT`: Health and metrics port (default: 8082)
//! - `TICKER_RELAY_RECONNECT_DELAY_MS`: Delay before the first reconnect (default: 5000)
//! - `TICKER_RELAY_RECONNECT_DELAY_MAX_MS`: Reconnect delay cap (default: max(5000, initial))
//! - `TICKER_RELAY_RECONNECT_MULTIPLIER`: Backoff multiplier (default: 1.0)
//! - `TICKER_RELAY_RECONNECT_JITTER`: Backoff jitter factor (default: 0.0)
//! - `TICKER_RELAY_HEARTBEAT_INTERVAL_SECS`: Upstream ping interval (default: 20)
//! - `TICKER_RELAY_HEARTBEAT_TIMEOUT_SECS`: Pong deadline (default: 20)
//! - `TICKER_RELAY_QUEUE_CAPACITY`: Relay queue depth (default: 4096)
//! - `TICKER_RELAY_SUBSCRIBER_BUFFER`: Per-subscriber outbound buffer (default: 256)
//! - `TICKER_RELAY_SEND_TIMEOUT_MS`: Per-subscriber send timeout (default: 2000)
//! - `TICKER_RELAY_SHUTDOWN_GRACE_SECS`: Drain period on shutdown (default: 10)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: ticker-relay)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use ticker_relay::infrastructure::telemetry;
use ticker_relay::{
    BroadcastConfig, BroadcastHub, FeedConnectionState, FeedState, FreshnessCache, HealthServer,
    HealthServerState, RelayConfig, RelayCoordinator, RelayServer, RelayState, RelaySupervisor,
    ServerError, TickFanout, UpstreamClient, UpstreamClientConfig, UpstreamEvent, init_metrics,
    relay_queue,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the upstream event channel.
const UPSTREAM_EVENT_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Err only when a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting ticker relay");

    let _metrics_handle = init_metrics().context("failed to initialize metrics")?;

    let config = RelayConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let mut supervisor = RelaySupervisor::new(config.shutdown_grace);
    let shutdown_token = supervisor.token();

    let cache = Arc::new(FreshnessCache::new());
    let broadcast_hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(
        config.broadcast.clone(),
    )));
    let feed_state = Arc::new(FeedState::new());

    // Bind before spawning anything so a port conflict fails startup.
    let relay_addr = config.server.relay_addr();
    let relay_listener = TcpListener::bind(relay_addr)
        .await
        .map_err(|e| ServerError::BindFailed(relay_addr, e.to_string()))?;
    let health_addr = config.server.health_addr();
    let health_listener = TcpListener::bind(health_addr)
        .await
        .map_err(|e| ServerError::BindFailed(health_addr, e.to_string()))?;

    // Upstream -> queue -> coordinator runs before any subscriber is accepted.
    let (queue_tx, queue_rx) = relay_queue(config.broadcast.queue_capacity);
    let (event_tx, event_rx) = mpsc::channel::<UpstreamEvent>(UPSTREAM_EVENT_CAPACITY);

    let events_feed_state = Arc::clone(&feed_state);
    supervisor.spawn("upstream-events", async move {
        handle_upstream_events(event_rx, events_feed_state).await;
    });

    let coordinator = RelayCoordinator::new(
        queue_rx,
        Arc::clone(&cache),
        Arc::clone(&broadcast_hub) as Arc<dyn TickFanout>,
        shutdown_token.clone(),
    );
    supervisor.spawn("relay-coordinator", async move {
        let processed = coordinator.run().await;
        tracing::debug!(processed, "Relay coordinator exited");
    });

    let upstream_client = UpstreamClient::new(
        UpstreamClientConfig::from_settings(&config.upstream, &config.websocket),
        queue_tx,
        event_tx,
        shutdown_token.clone(),
    );
    supervisor.spawn("upstream-client", async move {
        if let Err(e) = upstream_client.run().await {
            tracing::error!(error = %e, "Upstream client stopped");
        }
    });

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&feed_state),
        Arc::clone(&cache),
        Arc::clone(&broadcast_hub),
    ));
    let health_server = HealthServer::new(health_addr, health_state, shutdown_token.clone());
    supervisor.spawn("health-server", async move {
        if let Err(e) = health_server.serve(health_listener).await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Relay server
    let relay_state = RelayState::new(
        Arc::clone(&cache),
        Arc::clone(&broadcast_hub),
        shutdown_token.clone(),
    );
    let relay_server = RelayServer::new(relay_addr, relay_state);
    supervisor.spawn("relay-server", async move {
        if let Err(e) = relay_server.serve(relay_listener).await {
            tracing::error!(error = %e, "Relay server error");
        }
    });

    tracing::info!("Ticker relay ready");

    await_shutdown(shutdown_token).await;

    if supervisor.shutdown().await {
        tracing::info!("Ticker relay stopped");
    } else {
        tracing::warn!("Ticker relay stopped after aborting unfinished tasks");
    }
    Ok(())
}

/// Handle events from the upstream client.
async fn handle_upstream_events(
    mut rx: mpsc::Receiver<UpstreamEvent>,
    feed_state: Arc<FeedState>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            UpstreamEvent::Connecting => {
                feed_state.set_state(FeedConnectionState::Connecting);
            }
            UpstreamEvent::Connected => {
                feed_state.set_state(FeedConnectionState::Connected);
                tracing::info!("Upstream feed connected");
            }
            UpstreamEvent::Disconnected { reason } => {
                feed_state.set_state(FeedConnectionState::Disconnected);
                tracing::warn!(reason = %reason, "Upstream feed disconnected");
                feed_state.set_error(reason);
            }
            UpstreamEvent::Reconnecting { attempt, delay_ms } => {
                feed_state.set_state(FeedConnectionState::Reconnecting);
                feed_state.record_reconnect_attempt(attempt);
                tracing::info!(attempt, delay_ms, "Upstream feed reconnecting");
            }
            UpstreamEvent::TickReceived => {
                feed_state.increment_ticks();
            }
            UpstreamEvent::FrameRejected { reason } => {
                feed_state.increment_rejected();
                tracing::debug!(reason = %reason, "Upstream frame rejected");
            }
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        upstream_url = %config.upstream.url,
        relay_addr = %config.server.relay_addr(),
        health_addr = %config.server.health_addr(),
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_interval_secs = config.websocket.heartbeat_interval.as_secs(),
        reconnect_delay_ms = u64::try_from(config.websocket.reconnect_delay_initial.as_millis())
            .unwrap_or(u64::MAX),
        queue_capacity = config.broadcast.queue_capacity,
        subscriber_buffer = config.broadcast.subscriber_buffer,
        shutdown_grace_secs = config.shutdown_grace.as_secs(),
        "Relay tuning"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT) or an internal cancel.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::info!("Shutdown requested");
        }
    }
}
