//! Upstream WebSocket Client
//!
//! Maintains the long-lived connection to the exchange ticker stream,
//! decodes each frame and pushes normalized ticks onto the relay queue.
//!
//! # Stream URL
//!
//! - Default: `wss://stream.binance.com:9443/ws/btcusdt@ticker`
//!
//! # Lifecycle
//!
//! The client never gives up on its own: every connection loss is logged,
//! followed by the reconnect delay and a fresh attempt. It stops when the
//! cancellation token fires or the relay queue is closed.

use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::TickerCodec;
use super::heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::services::RelayQueueSender;
use crate::infrastructure::metrics;

/// Default upstream stream URL.
pub const DEFAULT_UPSTREAM_URL: &str = "wss://stream.binance.com:9443/ws/btcusdt@ticker";

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a single upstream connection.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// WebSocket handshake or transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Server closed the connection or the stream ended.
    #[error("connection closed by upstream")]
    ConnectionClosed,

    /// No inbound traffic within the heartbeat timeout.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// The relay queue receiver was dropped.
    #[error("relay queue closed")]
    QueueClosed,

    /// A finite reconnect budget was spent.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

impl UpstreamError {
    /// Whether the run loop should reconnect after this error.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocket(_) | Self::ConnectionClosed | Self::HeartbeatTimeout
        )
    }
}

// =============================================================================
// Upstream Events
// =============================================================================

/// Lifecycle events emitted by the upstream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Connection attempt started.
    Connecting,
    /// WebSocket handshake completed.
    Connected,
    /// Connection lost.
    Disconnected {
        /// Cause of the disconnect.
        reason: String,
    },
    /// Waiting before the next attempt.
    Reconnecting {
        /// Reconnection attempt number (1-based).
        attempt: u32,
        /// Delay before the attempt in milliseconds.
        delay_ms: u64,
    },
    /// A tick was decoded and queued.
    TickReceived,
    /// A frame could not be decoded and was dropped.
    FrameRejected {
        /// Decode error.
        reason: String,
    },
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the upstream client.
#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    /// WebSocket URL.
    pub url: String,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
}

impl UpstreamClientConfig {
    /// Create a configuration with default reconnect and heartbeat settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    /// Build from loaded settings.
    #[must_use]
    pub fn from_settings(
        upstream: &crate::UpstreamSettings,
        websocket: &crate::WebSocketSettings,
    ) -> Self {
        Self {
            url: upstream.url.clone(),
            reconnect: ReconnectConfig::from_websocket_settings(websocket),
            heartbeat: HeartbeatConfig::from_websocket_settings(websocket),
        }
    }
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_UPSTREAM_URL)
    }
}

// =============================================================================
// Upstream Client
// =============================================================================

/// WebSocket client for the upstream ticker stream.
///
/// Manages the connection lifecycle including:
/// - Frame decoding and hand-off to the relay queue
/// - Heartbeat monitoring
/// - Automatic reconnection
pub struct UpstreamClient {
    config: UpstreamClientConfig,
    codec: TickerCodec,
    queue: RelayQueueSender,
    event_tx: mpsc::Sender<UpstreamEvent>,
    cancel: CancellationToken,
}

impl UpstreamClient {
    /// Create a new upstream client.
    #[must_use]
    pub const fn new(
        config: UpstreamClientConfig,
        queue: RelayQueueSender,
        event_tx: mpsc::Sender<UpstreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            codec: TickerCodec::new(),
            queue,
            event_tx,
            cancel,
        }
    }

    /// Run the connection loop.
    ///
    /// Returns `Ok(())` on cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::QueueClosed`] if the relay coordinator went
    /// away, or [`UpstreamError::MaxReconnectAttemptsExceeded`] when a
    /// finite reconnect budget is configured and spent.
    pub async fn run(self) -> Result<(), UpstreamError> {
        let mut reconnect_policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Upstream client cancelled");
                return Ok(());
            }

            self.emit(UpstreamEvent::Connecting).await;

            let error = match self.connect_and_run(&mut reconnect_policy).await {
                Ok(()) => {
                    tracing::info!("Upstream client stopped");
                    return Ok(());
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            tracing::warn!(error = %error, url = %self.config.url, "Upstream connection lost");
            metrics::set_upstream_connected(false);
            self.emit(UpstreamEvent::Disconnected {
                reason: error.to_string(),
            })
            .await;

            let Some(delay) = reconnect_policy.next_delay() else {
                let attempts = reconnect_policy.attempt_count();
                tracing::error!(attempts, "Giving up on upstream");
                return Err(UpstreamError::MaxReconnectAttemptsExceeded(attempts));
            };

            let attempt = reconnect_policy.attempt_count();
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            tracing::info!(attempt, delay_ms, "Reconnecting to upstream");
            metrics::record_upstream_reconnect();
            self.emit(UpstreamEvent::Reconnecting { attempt, delay_ms })
                .await;

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Upstream client cancelled during reconnect delay");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Connect and pump frames until error or cancellation.
    async fn connect_and_run(
        &self,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), UpstreamError> {
        tracing::info!(url = %self.config.url, "Connecting to upstream");

        let connect = tokio_tungstenite::connect_async(self.config.url.as_str());
        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = connect => result?,
        };

        tracing::info!(url = %self.config.url, "Upstream connected");
        reconnect_policy.reset();
        metrics::set_upstream_connected(true);
        self.emit(UpstreamEvent::Connected).await;

        let (mut write, mut read) = ws_stream.split();

        let mut heartbeat = Heartbeat::new(self.config.heartbeat.clone());
        let period = heartbeat.interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match heartbeat.on_tick(Instant::now()) {
                        HeartbeatAction::SendPing => {
                            write.send(Message::Ping(Vec::new().into())).await?;
                        }
                        HeartbeatAction::Expired => {
                            return Err(UpstreamError::HeartbeatTimeout);
                        }
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat.record_activity(Instant::now());
                            self.handle_frame(text.as_str()).await?;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            heartbeat.record_activity(Instant::now());
                            match std::str::from_utf8(&data) {
                                Ok(text) => self.handle_frame(text).await?,
                                Err(e) => self.reject_frame(&e.to_string()),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat.record_activity(Instant::now());
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            heartbeat.record_activity(Instant::now());
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Upstream sent close frame");
                            return Err(UpstreamError::ConnectionClosed);
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Upstream stream ended");
                            return Err(UpstreamError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Decode one frame and enqueue the resulting tick.
    async fn handle_frame(&self, text: &str) -> Result<(), UpstreamError> {
        let tick = match self.codec.decode(text) {
            Ok(Some(tick)) => tick,
            Ok(None) => return Ok(()),
            Err(e) => {
                self.reject_frame(&e.to_string());
                return Ok(());
            }
        };

        tracing::trace!(
            symbol = tick.symbol.as_deref().unwrap_or("-"),
            last_price = tick.last_price,
            "Tick received"
        );
        metrics::record_tick_received();

        tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            sent = self.queue.send(tick) => sent.map_err(|_| UpstreamError::QueueClosed)?,
        }

        self.notify(UpstreamEvent::TickReceived);
        Ok(())
    }

    fn reject_frame(&self, reason: &str) {
        tracing::warn!(error = %reason, "Dropping malformed upstream frame");
        metrics::record_frame_rejected();
        self.notify(UpstreamEvent::FrameRejected {
            reason: reason.to_string(),
        });
    }

    /// Report a connection lifecycle change. Waits for channel space so
    /// transitions are never lost.
    async fn emit(&self, event: UpstreamEvent) {
        let _ = self.event_tx.send(event).await;
    }

    /// Report a per-frame event without waiting. The read loop never stalls
    /// on a slow event consumer; the event is dropped instead.
    fn notify(&self, event: UpstreamEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.event_tx.try_send(event) {
            tracing::trace!(event = ?event, "Upstream event channel full; event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::services::relay_queue;

    #[test]
    fn default_config_targets_exchange_stream() {
        let config = UpstreamClientConfig::default();
        assert_eq!(config.url, DEFAULT_UPSTREAM_URL);
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(5));
        assert!(config.reconnect.is_unlimited());
    }

    #[test]
    fn transient_errors() {
        assert!(UpstreamError::ConnectionClosed.is_transient());
        assert!(UpstreamError::HeartbeatTimeout.is_transient());
        assert!(!UpstreamError::QueueClosed.is_transient());
        assert!(!UpstreamError::MaxReconnectAttemptsExceeded(3).is_transient());
    }

    #[tokio::test]
    async fn unreachable_upstream_retries_then_gives_up_with_budget() {
        let (queue_tx, _queue_rx) = relay_queue(8);
        let (event_tx, mut event_rx) = mpsc::channel(32);
        let config = UpstreamClientConfig {
            url: "ws://127.0.0.1:9/ws".to_string(),
            reconnect: ReconnectConfig {
                max_attempts: 2,
                ..ReconnectConfig::fixed(Duration::from_millis(10))
            },
            heartbeat: HeartbeatConfig::default(),
        };
        let client = UpstreamClient::new(config, queue_tx, event_tx, CancellationToken::new());

        let result = tokio::time::timeout(Duration::from_secs(5), client.run())
            .await
            .expect("client should give up");
        assert!(matches!(
            result,
            Err(UpstreamError::MaxReconnectAttemptsExceeded(2))
        ));

        let mut reconnects = 0;
        while let Ok(event) = event_rx.try_recv() {
            if matches!(event, UpstreamEvent::Reconnecting { .. }) {
                reconnects += 1;
            }
        }
        assert_eq!(reconnects, 2);
    }

    #[tokio::test]
    async fn cancellation_during_reconnect_delay() {
        let (queue_tx, _queue_rx) = relay_queue(8);
        let (event_tx, _event_rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let config = UpstreamClientConfig {
            url: "ws://127.0.0.1:9/ws".to_string(),
            reconnect: ReconnectConfig::fixed(Duration::from_secs(60)),
            heartbeat: HeartbeatConfig::default(),
        };
        let client = UpstreamClient::new(config, queue_tx, event_tx, cancel.clone());
        let handle = tokio::spawn(client.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("client should stop promptly")
            .unwrap();
        assert!(result.is_ok());
    }
}
