//! Upstream Heartbeat
//!
//! Liveness tracking for the upstream connection. The client calls
//! [`Heartbeat::on_tick`] on a fixed interval; any inbound frame counts
//! as activity. A ping that goes unanswered for longer than the pong
//! timeout expires the connection so the reconnect loop takes over.

use std::time::{Duration, Instant};

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between liveness checks (and pings).
    pub ping_interval: Duration,
    /// How long an outstanding ping may go unanswered.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            pong_timeout: settings.heartbeat_timeout,
        }
    }
}

/// What the client should do after a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping frame.
    SendPing,
    /// No activity within the timeout; drop the connection.
    Expired,
}

/// Per-connection heartbeat state.
#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    last_activity: Instant,
    ping_outstanding: bool,
}

impl Heartbeat {
    /// Start tracking a fresh connection.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    /// Start tracking with an explicit start instant.
    #[must_use]
    pub const fn starting_at(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            last_activity: now,
            ping_outstanding: false,
        }
    }

    /// Interval at which [`Heartbeat::on_tick`] should be called.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.config.ping_interval
    }

    /// Record inbound traffic (data, ping, or pong).
    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
        self.ping_outstanding = false;
    }

    /// Whether a ping is awaiting an answer.
    #[must_use]
    pub const fn is_waiting_for_pong(&self) -> bool {
        self.ping_outstanding
    }

    /// Periodic check.
    pub fn on_tick(&mut self, now: Instant) -> HeartbeatAction {
        if self.ping_outstanding
            && now.saturating_duration_since(self.last_activity) >= self.config.pong_timeout
        {
            return HeartbeatAction::Expired;
        }

        self.ping_outstanding = true;
        HeartbeatAction::SendPing
    }
}
