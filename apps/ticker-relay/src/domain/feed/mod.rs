//! Upstream Feed State
//!
//! Tracks the connection status of the upstream ticker feed for health
//! reporting. Updated by the event handler in the binary, read by the
//! health server.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Connection state of the upstream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedConnectionState {
    /// Not connected and not trying yet.
    #[default]
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected and receiving frames.
    Connected,
    /// Waiting out the reconnect delay.
    Reconnecting,
}

impl FeedConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

/// Tracks the state of the upstream feed connection.
#[derive(Debug, Default)]
pub struct FeedState {
    state: RwLock<FeedConnectionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    ticks_received: AtomicU64,
    frames_rejected: AtomicU64,
}

impl FeedState {
    /// Create a new feed state (disconnected).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection state.
    pub fn set_state(&self, state: FeedConnectionState) {
        *self.state.write() = state;
        if state == FeedConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.last_error.write() = None;
        }
    }

    /// Record a connection error.
    pub fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Record a reconnection attempt.
    pub fn record_reconnect_attempt(&self, attempt: u32) {
        *self.state.write() = FeedConnectionState::Reconnecting;
        self.reconnect_attempts.store(attempt, Ordering::Relaxed);
    }

    /// Increment ticks received counter.
    pub fn increment_ticks(&self) {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment rejected frames counter.
    pub fn increment_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> FeedConnectionState {
        *self.state.read()
    }

    /// Check if the feed is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == FeedConnectionState::Connected
    }

    /// Time of the last successful connection.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Last recorded error message.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Current reconnect attempt (0 once connected).
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Ticks received since startup.
    #[must_use]
    pub fn ticks_received(&self) -> u64 {
        self.ticks_received.load(Ordering::Relaxed)
    }

    /// Frames rejected since startup.
    #[must_use]
    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let state = FeedState::new();
        assert_eq!(state.state(), FeedConnectionState::Disconnected);
        assert!(!state.is_connected());
        assert!(state.last_connected_at().is_none());
    }

    #[test]
    fn connect_clears_error_and_attempts() {
        let state = FeedState::new();
        state.set_error("connection reset".to_string());
        state.record_reconnect_attempt(3);
        assert_eq!(state.state(), FeedConnectionState::Reconnecting);
        assert_eq!(state.reconnect_attempts(), 3);

        state.set_state(FeedConnectionState::Connected);
        assert!(state.is_connected());
        assert_eq!(state.reconnect_attempts(), 0);
        assert!(state.last_error().is_none());
        assert!(state.last_connected_at().is_some());
    }

    #[test]
    fn counters_increment() {
        let state = FeedState::new();
        state.increment_ticks();
        state.increment_ticks();
        state.increment_rejected();
        assert_eq!(state.ticks_received(), 2);
        assert_eq!(state.frames_rejected(), 1);
    }

    #[test]
    fn state_names() {
        assert_eq!(FeedConnectionState::Connected.as_str(), "connected");
        assert_eq!(FeedConnectionState::Reconnecting.as_str(), "reconnecting");
    }
}
