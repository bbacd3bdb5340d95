//! Port Interfaces
//!
//! Defines the interfaces (ports) between the relay core and the
//! transports around it, following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SubscriberSink`: one downstream connection that accepts payloads
//! - `TickFanout`: delivers one payload to every live subscriber
//!
//! The broadcast hub only ever talks to `SubscriberSink`, so the fan-out
//! logic is exercised in tests with mock sinks and in production with the
//! WebSocket adapter. The relay coordinator only ever talks to
//! `TickFanout`, so it never depends on the hub directly.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

/// Unique identifier for a subscriber connection.
pub type ConnectionId = Uuid;

/// Payload pushed to subscribers (serialized tick).
pub type Payload = Arc<str>;

/// Per-subscriber delivery failure.
///
/// Never fatal: the broadcast hub records it and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriberSendError {
    /// The subscriber's outbound buffer is full; the payload was dropped.
    #[error("subscriber buffer full")]
    BufferFull,

    /// The subscriber connection is closed.
    #[error("subscriber connection closed")]
    Closed,

    /// Delivery did not complete within the send timeout.
    #[error("send timed out after {0}ms")]
    TimedOut(u64),

    /// Transport-specific failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl SubscriberSendError {
    /// Short label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::BufferFull => "buffer_full",
            Self::Closed => "closed",
            Self::TimedOut(_) => "timeout",
            Self::Transport(_) => "transport",
        }
    }
}

/// A downstream connection that can receive payloads.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriberSink: Send + Sync {
    /// Deliver one payload to this subscriber.
    ///
    /// # Errors
    ///
    /// Returns `SubscriberSendError` if the payload could not be delivered.
    async fn deliver(&self, payload: Payload) -> Result<(), SubscriberSendError>;
}

/// Outcome of one fan-out, as seen by the relay core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutSummary {
    /// Subscribers the payload was offered to.
    pub attempted: usize,
    /// Successful deliveries.
    pub delivered: usize,
    /// Failed deliveries.
    pub failed: usize,
}

/// Delivers a payload to every registered subscriber.
///
/// Per-subscriber failures are counted in the summary, never returned as
/// errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TickFanout: Send + Sync {
    /// Offer one payload to every subscriber.
    async fn fan_out(&self, payload: Payload) -> FanoutSummary;
}
