//! Upstream Exchange Adapter
//!
//! WebSocket client for the exchange's symbol ticker stream (JSON codec),
//! with heartbeat monitoring and a reconnect policy.

pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;

pub use client::{
    DEFAULT_UPSTREAM_URL, UpstreamClient, UpstreamClientConfig, UpstreamError, UpstreamEvent,
};
pub use codec::{FrameParseError, TickerCodec};
pub use heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
pub use messages::TickerFrame;
pub use reconnect::{DEFAULT_RECONNECT_DELAY, ReconnectConfig, ReconnectPolicy};
