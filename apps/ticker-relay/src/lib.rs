#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Ticker Relay - Real-time Price Fan-out
//!
//! Maintains one WebSocket connection to an exchange 24h ticker stream,
//! keeps the most recent tick in a single-slot cache, and pushes every
//! tick to any number of local WebSocket subscribers. A `/price` query
//! returns the cached tick without touching the upstream.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Core relay types
//!   - `tick`: Normalized tick and price snapshot
//!   - `freshness`: Single-slot latest-tick cache
//!   - `feed`: Upstream connection state
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Subscriber sink interface
//!   - `services`: Relay coordinator and task supervisor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: Exchange WebSocket client, codec, reconnect, heartbeat
//!   - `broadcast`: Subscriber registry and concurrent fan-out
//!   - `server`: `/price` and `/ws` endpoints
//!   - `config`: Environment configuration
//!   - `health`: Health check and metrics endpoint
//!
//! # Data Flow
//!
//! ```text
//!                                              +-> cache <---- GET /price
//! Exchange WS -> UpstreamClient -> queue -> Coordinator
//!                                              +-> BroadcastHub --> /ws subscriber 1
//!                                                              --> /ws subscriber 2
//!                                                              --> /ws subscriber N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core relay types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::feed::{FeedConnectionState, FeedState};
pub use domain::freshness::{FreshnessCache, SharedFreshnessCache};
pub use domain::tick::{NormalizedTick, PriceSnapshot, UnavailableBody};

// Application services
pub use application::ports::{
    ConnectionId, FanoutSummary, Payload, SubscriberSendError, SubscriberSink, TickFanout,
};
pub use application::services::{
    RelayCoordinator, RelayQueueReceiver, RelayQueueSender, RelaySupervisor, relay_queue,
};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, RelayConfig, ServerSettings, UpstreamSettings,
    WebSocketSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastReport, BroadcastStats, SharedBroadcastHub,
};

// Relay server (for integration tests)
pub use infrastructure::server::{RelayServer, RelayState, ServerError};

// Upstream client
pub use infrastructure::upstream::{
    FrameParseError, TickerCodec, UpstreamClient, UpstreamClientConfig, UpstreamError,
    UpstreamEvent,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
