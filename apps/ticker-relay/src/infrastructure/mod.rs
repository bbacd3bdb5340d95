//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete transports around the relay core:
//! the upstream WebSocket client, the subscriber fan-out hub, and the
//! HTTP servers.

/// Upstream exchange WebSocket client.
pub mod upstream;

/// Subscriber registry and concurrent fan-out.
pub mod broadcast;

/// Public relay server (`/price`, `/ws`).
pub mod server;

/// Configuration loaded from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing and OpenTelemetry integration.
pub mod telemetry;
