//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the relay services and the port interfaces that
//! decouple them from concrete transports.

/// Port interfaces for downstream subscribers.
pub mod ports;

/// Relay coordinator and task supervision.
pub mod services;
