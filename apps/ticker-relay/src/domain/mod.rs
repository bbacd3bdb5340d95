//! Domain Layer - Core relay types.
//!
//! This layer contains the normalized tick, the single-slot freshness
//! cache, and feed state tracking. Nothing here performs I/O.

/// Normalized tick and snapshot types.
pub mod tick;

/// Single-slot latest-tick cache.
pub mod freshness;

/// Upstream feed connection state.
pub mod feed;
