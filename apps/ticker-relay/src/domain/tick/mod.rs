//! Normalized Tick Types
//!
//! The canonical internal representation of one upstream price update.
//! Codec-agnostic: the upstream adapter produces these, the relay caches
//! and fans them out, and the HTTP surface serializes them unchanged.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Message returned by the query surface before the first tick arrives.
pub const UNAVAILABLE_MESSAGE: &str = "Price data not yet available. Listener may be connecting.";

// =============================================================================
// Normalized Tick
// =============================================================================

/// One normalized price update.
///
/// # Wire Format (JSON)
/// ```json
/// {"symbol":"BTCUSDT","last_price":65000.12,"change_percent":1.23,"timestamp_ms":1700000000000}
/// ```
///
/// `symbol` and `timestamp_ms` serialize as `null` when the upstream frame
/// omitted them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTick {
    /// Instrument symbol (e.g. `BTCUSDT`).
    pub symbol: Option<String>,
    /// Last traded price.
    pub last_price: f64,
    /// 24h price change in percent.
    pub change_percent: f64,
    /// Upstream event time in milliseconds since the Unix epoch.
    pub timestamp_ms: Option<i64>,
}

impl NormalizedTick {
    /// Create a new tick.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        last_price: f64,
        change_percent: f64,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            symbol: Some(symbol.into()),
            last_price,
            change_percent,
            timestamp_ms: Some(timestamp_ms),
        }
    }

    /// Event time as a UTC timestamp, if present and in range.
    #[must_use]
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        self.timestamp_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    /// Serialize to the compact JSON payload pushed to subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (non-finite floats are
    /// written as `null` by `serde_json`, so this is not expected).
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Price Snapshot
// =============================================================================

/// Result of a latest-price query.
///
/// Distinguishes "no data yet" from transport failures: an unavailable
/// snapshot is a normal answer, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceSnapshot {
    /// The most recent tick.
    Available(Arc<NormalizedTick>),
    /// No tick has been received since startup.
    Unavailable,
}

impl PriceSnapshot {
    /// Check if a tick is available.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    /// Get the tick, if available.
    #[must_use]
    pub fn tick(&self) -> Option<&NormalizedTick> {
        match self {
            Self::Available(tick) => Some(tick),
            Self::Unavailable => None,
        }
    }
}

impl From<Option<Arc<NormalizedTick>>> for PriceSnapshot {
    fn from(value: Option<Arc<NormalizedTick>>) -> Self {
        value.map_or(Self::Unavailable, Self::Available)
    }
}

/// JSON body returned by the query surface when no tick is cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableBody {
    /// Human-readable reason.
    pub error: String,
}

impl Default for UnavailableBody {
    fn default() -> Self {
        Self {
            error: UNAVAILABLE_MESSAGE.to_string(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
