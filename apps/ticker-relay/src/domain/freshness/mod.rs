//! Freshness Cache
//!
//! Single-slot cache holding only the most recent tick.
//!
//! # Design
//!
//! The slot stores an `Arc<NormalizedTick>`. A write swaps the `Arc` under
//! a short write lock, so readers either see the previous tick or the new
//! one, never a mix of both. Readers clone the `Arc` and release the lock
//! immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::domain::tick::{NormalizedTick, PriceSnapshot};

/// Holds the latest normalized tick.
#[derive(Debug, Default)]
pub struct FreshnessCache {
    slot: RwLock<Option<Arc<NormalizedTick>>>,
    updates: AtomicU64,
}

impl FreshnessCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached tick, returning the previous one.
    pub fn replace(&self, tick: NormalizedTick) -> Option<Arc<NormalizedTick>> {
        let tick = Arc::new(tick);
        let previous = self.slot.write().replace(tick);
        self.updates.fetch_add(1, Ordering::Relaxed);
        previous
    }

    /// Get the latest tick, if any.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<NormalizedTick>> {
        self.slot.read().clone()
    }

    /// Get the latest tick as a query answer.
    #[must_use]
    pub fn snapshot(&self) -> PriceSnapshot {
        PriceSnapshot::from(self.latest())
    }

    /// Check whether any tick has been cached.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Number of replacements since startup.
    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}

/// Shared freshness cache reference.
pub type SharedFreshnessCache = Arc<FreshnessCache>;
