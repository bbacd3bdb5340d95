//! Broadcast Fan-out
//!
//! Holds the set of live subscriber connections and delivers each payload
//! to all of them concurrently.
//!
//! # Architecture
//!
//! The `BroadcastHub` keeps subscribers in a map guarded by its own
//! `RwLock`, independent of the freshness cache. A broadcast:
//!
//! 1. Takes a snapshot of the map under the read lock (cloning `Arc`s)
//! 2. Releases the lock before any `.await`
//! 3. Delivers to every snapshot entry concurrently, each bounded by
//!    `send_timeout`
//!
//! Register and deregister never wait on an in-flight broadcast, and a
//! broadcast never sees a half-updated set. A failed delivery is counted
//! and logged; the connection stays registered until its own read loop
//! notices the disconnect and deregisters it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::BroadcastSettings;
use crate::application::ports::{
    ConnectionId, FanoutSummary, Payload, SubscriberSendError, SubscriberSink, TickFanout,
};
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the broadcast hub.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Upper bound for a single delivery.
    pub send_timeout: Duration,
    /// Outbound buffer size for each WebSocket subscriber.
    pub subscriber_buffer: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(2),
            subscriber_buffer: 256,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            send_timeout: settings.send_timeout,
            subscriber_buffer: settings.subscriber_buffer,
        }
    }
}

// =============================================================================
// Broadcast Report
// =============================================================================

/// Outcome of one broadcast.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Number of subscribers in the snapshot.
    pub attempted: usize,
    /// Number of successful deliveries.
    pub delivered: usize,
    /// Failed deliveries by connection.
    pub failures: Vec<(ConnectionId, SubscriberSendError)>,
}

impl BroadcastReport {
    /// Number of failed deliveries.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Check if every delivery succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Registry of subscriber connections with concurrent fan-out.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use ticker_relay::application::ports::SubscriberSink;
/// use ticker_relay::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// async fn example(sink: Arc<dyn SubscriberSink>) {
///     let hub = BroadcastHub::new(BroadcastConfig::default());
///     let id = hub.register(sink);
///
///     let report = hub.broadcast(Arc::from("{\"symbol\":\"BTCUSDT\"}")).await;
///     assert_eq!(report.attempted, 1);
///
///     hub.deregister(&id);
/// }
/// ```
pub struct BroadcastHub {
    config: BroadcastConfig,
    subscribers: RwLock<HashMap<ConnectionId, Arc<dyn SubscriberSink>>>,
    broadcasts: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("config", &self.config)
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl BroadcastHub {
    /// Create a new broadcast hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            subscribers: RwLock::new(HashMap::new()),
            broadcasts: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Create a new broadcast hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Get the hub configuration.
    #[must_use]
    pub const fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register an accepted connection and return its identifier.
    pub fn register(&self, sink: Arc<dyn SubscriberSink>) -> ConnectionId {
        let mut id = Uuid::new_v4();
        loop {
            if self.register_with_id(id, Arc::clone(&sink)) {
                return id;
            }
            id = Uuid::new_v4();
        }
    }

    /// Register a connection under a caller-chosen identifier.
    ///
    /// Returns `false` (and leaves the set untouched) if the identifier is
    /// already registered.
    pub fn register_with_id(&self, id: ConnectionId, sink: Arc<dyn SubscriberSink>) -> bool {
        let count = {
            let mut subscribers = self.subscribers.write();
            if subscribers.contains_key(&id) {
                return false;
            }
            subscribers.insert(id, sink);
            subscribers.len()
        };

        #[allow(clippy::cast_precision_loss)]
        metrics::set_subscribers(count as f64);
        tracing::info!(connection_id = %id, total = count, "Subscriber registered");
        true
    }

    /// Remove a connection. Removing an absent connection is a no-op.
    ///
    /// Returns `true` if the connection was registered.
    pub fn deregister(&self, id: &ConnectionId) -> bool {
        let (removed, count) = {
            let mut subscribers = self.subscribers.write();
            let removed = subscribers.remove(id).is_some();
            (removed, subscribers.len())
        };

        if removed {
            #[allow(clippy::cast_precision_loss)]
            metrics::set_subscribers(count as f64);
            tracing::info!(connection_id = %id, total = count, "Subscriber deregistered");
        }
        removed
    }

    /// Check whether a connection is registered.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.subscribers.read().contains_key(id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn snapshot(&self) -> Vec<(ConnectionId, Arc<dyn SubscriberSink>)> {
        self.subscribers
            .read()
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect()
    }

    // =========================================================================
    // Fan-out
    // =========================================================================

    /// Deliver a payload to every registered connection concurrently.
    ///
    /// Failures are recorded in the report and never propagated.
    pub async fn broadcast(&self, payload: Payload) -> BroadcastReport {
        let started = Instant::now();
        let targets = self.snapshot();
        let send_timeout = self.config.send_timeout;

        let deliveries = targets.into_iter().map(|(id, sink)| {
            let payload = Arc::clone(&payload);
            async move {
                let result = match tokio::time::timeout(send_timeout, sink.deliver(payload)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(SubscriberSendError::TimedOut(
                        u64::try_from(send_timeout.as_millis()).unwrap_or(u64::MAX),
                    )),
                };
                (id, result)
            }
        });

        let results = future::join_all(deliveries).await;

        let mut report = BroadcastReport {
            attempted: results.len(),
            ..BroadcastReport::default()
        };
        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    match e {
                        SubscriberSendError::BufferFull | SubscriberSendError::Closed => {
                            tracing::debug!(connection_id = %id, error = %e, "Delivery skipped");
                        }
                        SubscriberSendError::TimedOut(_) | SubscriberSendError::Transport(_) => {
                            tracing::warn!(connection_id = %id, error = %e, "Delivery failed");
                        }
                    }
                    metrics::record_delivery_failed(e.reason());
                    report.failures.push((id, e));
                }
            }
        }

        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.failed
            .fetch_add(report.failed() as u64, Ordering::Relaxed);
        metrics::record_delivered(report.delivered as u64);
        metrics::record_broadcast_duration(started.elapsed());

        report
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            subscribers: self.subscriber_count(),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl TickFanout for BroadcastHub {
    async fn fan_out(&self, payload: Payload) -> FanoutSummary {
        metrics::record_tick_relayed();
        let report = self.broadcast(payload).await;
        FanoutSummary {
            attempted: report.attempted,
            delivered: report.delivered,
            failed: report.failed(),
        }
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Statistics about the broadcast hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Currently registered subscribers.
    pub subscribers: usize,
    /// Broadcasts performed since startup.
    pub broadcasts: u64,
    /// Successful deliveries since startup.
    pub delivered: u64,
    /// Failed deliveries since startup.
    pub failed: u64,
}

// =============================================================================
// Tests
// =============================================================================
