//! Relay Coordinator
//!
//! Single consumer of the relay queue. For every tick, in arrival order:
//! replace the freshness cache slot, serialize, fan out.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::TickFanout;
use crate::domain::freshness::FreshnessCache;
use crate::domain::tick::NormalizedTick;

/// Sending half of the relay queue (held by the upstream client).
pub type RelayQueueSender = mpsc::Sender<NormalizedTick>;

/// Receiving half of the relay queue (held by the coordinator).
pub type RelayQueueReceiver = mpsc::Receiver<NormalizedTick>;

/// Create the relay queue with the given capacity.
#[must_use]
pub fn relay_queue(capacity: usize) -> (RelayQueueSender, RelayQueueReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Moves ticks from the relay queue into the cache and the subscriber fan-out.
pub struct RelayCoordinator {
    queue: RelayQueueReceiver,
    cache: Arc<FreshnessCache>,
    fanout: Arc<dyn TickFanout>,
    cancel: CancellationToken,
}

impl RelayCoordinator {
    /// Create a new coordinator.
    #[must_use]
    pub const fn new(
        queue: RelayQueueReceiver,
        cache: Arc<FreshnessCache>,
        fanout: Arc<dyn TickFanout>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            cache,
            fanout,
            cancel,
        }
    }

    /// Run until cancelled or until every queue sender is dropped.
    ///
    /// Returns the number of ticks processed.
    pub async fn run(mut self) -> u64 {
        tracing::info!("Relay coordinator started");
        let mut processed = 0_u64;

        loop {
            let tick = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::info!(processed, "Relay coordinator cancelled");
                    break;
                }
                tick = self.queue.recv() => tick,
            };

            let Some(tick) = tick else {
                tracing::info!(processed, "Relay queue closed");
                break;
            };

            self.relay(tick).await;
            processed += 1;
        }

        processed
    }

    async fn relay(&self, tick: NormalizedTick) {
        let payload = tick.to_payload();
        self.cache.replace(tick);

        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize tick; skipping broadcast");
                return;
            }
        };

        let summary = self.fanout.fan_out(Arc::from(payload)).await;
        tracing::trace!(
            attempted = summary.attempted,
            delivered = summary.delivered,
            failed = summary.failed,
            "Tick broadcast"
        );
    }
}
