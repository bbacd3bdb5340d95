//! WebSocket Subscriber Connections
//!
//! Adapter between an upgraded `/ws` socket and the broadcast hub.
//!
//! Each connection gets:
//!
//! - A bounded outbound queue, exposed to the hub as a [`SubscriberSink`]
//! - A writer task draining the queue into the socket
//! - A read loop that discards inbound messages and watches for closure
//! - A registration guard that deregisters from the hub exactly once,
//!   whichever way the connection ends

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ConnectionId, Payload, SubscriberSendError, SubscriberSink};
use crate::domain::freshness::SharedFreshnessCache;
use crate::infrastructure::broadcast::SharedBroadcastHub;

// =============================================================================
// Outbound Queue
// =============================================================================

/// Hub-facing half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct WsSubscriberSink {
    tx: mpsc::Sender<Payload>,
}

impl WsSubscriberSink {
    /// Create a sink and the receiver its writer task drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a payload without waiting.
    ///
    /// # Errors
    ///
    /// Returns `BufferFull` if the queue is at capacity (the payload is
    /// dropped) or `Closed` if the writer task has exited.
    pub fn try_deliver(&self, payload: Payload) -> Result<(), SubscriberSendError> {
        self.tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => SubscriberSendError::BufferFull,
            TrySendError::Closed(_) => SubscriberSendError::Closed,
        })
    }
}

#[async_trait]
impl SubscriberSink for WsSubscriberSink {
    async fn deliver(&self, payload: Payload) -> Result<(), SubscriberSendError> {
        self.try_deliver(payload)
    }
}

// =============================================================================
// Registration Guard
// =============================================================================

/// Deregisters a connection from the hub when dropped.
pub struct Registration {
    hub: SharedBroadcastHub,
    id: ConnectionId,
}

impl Registration {
    /// Register `sink` with the hub.
    #[must_use]
    pub fn register(hub: &SharedBroadcastHub, sink: Arc<dyn SubscriberSink>) -> Self {
        let id = hub.register(sink);
        Self {
            hub: Arc::clone(hub),
            id,
        }
    }

    /// The registered connection id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.hub.deregister(&self.id) {
            tracing::debug!(connection_id = %self.id, "Subscriber deregistered");
        }
    }
}

// =============================================================================
// Connection Lifecycle
// =============================================================================

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    ClientClosed,
    StreamEnded,
    ReadError,
    WriterStopped,
    Shutdown,
}

impl CloseReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::StreamEnded => "stream_ended",
            Self::ReadError => "read_error",
            Self::WriterStopped => "writer_stopped",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Suppresses the live copy of the tick a connection was seeded with.
///
/// A connection that registers while the coordinator sits between
/// replacing the cache and snapshotting the hub receives that tick twice:
/// once as the seed, once live. Only the payload directly after the seed
/// can be such a repeat.
#[derive(Debug)]
struct SeedFilter {
    seed: Option<Payload>,
    seen_seed: bool,
}

impl SeedFilter {
    const fn new(seed: Option<Payload>) -> Self {
        Self {
            seed,
            seen_seed: false,
        }
    }

    /// Whether `payload` should be written to the socket.
    fn admit(&mut self, payload: &Payload) -> bool {
        let Some(seed) = &self.seed else {
            return true;
        };
        if !self.seen_seed {
            self.seen_seed = true;
            return true;
        }
        let repeat = seed == payload;
        self.seed = None;
        !repeat
    }
}

/// Serve one upgraded subscriber socket until it closes.
pub async fn serve_subscriber(
    socket: WebSocket,
    cache: SharedFreshnessCache,
    hub: SharedBroadcastHub,
    cancel: CancellationToken,
) {
    let (sink, rx) = WsSubscriberSink::channel(hub.config().subscriber_buffer);

    // Late joiners see the current price before the next live tick. The
    // cache is read before registering, so the first live payload is either
    // this same tick or a newer one.
    let seed = cache.latest().and_then(|tick| match tick.to_payload() {
        Ok(payload) => Some(Payload::from(payload)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize cached tick");
            None
        }
    });
    let filter = SeedFilter::new(seed.clone());
    if let Some(seed) = seed {
        let _ = sink.try_deliver(seed);
    }

    let registration = Registration::register(&hub, Arc::new(sink));
    let connection_id = registration.id();
    tracing::info!(
        connection_id = %connection_id,
        subscribers = hub.subscriber_count(),
        "Subscriber connected"
    );

    let (ws_tx, mut ws_rx) = socket.split();
    let stop = cancel.child_token();
    let mut writer = tokio::spawn(write_loop(ws_tx, rx, filter, stop.clone(), connection_id));
    let mut writer_done = false;

    let reason = loop {
        tokio::select! {
            () = cancel.cancelled() => break CloseReason::Shutdown,
            _ = &mut writer => {
                writer_done = true;
                break CloseReason::WriterStopped;
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(connection_id = %connection_id, frame = ?frame, "Close frame received");
                    break CloseReason::ClientClosed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(connection_id = %connection_id, error = %e, "Subscriber read error");
                    break CloseReason::ReadError;
                }
                None => break CloseReason::StreamEnded,
            },
        }
    };

    drop(registration);
    stop.cancel();
    if !writer_done
        && let Err(e) = writer.await
        && e.is_panic()
    {
        tracing::error!(connection_id = %connection_id, "Subscriber writer panicked");
    }

    tracing::info!(
        connection_id = %connection_id,
        reason = reason.as_str(),
        subscribers = hub.subscriber_count(),
        "Subscriber disconnected"
    );
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Payload>,
    mut filter: SeedFilter,
    stop: CancellationToken,
    connection_id: ConnectionId,
) {
    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            payload = rx.recv() => {
                let Some(payload) = payload else { break };
                if !filter.admit(&payload) {
                    tracing::trace!(connection_id = %connection_id, "Skipped repeat of seeded tick");
                    continue;
                }
                if let Err(e) = ws_tx.send(Message::Text(payload.to_string().into())).await {
                    tracing::debug!(connection_id = %connection_id, error = %e, "Subscriber write failed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::broadcast::BroadcastHub;

    #[test]
    fn full_buffer_drops_payload() {
        let (sink, _rx) = WsSubscriberSink::channel(1);
        assert!(sink.try_deliver(Arc::from("a")).is_ok());
        assert_eq!(
            sink.try_deliver(Arc::from("b")),
            Err(SubscriberSendError::BufferFull)
        );
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let (sink, rx) = WsSubscriberSink::channel(4);
        drop(rx);
        assert_eq!(
            sink.try_deliver(Arc::from("a")),
            Err(SubscriberSendError::Closed)
        );
    }

    #[tokio::test]
    async fn queued_payloads_arrive_in_order() {
        let (sink, mut rx) = WsSubscriberSink::channel(4);
        for text in ["1", "2", "3"] {
            sink.deliver(Arc::from(text)).await.unwrap();
        }
        for expected in ["1", "2", "3"] {
            assert_eq!(&*rx.recv().await.unwrap(), expected);
        }
    }

    #[test]
    fn seed_repeat_is_skipped_once() {
        let mut filter = SeedFilter::new(Some(Arc::from("t7")));
        assert!(filter.admit(&Arc::from("t7")));
        assert!(!filter.admit(&Arc::from("t7")));
        assert!(filter.admit(&Arc::from("t8")));
        assert!(filter.admit(&Arc::from("t8")));
    }

    #[test]
    fn newer_tick_after_seed_is_kept() {
        let mut filter = SeedFilter::new(Some(Arc::from("t7")));
        assert!(filter.admit(&Arc::from("t7")));
        assert!(filter.admit(&Arc::from("t8")));
        // Disarmed after the first live payload
        assert!(filter.admit(&Arc::from("t7")));
    }

    #[test]
    fn unseeded_connection_admits_everything() {
        let mut filter = SeedFilter::new(None);
        for _ in 0..3 {
            assert!(filter.admit(&Arc::from("t1")));
        }
    }

    #[test]
    fn registration_guard_deregisters_once() {
        let hub: SharedBroadcastHub = Arc::new(BroadcastHub::with_defaults());
        let (sink, _rx) = WsSubscriberSink::channel(4);

        let registration = Registration::register(&hub, Arc::new(sink));
        let id = registration.id();
        assert!(hub.contains(&id));

        drop(registration);
        assert!(!hub.contains(&id));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn registration_released_when_task_aborted() {
        let hub: SharedBroadcastHub = Arc::new(BroadcastHub::with_defaults());
        let task_hub = Arc::clone(&hub);

        let handle = tokio::spawn(async move {
            let (sink, _rx) = WsSubscriberSink::channel(4);
            let _registration = Registration::register(&task_hub, Arc::new(sink));
            futures::future::pending::<()>().await;
        });

        while hub.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        handle.abort();
        let _ = handle.await;
        assert_eq!(hub.subscriber_count(), 0);
    }
}
