//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Ticks**: received from upstream, relayed by the coordinator
//! - **Frames**: rejected by the codec
//! - **Deliveries**: per-subscriber successes and failures by reason
//! - **Connections**: upstream connectivity, subscriber count, reconnects
//! - **Latency**: fan-out duration per broadcast
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder, so
//! tests can exercise instrumented code without it.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const TICKS_RECEIVED: &str = "ticker_relay_ticks_received_total";
const TICKS_RELAYED: &str = "ticker_relay_ticks_relayed_total";
const FRAMES_REJECTED: &str = "ticker_relay_frames_rejected_total";
const DELIVERIES: &str = "ticker_relay_deliveries_total";
const UPSTREAM_RECONNECTS: &str = "ticker_relay_upstream_reconnects_total";
const UPSTREAM_CONNECTED: &str = "ticker_relay_upstream_connected";
const SUBSCRIBERS: &str = "ticker_relay_subscribers";
const BROADCAST_DURATION: &str = "ticker_relay_broadcast_duration_seconds";

/// Histogram buckets for fan-out duration (seconds).
const BROADCAST_BUCKETS: &[f64] = &[
    0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0,
];

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first.
///
/// # Errors
///
/// Returns an error if the recorder cannot be built or installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(BROADCAST_DURATION.to_string()), BROADCAST_BUCKETS)?
        .install_recorder()?;

    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Tick counters
    describe_counter!(TICKS_RECEIVED, "Total ticks decoded from the upstream feed");
    describe_counter!(TICKS_RELAYED, "Total ticks cached and fanned out");
    describe_counter!(FRAMES_REJECTED, "Total upstream frames dropped as malformed");

    // Delivery counters
    describe_counter!(DELIVERIES, "Per-subscriber deliveries by outcome");

    // Connection metrics
    describe_counter!(UPSTREAM_RECONNECTS, "Total upstream reconnection attempts");
    describe_gauge!(UPSTREAM_CONNECTED, "1 when the upstream feed is connected");
    describe_gauge!(SUBSCRIBERS, "Number of registered subscriber connections");

    // Latency histograms
    describe_histogram!(BROADCAST_DURATION, "Time to fan one tick out to all subscribers");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a tick decoded from upstream.
pub fn record_tick_received() {
    counter!(TICKS_RECEIVED).increment(1);
}

/// Record a tick handed to the subscriber fan-out.
pub fn record_tick_relayed() {
    counter!(TICKS_RELAYED).increment(1);
}

/// Record a malformed upstream frame.
pub fn record_frame_rejected() {
    counter!(FRAMES_REJECTED).increment(1);
}

/// Record successful deliveries from one broadcast.
pub fn record_delivered(count: u64) {
    if count > 0 {
        counter!(DELIVERIES, "outcome" => "ok").increment(count);
    }
}

/// Record a failed delivery.
pub fn record_delivery_failed(reason: &'static str) {
    counter!(DELIVERIES, "outcome" => "failed", "reason" => reason).increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_upstream_reconnect() {
    counter!(UPSTREAM_RECONNECTS).increment(1);
}

/// Update upstream connectivity.
pub fn set_upstream_connected(connected: bool) {
    gauge!(UPSTREAM_CONNECTED).set(if connected { 1.0 } else { 0.0 });
}

/// Update the subscriber count.
pub fn set_subscribers(count: f64) {
    gauge!(SUBSCRIBERS).set(count);
}

/// Record fan-out duration of one broadcast.
pub fn record_broadcast_duration(duration: Duration) {
    histogram!(BROADCAST_DURATION).record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
