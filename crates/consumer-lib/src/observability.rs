//! Observability infrastructure for the consumer
//!
//! Prometheus metrics covering the ingestion firehose and the flush path:
//! sample counters (ingested, dropped on overflow, unresolved, flushed),
//! flush latency, and ring occupancy.

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;

/// Histogram buckets for flush latency (in seconds).
const FLUSH_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ConsumerMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct ConsumerMetricsInner {
    samples_ingested_total: IntCounter,
    samples_dropped_total: IntCounter,
    samples_unresolved_total: IntCounter,
    samples_flushed_total: IntCounter,
    flush_duration_seconds: Histogram,
    ring_occupancy: IntGauge,
}

impl ConsumerMetricsInner {
    fn new() -> Self {
        Self {
            samples_ingested_total: register_int_counter!(
                "consumer_samples_ingested_total",
                "Raw metrics received on the ingestion endpoint"
            )
            .expect("Failed to register samples_ingested_total"),

            samples_dropped_total: register_int_counter!(
                "consumer_samples_dropped_total",
                "Samples dropped because the ring window was full"
            )
            .expect("Failed to register samples_dropped_total"),

            samples_unresolved_total: register_int_counter!(
                "consumer_samples_unresolved_total",
                "Samples accepted with resource_id 0 because the UID was unknown"
            )
            .expect("Failed to register samples_unresolved_total"),

            samples_flushed_total: register_int_counter!(
                "consumer_samples_flushed_total",
                "Samples persisted to the metrics store"
            )
            .expect("Failed to register samples_flushed_total"),

            flush_duration_seconds: register_histogram!(
                "consumer_flush_duration_seconds",
                "Time spent writing one flushed batch to the metrics store",
                FLUSH_BUCKETS.to_vec()
            )
            .expect("Failed to register flush_duration_seconds"),

            ring_occupancy: register_int_gauge!(
                "consumer_ring_occupancy",
                "Samples currently held in the ring window"
            )
            .expect("Failed to register ring_occupancy"),
        }
    }
}

/// Consumer metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ConsumerMetrics {
    _private: (),
}

impl Default for ConsumerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ConsumerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ConsumerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_samples_ingested(&self, count: u64) {
        self.inner().samples_ingested_total.inc_by(count);
    }

    pub fn inc_samples_dropped(&self, count: u64) {
        self.inner().samples_dropped_total.inc_by(count);
    }

    pub fn inc_samples_unresolved(&self, count: u64) {
        self.inner().samples_unresolved_total.inc_by(count);
    }

    pub fn inc_samples_flushed(&self, count: u64) {
        self.inner().samples_flushed_total.inc_by(count);
    }

    pub fn observe_flush_duration(&self, duration_secs: f64) {
        self.inner().flush_duration_seconds.observe(duration_secs);
    }

    pub fn set_ring_occupancy(&self, count: i64) {
        self.inner().ring_occupancy.set(count);
    }
}
