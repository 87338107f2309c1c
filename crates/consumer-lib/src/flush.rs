//! Timer-driven persistence of the ring window
//!
//! Drains the window on a fixed cadence and writes each batch to the
//! metrics store in one transaction. A failed batch is logged and
//! discarded; the window keeps filling regardless.

use crate::buffer::RingWindow;
use crate::health::HealthMonitor;
use crate::observability::ConsumerMetrics;
use crate::store::MetricsStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info};

/// Default seconds between drains.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Drains the ring window into the metrics store on a timer.
pub struct FlushWorker {
    ring: Arc<RingWindow>,
    store: Arc<MetricsStore>,
    interval: Duration,
    health: HealthMonitor,
    metrics: ConsumerMetrics,
}

impl FlushWorker {
    pub fn new(
        ring: Arc<RingWindow>,
        store: Arc<MetricsStore>,
        interval: Duration,
        health: HealthMonitor,
        metrics: ConsumerMetrics,
    ) -> Self {
        Self {
            ring,
            store,
            interval,
            health,
            metrics,
        }
    }

    /// Run until shutdown is signalled, then perform one final drain so a
    /// clean exit loses as little of the window as possible.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting flush worker"
        );

        let mut ticker = interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush_once();
                }
                _ = shutdown.recv() => {
                    self.flush_once();
                    info!("Flush worker stopped");
                    break;
                }
            }
        }
    }

    /// Drain the window and persist the batch. Returns the number of
    /// samples persisted; a failed batch counts as zero and is gone.
    pub fn flush_once(&self) -> usize {
        let samples = self.ring.flush();
        if samples.is_empty() {
            return 0;
        }

        let start = Instant::now();
        let count = samples.len();
        match self.store.batch_insert(&samples) {
            Ok(()) => {
                self.metrics
                    .observe_flush_duration(start.elapsed().as_secs_f64());
                self.metrics.inc_samples_flushed(count as u64);
                self.health.record_flush_success(count);
                debug!(count, "Flushed samples to metrics store");
                count
            }
            Err(e) => {
                error!(count, error = %e, "Failed to flush samples; batch dropped");
                self.health.record_flush_failure(count);
                0
            }
        }
    }
}
