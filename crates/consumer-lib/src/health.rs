//! Pipeline health tracking
//!
//! Consumer-specific operational state behind the liveness and readiness
//! probes. Two things matter here: the flush path, because a failed drain
//! is the only way this process loses data it already accepted, and the
//! watch streams, because a silent watcher starves identity resolution.
//! Status is derived rather than stored: consecutive flush failures walk
//! the pipeline from ok through degraded to failing.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Consecutive flush failures after which the pipeline counts as failing.
const FLUSH_FAILURE_LIMIT: u32 = 3;

/// Derived pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    /// Flushes are landing.
    Ok,
    /// Recent flushes failed; data is being lost but the next tick retries.
    Degraded,
    /// The flush path has failed repeatedly and shows no sign of recovery.
    Failing,
}

/// Flush-path state as exposed on the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushHealth {
    /// Unix seconds of the last successful drain, if any yet.
    pub last_success_unix: Option<i64>,
    /// Samples persisted by the last successful drain.
    pub last_batch: usize,
    pub consecutive_failures: u32,
    /// Samples discarded by failed drains since startup.
    pub samples_lost: u64,
}

/// Watch-stream state. Informational: the watcher backs off and
/// re-lists on its own, so errors here never gate liveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchHealth {
    pub stream_errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Point-in-time view served by `healthz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: PipelineStatus,
    pub flush: FlushHealth,
    pub watch: WatchHealth,
}

/// Readiness as served by `readyz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Default)]
struct MonitorState {
    ready: bool,
    last_flush_unix: Option<i64>,
    last_flush_batch: usize,
    consecutive_flush_failures: u32,
    samples_lost: u64,
    watch_stream_errors: u64,
    last_watch_error: Option<String>,
}

impl MonitorState {
    fn status(&self) -> PipelineStatus {
        if self.consecutive_flush_failures >= FLUSH_FAILURE_LIMIT {
            PipelineStatus::Failing
        } else if self.consecutive_flush_failures > 0 {
            PipelineStatus::Degraded
        } else {
            PipelineStatus::Ok
        }
    }
}

/// Tracks the consumer's operational state. Cheap to clone; all clones
/// share the same state.
#[derive(Clone)]
pub struct HealthMonitor {
    state: Arc<RwLock<MonitorState>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MonitorState::default())),
        }
    }

    /// Flip once startup completes (stores open, syncer running).
    pub fn set_ready(&self, ready: bool) {
        self.write().ready = ready;
    }

    /// A drain reached the metrics store.
    pub fn record_flush_success(&self, batch: usize) {
        let mut state = self.write();
        state.last_flush_unix = Some(chrono::Utc::now().timestamp());
        state.last_flush_batch = batch;
        state.consecutive_flush_failures = 0;
    }

    /// A drain failed; its batch is gone.
    pub fn record_flush_failure(&self, lost: usize) {
        let mut state = self.write();
        state.consecutive_flush_failures += 1;
        state.samples_lost += lost as u64;
    }

    /// A watch stream returned an error before resuming.
    pub fn record_watch_error(&self, kind: &str, error: &str) {
        let mut state = self.write();
        state.watch_stream_errors += 1;
        state.last_watch_error = Some(format!("{kind}: {error}"));
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let state = self.read();
        HealthSnapshot {
            status: state.status(),
            flush: FlushHealth {
                last_success_unix: state.last_flush_unix,
                last_batch: state.last_flush_batch,
                consecutive_failures: state.consecutive_flush_failures,
                samples_lost: state.samples_lost,
            },
            watch: WatchHealth {
                stream_errors: state.watch_stream_errors,
                last_error: state.last_watch_error.clone(),
            },
        }
    }

    pub fn readiness(&self) -> Readiness {
        let state = self.read();
        if !state.ready {
            Readiness {
                ready: false,
                reason: Some("starting up".to_string()),
            }
        } else if state.status() == PipelineStatus::Failing {
            Readiness {
                ready: false,
                reason: Some("flush pipeline failing".to_string()),
            }
        } else {
            Readiness {
                ready: true,
                reason: None,
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MonitorState> {
        self.state.read().expect("health monitor lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, MonitorState> {
        self.state.write().expect("health monitor lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_monitor_is_ok_but_not_ready() {
        let monitor = HealthMonitor::new();

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.status, PipelineStatus::Ok);
        assert_eq!(snapshot.flush.last_success_unix, None);
        assert_eq!(snapshot.flush.samples_lost, 0);

        let readiness = monitor.readiness();
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[test]
    fn test_readiness_follows_set_ready() {
        let monitor = HealthMonitor::new();

        monitor.set_ready(true);
        assert!(monitor.readiness().ready);

        monitor.set_ready(false);
        assert!(!monitor.readiness().ready);
    }

    #[test]
    fn test_flush_failures_walk_degraded_then_failing() {
        let monitor = HealthMonitor::new();

        monitor.record_flush_failure(10);
        assert_eq!(monitor.snapshot().status, PipelineStatus::Degraded);

        monitor.record_flush_failure(10);
        assert_eq!(monitor.snapshot().status, PipelineStatus::Degraded);

        monitor.record_flush_failure(10);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.status, PipelineStatus::Failing);
        assert_eq!(snapshot.flush.consecutive_failures, 3);
        assert_eq!(snapshot.flush.samples_lost, 30);
    }

    #[test]
    fn test_failing_pipeline_blocks_readiness() {
        let monitor = HealthMonitor::new();
        monitor.set_ready(true);

        for _ in 0..FLUSH_FAILURE_LIMIT {
            monitor.record_flush_failure(1);
        }

        let readiness = monitor.readiness();
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("flush pipeline failing"));
    }

    #[test]
    fn test_flush_success_resets_failures_but_keeps_losses() {
        let monitor = HealthMonitor::new();

        monitor.record_flush_failure(25);
        monitor.record_flush_success(100);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.status, PipelineStatus::Ok);
        assert_eq!(snapshot.flush.consecutive_failures, 0);
        assert_eq!(snapshot.flush.last_batch, 100);
        assert!(snapshot.flush.last_success_unix.is_some());
        // Lost samples stay on the books.
        assert_eq!(snapshot.flush.samples_lost, 25);
    }

    #[test]
    fn test_watch_errors_are_informational() {
        let monitor = HealthMonitor::new();
        monitor.set_ready(true);

        monitor.record_watch_error("Pod", "connection reset");
        monitor.record_watch_error("Node", "timed out");

        let snapshot = monitor.snapshot();
        // Watchers recover on their own; status stays ok.
        assert_eq!(snapshot.status, PipelineStatus::Ok);
        assert_eq!(snapshot.watch.stream_errors, 2);
        assert_eq!(snapshot.watch.last_error.as_deref(), Some("Node: timed out"));
        assert!(monitor.readiness().ready);
    }
}
