//! Core data models for the metrics consumer

use serde::{Deserialize, Serialize};

/// A single resolved metric sample.
///
/// Produced by the ingestion endpoint, held in the ring window, and
/// persisted to the metrics store by the flush worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Wall-clock instant reported by the collector, unix epoch seconds.
    pub time: i64,
    /// Internal id of the owning pod or PVC; 0 when resolution failed.
    pub resource_id: i64,
    /// Short metric key ("cpu_ms", "mem_mb", "used_mb", ...).
    pub metric_type: String,
    pub value: f64,
    /// How the value was aggregated upstream. Collectors emit point
    /// readings, so everything entering the pipeline today is "raw".
    #[serde(default = "default_aggregation_kind")]
    pub aggregation_kind: String,
}

impl Sample {
    /// An unaggregated sample as collectors emit them.
    pub fn raw(time: i64, resource_id: i64, metric_type: impl Into<String>, value: f64) -> Self {
        Self {
            time,
            resource_id,
            metric_type: metric_type.into(),
            value,
            aggregation_kind: default_aggregation_kind(),
        }
    }
}

fn default_aggregation_kind() -> String {
    "raw".to_string()
}

/// Which cache a raw metric's UID resolves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveKind {
    Pod,
    Pvc,
}
