//! Metric ingestion endpoint
//!
//! Accepts per-node JSON batches from collector agents, resolves each raw
//! metric to an internal id through the syncer's caches, and appends the
//! resolved samples to the ring window. The handler never touches the
//! durable stores: a batch is acknowledged once enqueued, and unresolvable
//! metrics are kept with `resource_id = 0` rather than rejected.

use crate::buffer::RingWindow;
use crate::models::{ResolveKind, Sample};
use crate::observability::ConsumerMetrics;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Pod UID embedded in a cgroup slice path; underscores stand in for
/// hyphens on the systemd side.
static POD_SLICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"pod([0-9a-fA-F_]+)(?:\.slice)?").expect("invalid pod slice regex"));

/// Canonical dynamically-provisioned volume name: `pvc-<uuid>`.
static PVC_VOLUME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^pvc-([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})$")
        .expect("invalid pvc volume regex")
});

/// Metric keys that describe volume usage rather than container usage.
const VOLUME_KEYS: &[&str] = &["pvc_usage", "total_mb", "used_mb", "free_mb"];

/// Resolves raw UIDs to internal ids. Implemented by the resource syncer;
/// a lookup miss means the object has not been observed yet.
pub trait IdResolver: Send + Sync {
    fn resolve(&self, uid: &str, kind: ResolveKind) -> Option<i64>;
}

/// One collector push: everything a node scraped in the last cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricBatch {
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub metrics: Vec<RawMetric>,
}

/// A single unresolved metric as emitted by the collector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMetric {
    /// Collector-side category ("container", "node_cpu", "pvc_usage").
    #[serde(rename = "type", default)]
    pub metric_type: String,
    /// Cgroup slice path for container metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_id: Option<String>,
    /// Explicit pod UID, set for volume metrics on non-PVC volumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_uid: Option<String>,
    /// Volume name for PVC metrics; carries the PVC UID when the volume
    /// was dynamically provisioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: f64,
    /// Unix epoch seconds as observed by the collector.
    #[serde(default)]
    pub ts: i64,
}

/// State shared by the ingestion route.
pub struct IngestState {
    pub ring: Arc<RingWindow>,
    pub resolver: Arc<dyn IdResolver>,
    pub metrics: ConsumerMetrics,
}

/// `POST /api/v1/ingest`. Responds 202 once the batch is enqueued in the
/// ring window; persistence happens later on the flush cadence.
pub async fn handle_ingest(State(state): State<Arc<IngestState>>, body: Bytes) -> Response {
    let batch: MetricBatch = match serde_json::from_slice(&body) {
        Ok(batch) => batch,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid JSON: {e}") })),
            )
                .into_response();
        }
    };

    let mut unresolved = 0u64;
    let mut dropped = 0u64;
    for raw in &batch.metrics {
        let resource_id = classify(raw)
            .and_then(|(uid, kind)| state.resolver.resolve(&uid, kind))
            .unwrap_or(0);
        if resource_id == 0 {
            unresolved += 1;
        }

        let sample = Sample::raw(raw.ts, resource_id, raw.key.clone(), raw.value);
        if !state.ring.add(sample) {
            dropped += 1;
        }
    }

    state.metrics.inc_samples_ingested(batch.metrics.len() as u64);
    if unresolved > 0 {
        state.metrics.inc_samples_unresolved(unresolved);
    }
    if dropped > 0 {
        state.metrics.inc_samples_dropped(dropped);
    }
    state.metrics.set_ring_occupancy(state.ring.len() as i64);

    StatusCode::ACCEPTED.into_response()
}

/// Determine the UID and resolution kind for a raw metric.
///
/// Volume metrics carrying a canonical `pvc-<uuid>` name resolve as PVCs;
/// other volumes (config maps, secrets, scratch disks) fall back to the
/// owning pod. Container metrics recover the pod UID from the cgroup
/// slice path, substituting underscores back to hyphens.
fn classify(raw: &RawMetric) -> Option<(String, ResolveKind)> {
    let volume = raw.volume.as_deref().unwrap_or("");
    if !volume.is_empty() && VOLUME_KEYS.contains(&raw.key.as_str()) {
        if let Some(caps) = PVC_VOLUME_RE.captures(volume) {
            return Some((caps[1].to_string(), ResolveKind::Pvc));
        }
        return raw
            .pod_uid
            .clone()
            .filter(|uid| !uid.is_empty())
            .map(|uid| (uid, ResolveKind::Pod));
    }

    let pod_id = raw.pod_id.as_deref().unwrap_or("");
    let caps = POD_SLICE_RE.captures(pod_id)?;
    Some((caps[1].replace('_', "-"), ResolveKind::Pod))
}
