//! Live metrics view
//!
//! Joins identity rows against the ring window's most recent samples.
//! Only pods with a sample inside the freshness window are returned.
//!
//! Per-pod container samples aggregate under a single synthetic
//! "default" container id: the sample record does not carry container
//! identity, so finer partitioning is not possible without widening it.
//! The same applies to volume samples that resolved to a pod; they are
//! not partitioned per volume and the `pvcs` array stays empty today.

use super::{internal_error, query_id, sql_params, AppState};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Samples older than this are not part of the live view.
const LIVE_WINDOW_SECS: i64 = 5;

#[derive(Debug, Serialize)]
pub struct LiveMetricsResponse {
    pub timestamp: i64,
    pub pods: Vec<LivePod>,
}

#[derive(Debug, Serialize)]
pub struct LivePod {
    pub id: i64,
    pub name: String,
    pub uid: String,
    pub namespace: String,
    pub node: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
    pub containers: Vec<ContainerUsage>,
    pub pvcs: Vec<PvcUsage>,
}

#[derive(Debug, Serialize)]
pub struct ContainerUsage {
    pub id: String,
    pub cpu_ms: f64,
    pub mem_mb: f64,
    pub mem_limit_mb: f64,
}

impl ContainerUsage {
    fn default_container() -> Self {
        Self {
            id: "default".to_string(),
            cpu_ms: 0.0,
            mem_mb: 0.0,
            mem_limit_mb: 0.0,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PvcUsage {
    pub id: i64,
    pub name: String,
    pub volume_name: String,
    pub total_mb: f64,
    pub used_mb: f64,
    pub free_mb: f64,
}

struct PodIdentity {
    id: i64,
    name: String,
    uid: String,
    namespace: String,
    node: String,
    deployment: Option<String>,
}

pub(super) async fn live_metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let now = chrono::Utc::now().timestamp();
    let cutoff = now - LIVE_WINDOW_SECS;

    let samples = state.ring.read_all();
    let active: HashSet<i64> = samples
        .iter()
        .filter(|s| s.time >= cutoff && s.resource_id > 0)
        .map(|s| s.resource_id)
        .collect();

    if active.is_empty() {
        return Json(LiveMetricsResponse {
            timestamp: now,
            pods: Vec::new(),
        })
        .into_response();
    }

    let mut sql = String::from(
        "SELECT p.id, p.name, p.uid, ns.name, n.name, d.name
         FROM pods p
         JOIN namespaces ns ON p.namespace_id = ns.id
         JOIN nodes n ON p.node_id = n.id
         LEFT JOIN deployments d ON p.deployment_id = d.id
         WHERE 1=1",
    );
    let mut args: Vec<i64> = Vec::new();

    if let Some(id) = query_id(&params, "deployment") {
        sql.push_str(" AND p.deployment_id = ?");
        args.push(id);
    }
    if let Some(id) = query_id(&params, "node") {
        sql.push_str(" AND p.node_id = ?");
        args.push(id);
    }
    if let Some(id) = query_id(&params, "pod") {
        sql.push_str(" AND p.id = ?");
        args.push(id);
    }
    sql.push_str(" ORDER BY p.name");

    let identities = match state.identity.query(&sql, &sql_params(&args), |row| {
        Ok(PodIdentity {
            id: row.get(0)?,
            name: row.get(1)?,
            uid: row.get(2)?,
            namespace: row.get(3)?,
            node: row.get(4)?,
            deployment: row.get(5)?,
        })
    }) {
        Ok(rows) => rows,
        Err(e) => return internal_error(e),
    };

    let mut pods = Vec::new();
    for identity in identities {
        if !active.contains(&identity.id) {
            continue;
        }

        // Last value wins within the window; samples are in arrival order.
        let mut usage: Option<ContainerUsage> = None;
        for sample in &samples {
            if sample.resource_id != identity.id || sample.time < cutoff {
                continue;
            }
            match sample.metric_type.as_str() {
                "cpu_ms" => {
                    usage
                        .get_or_insert_with(ContainerUsage::default_container)
                        .cpu_ms = sample.value;
                }
                "mem_mb" => {
                    usage
                        .get_or_insert_with(ContainerUsage::default_container)
                        .mem_mb = sample.value;
                }
                "mem_limit_mb" => {
                    usage
                        .get_or_insert_with(ContainerUsage::default_container)
                        .mem_limit_mb = sample.value;
                }
                _ => {}
            }
        }

        pods.push(LivePod {
            id: identity.id,
            name: identity.name,
            uid: identity.uid,
            namespace: identity.namespace,
            node: identity.node,
            deployment: identity.deployment,
            containers: usage.into_iter().collect(),
            pvcs: Vec::new(),
        });
    }

    Json(LiveMetricsResponse {
        timestamp: now,
        pods,
    })
    .into_response()
}
