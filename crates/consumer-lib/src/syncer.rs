//! Orchestrator identity syncer
//!
//! Watches cluster objects (pods, PVCs, nodes, workload controllers) and
//! mirrors their identity into the relational store, maintaining in-memory
//! UID caches so the ingestion path can resolve raw metrics without ever
//! touching disk. Add and update events share one upsert path; deletes
//! are intentionally ignored and stale rows tolerated.

use crate::health::HealthMonitor;
use crate::ingest::IdResolver;
use crate::models::ResolveKind;
use crate::store::{EntityKind, IdentityStore};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Node, PersistentVolumeClaim, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::{watcher, watcher::Event, WatchStreamExt};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Prefix for placeholder node uids created when a pod references a node
/// that has not been observed yet.
const STUB_NODE_PREFIX: &str = "stub-";

/// In-memory lookup state. One lock covers all five maps so a reader sees
/// a coherent snapshot.
#[derive(Default)]
struct Caches {
    /// Pod uid -> internal id.
    pods: HashMap<String, i64>,
    /// PVC uid -> internal id.
    pvcs: HashMap<String, i64>,
    /// Namespace name -> internal id.
    namespaces: HashMap<String, i64>,
    /// Node name -> internal id. Keyed by name because a pod spec carries
    /// only the node name, never its uid.
    nodes: HashMap<String, i64>,
    /// ReplicaSet uid -> owning deployment id. Never persisted; only a
    /// lookup hop for pod owner references.
    replicasets: HashMap<String, i64>,
}

/// Mirrors orchestrator object identity into the identity store.
pub struct ResourceSyncer {
    store: Arc<IdentityStore>,
    caches: RwLock<Caches>,
}

impl ResourceSyncer {
    pub fn new(store: Arc<IdentityStore>) -> Self {
        Self {
            store,
            caches: RwLock::new(Caches::default()),
        }
    }

    /// Watch all tracked resource kinds until shutdown is signalled.
    /// Stream errors are reported to the health monitor.
    pub async fn run(
        self: Arc<Self>,
        client: Client,
        health: HealthMonitor,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let handles = vec![
            tokio::spawn(watch_resource::<Node>(
                Api::all(client.clone()),
                self.clone(),
                health.clone(),
                Self::sync_node,
            )),
            tokio::spawn(watch_resource::<Pod>(
                Api::all(client.clone()),
                self.clone(),
                health.clone(),
                Self::sync_pod,
            )),
            tokio::spawn(watch_resource::<PersistentVolumeClaim>(
                Api::all(client.clone()),
                self.clone(),
                health.clone(),
                Self::sync_pvc,
            )),
            tokio::spawn(watch_resource::<Deployment>(
                Api::all(client.clone()),
                self.clone(),
                health.clone(),
                Self::sync_deployment,
            )),
            tokio::spawn(watch_resource::<StatefulSet>(
                Api::all(client.clone()),
                self.clone(),
                health.clone(),
                Self::sync_statefulset,
            )),
            tokio::spawn(watch_resource::<DaemonSet>(
                Api::all(client.clone()),
                self.clone(),
                health.clone(),
                Self::sync_daemonset,
            )),
            tokio::spawn(watch_resource::<ReplicaSet>(
                Api::all(client),
                self.clone(),
                health,
                Self::sync_replicaset,
            )),
        ];

        info!("Resource syncer started");

        let _ = shutdown.recv().await;
        info!("Stopping resource syncer");
        for handle in &handles {
            handle.abort();
        }
    }

    pub fn sync_node(&self, node: &Node) {
        let Some(uid) = node.metadata.uid.as_deref() else {
            return;
        };
        let Some(name) = node.metadata.name.as_deref() else {
            return;
        };
        // Always upsert: if a pod raced ahead and left a stub row for this
        // name, the real uid replaces it here.
        match self.store.upsert_node(uid, name) {
            Ok(id) => {
                self.write_caches().nodes.insert(name.to_string(), id);
            }
            Err(e) => error!(node = name, error = %e, "Failed to upsert node"),
        }
    }

    pub fn sync_deployment(&self, deployment: &Deployment) {
        self.sync_workload(&deployment.metadata, EntityKind::Deployment);
    }

    pub fn sync_statefulset(&self, statefulset: &StatefulSet) {
        self.sync_workload(&statefulset.metadata, EntityKind::StatefulSet);
    }

    pub fn sync_daemonset(&self, daemonset: &DaemonSet) {
        self.sync_workload(&daemonset.metadata, EntityKind::DaemonSet);
    }

    fn sync_workload(&self, meta: &ObjectMeta, kind: EntityKind) {
        let (Some(uid), Some(name), Some(namespace)) = (
            meta.uid.as_deref(),
            meta.name.as_deref(),
            meta.namespace.as_deref(),
        ) else {
            return;
        };
        let namespace_id = self.namespace_id(namespace);
        if namespace_id == 0 {
            return;
        }
        let result = match kind {
            EntityKind::Deployment => self.store.upsert_deployment(uid, name, namespace_id),
            EntityKind::StatefulSet => self.store.upsert_statefulset(uid, name, namespace_id),
            EntityKind::DaemonSet => self.store.upsert_daemonset(uid, name, namespace_id),
            _ => return,
        };
        if let Err(e) = result {
            error!(workload = name, error = %e, "Failed to upsert workload");
        }
    }

    /// ReplicaSets are not persisted; they only contribute the transient
    /// uid -> deployment-id hop used when resolving pod owners.
    pub fn sync_replicaset(&self, replicaset: &ReplicaSet) {
        let Some(uid) = replicaset.metadata.uid.as_deref() else {
            return;
        };
        for owner in replicaset.metadata.owner_references.iter().flatten() {
            if owner.kind != "Deployment" {
                continue;
            }
            match self.store.resource_id(EntityKind::Deployment, &owner.uid) {
                Ok(Some(deployment_id)) => {
                    self.write_caches()
                        .replicasets
                        .insert(uid.to_string(), deployment_id);
                    return;
                }
                // Deployment not observed yet; a later event retries.
                Ok(None) => {}
                Err(e) => {
                    error!(replicaset = %uid, error = %e, "Failed to look up owning deployment")
                }
            }
        }
    }

    pub fn sync_pod(&self, pod: &Pod) {
        let Some(uid) = pod.metadata.uid.as_deref() else {
            return;
        };
        let Some(name) = pod.metadata.name.as_deref() else {
            return;
        };
        let Some(namespace) = pod.metadata.namespace.as_deref() else {
            return;
        };

        let namespace_id = self.namespace_id(namespace);
        if namespace_id == 0 {
            warn!(pod = name, "Skipping pod: namespace did not resolve");
            return;
        }

        let node_name = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.node_name.as_deref())
            .unwrap_or("");
        if node_name.is_empty() {
            // Unscheduled; the scheduler will trigger another update.
            return;
        }
        let node_id = self.node_id_for_pod(node_name);
        if node_id == 0 {
            warn!(pod = name, node = node_name, "Skipping pod: node did not resolve");
            return;
        }

        let mut deployment_id = None;
        let mut statefulset_id = None;
        let mut daemonset_id = None;
        for owner in pod.metadata.owner_references.iter().flatten() {
            match owner.kind.as_str() {
                "StatefulSet" => {
                    if let Ok(Some(id)) = self.store.resource_id(EntityKind::StatefulSet, &owner.uid)
                    {
                        statefulset_id = Some(id);
                    }
                }
                "DaemonSet" => {
                    if let Ok(Some(id)) = self.store.resource_id(EntityKind::DaemonSet, &owner.uid) {
                        daemonset_id = Some(id);
                    }
                }
                "ReplicaSet" => {
                    // Indirect deployment link. An uncached ReplicaSet
                    // leaves the link empty until the next pod update.
                    deployment_id = self
                        .read_caches()
                        .replicasets
                        .get(owner.uid.as_str())
                        .copied();
                }
                _ => {}
            }
        }

        match self.store.upsert_pod(
            uid,
            name,
            namespace_id,
            node_id,
            deployment_id,
            statefulset_id,
            daemonset_id,
        ) {
            Ok(id) => {
                self.write_caches().pods.insert(uid.to_string(), id);
            }
            Err(e) => error!(pod = name, error = %e, "Failed to upsert pod"),
        }
    }

    pub fn sync_pvc(&self, pvc: &PersistentVolumeClaim) {
        let Some(uid) = pvc.metadata.uid.as_deref() else {
            return;
        };
        let Some(name) = pvc.metadata.name.as_deref() else {
            return;
        };
        let Some(namespace) = pvc.metadata.namespace.as_deref() else {
            return;
        };

        let namespace_id = self.namespace_id(namespace);
        if namespace_id == 0 {
            warn!(pvc = name, "Skipping PVC: namespace did not resolve");
            return;
        }

        match self.store.upsert_pvc(uid, name, namespace_id) {
            Ok(id) => {
                self.write_caches().pvcs.insert(uid.to_string(), id);
            }
            Err(e) => error!(pvc = name, error = %e, "Failed to upsert PVC"),
        }
    }

    /// Namespace id by name, creating the row on first reference.
    /// Returns 0 when the upsert fails.
    fn namespace_id(&self, name: &str) -> i64 {
        let cached = self.read_caches().namespaces.get(name).copied();
        if let Some(id) = cached {
            return id;
        }
        match self.store.upsert_namespace(name) {
            Ok(id) => {
                self.write_caches().namespaces.insert(name.to_string(), id);
                id
            }
            Err(e) => {
                error!(namespace = name, error = %e, "Failed to upsert namespace");
                0
            }
        }
    }

    /// Node id for a pod's `spec.node_name`. When the node object has not
    /// been observed yet a stub row is written so the pod's foreign key
    /// holds; the stub reconciles to the real uid on the node event.
    fn node_id_for_pod(&self, name: &str) -> i64 {
        let cached = self.read_caches().nodes.get(name).copied();
        if let Some(id) = cached {
            return id;
        }
        let stub_uid = format!("{STUB_NODE_PREFIX}{name}");
        match self.store.upsert_node(&stub_uid, name) {
            Ok(id) => {
                self.write_caches().nodes.insert(name.to_string(), id);
                id
            }
            Err(e) => {
                error!(node = name, error = %e, "Failed to upsert stub node");
                0
            }
        }
    }

    fn read_caches(&self) -> std::sync::RwLockReadGuard<'_, Caches> {
        self.caches.read().expect("syncer cache lock poisoned")
    }

    fn write_caches(&self) -> std::sync::RwLockWriteGuard<'_, Caches> {
        self.caches.write().expect("syncer cache lock poisoned")
    }
}

impl IdResolver for ResourceSyncer {
    /// Pure cache lookup under the reader lock; never touches the store.
    fn resolve(&self, uid: &str, kind: ResolveKind) -> Option<i64> {
        let caches = self.read_caches();
        match kind {
            ResolveKind::Pod => caches.pods.get(uid).copied(),
            ResolveKind::Pvc => caches.pvcs.get(uid).copied(),
        }
    }
}

/// Drive one watch stream, feeding add and update events through `apply`.
/// The watcher re-lists on desync, so initial enumeration and drift repair
/// both arrive as `InitApply`/`Apply` events.
async fn watch_resource<K>(
    api: Api<K>,
    syncer: Arc<ResourceSyncer>,
    health: HealthMonitor,
    apply: fn(&ResourceSyncer, &K),
) where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
{
    let kind = K::kind(&()).to_string();
    info!(kind = %kind, "Watching resource");

    let mut events = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();
    while let Some(event) = events.next().await {
        match event {
            Ok(Event::Apply(obj)) | Ok(Event::InitApply(obj)) => apply(&syncer, &obj),
            Ok(_) => {}
            Err(e) => {
                health.record_watch_error(&kind, &e.to_string());
                warn!(kind = %kind, error = %e, "Watch stream error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<IdentityStore>, ResourceSyncer) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(IdentityStore::open(dir.path().join("meta.db")).unwrap());
        let syncer = ResourceSyncer::new(store.clone());
        (dir, store, syncer)
    }

    fn node(uid: &str, name: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                uid: Some(uid.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn deployment(uid: &str, name: &str, namespace: &str) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                uid: Some(uid.to_string()),
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn replicaset(uid: &str, owner_deployment_uid: &str) -> ReplicaSet {
        ReplicaSet {
            metadata: ObjectMeta {
                uid: Some(uid.to_string()),
                name: Some("web-abc".to_string()),
                namespace: Some("ns-a".to_string()),
                owner_references: Some(vec![OwnerReference {
                    api_version: "apps/v1".to_string(),
                    kind: "Deployment".to_string(),
                    name: "web".to_string(),
                    uid: owner_deployment_uid.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn pod(uid: &str, name: &str, namespace: &str, node_name: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                uid: Some(uid.to_string()),
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: node_name.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod_owned_by(mut pod: Pod, kind: &str, uid: &str) -> Pod {
        pod.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            name: "owner".to_string(),
            uid: uid.to_string(),
            ..Default::default()
        }]);
        pod
    }

    fn pvc(uid: &str, name: &str, namespace: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                uid: Some(uid.to_string()),
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_chain_resolves_deployment_through_replicaset() {
        let (_dir, store, syncer) = setup();

        syncer.sync_node(&node("n-1", "host-1"));
        syncer.sync_deployment(&deployment("d-1", "web", "ns-a"));
        syncer.sync_replicaset(&replicaset("rs-1", "d-1"));
        syncer.sync_pod(&pod_owned_by(
            pod("p-1", "web-xyz", "ns-a", Some("host-1")),
            "ReplicaSet",
            "rs-1",
        ));

        let pod_id = syncer.resolve("p-1", ResolveKind::Pod).unwrap();
        let dep_id = store.resource_id(EntityKind::Deployment, "d-1").unwrap().unwrap();

        let linked: Option<i64> = store
            .query(
                "SELECT deployment_id FROM pods WHERE uid = ?1",
                &[&"p-1"],
                |row| row.get(0),
            )
            .unwrap()
            .remove(0);
        assert_eq!(linked, Some(dep_id));
        assert!(pod_id > 0);
    }

    #[test]
    fn test_pod_before_replicaset_leaves_link_empty() {
        let (_dir, store, syncer) = setup();

        syncer.sync_node(&node("n-1", "host-1"));
        syncer.sync_deployment(&deployment("d-1", "web", "ns-a"));
        // ReplicaSet not yet observed: the deployment link stays empty.
        syncer.sync_pod(&pod_owned_by(
            pod("p-1", "web-xyz", "ns-a", Some("host-1")),
            "ReplicaSet",
            "rs-1",
        ));

        let linked: Option<i64> = store
            .query(
                "SELECT deployment_id FROM pods WHERE uid = ?1",
                &[&"p-1"],
                |row| row.get(0),
            )
            .unwrap()
            .remove(0);
        assert_eq!(linked, None);

        // The next pod update after the ReplicaSet event reconciles it.
        syncer.sync_replicaset(&replicaset("rs-1", "d-1"));
        syncer.sync_pod(&pod_owned_by(
            pod("p-1", "web-xyz", "ns-a", Some("host-1")),
            "ReplicaSet",
            "rs-1",
        ));
        let linked: Option<i64> = store
            .query(
                "SELECT deployment_id FROM pods WHERE uid = ?1",
                &[&"p-1"],
                |row| row.get(0),
            )
            .unwrap()
            .remove(0);
        assert!(linked.is_some());
    }

    #[test]
    fn test_unscheduled_pod_is_skipped_until_scheduled() {
        let (_dir, store, syncer) = setup();

        syncer.sync_pod(&pod("p-1", "web-xyz", "ns-a", None));
        assert_eq!(syncer.resolve("p-1", ResolveKind::Pod), None);
        let count: i64 = store
            .query("SELECT COUNT(*) FROM pods", &[], |row| row.get(0))
            .unwrap()[0];
        assert_eq!(count, 0);

        syncer.sync_pod(&pod("p-1", "web-xyz", "ns-a", Some("host-1")));
        assert!(syncer.resolve("p-1", ResolveKind::Pod).is_some());
    }

    #[test]
    fn test_stub_node_reconciles_on_real_event() {
        let (_dir, store, syncer) = setup();

        // Pod arrives before its node: a stub row carries the foreign key.
        syncer.sync_pod(&pod("p-1", "web-xyz", "ns-a", Some("host-1")));
        let stub_id = syncer.resolve("p-1", ResolveKind::Pod).unwrap();
        assert!(stub_id > 0);

        let node_id_before: i64 = store
            .query("SELECT id FROM nodes WHERE name = ?1", &[&"host-1"], |row| {
                row.get(0)
            })
            .unwrap()[0];

        syncer.sync_node(&node("n-1", "host-1"));

        let rows: Vec<(i64, String)> = store
            .query(
                "SELECT id, uid FROM nodes WHERE name = ?1",
                &[&"host-1"],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, node_id_before);
        assert_eq!(rows[0].1, "n-1");
    }

    #[test]
    fn test_statefulset_owned_pod() {
        let (_dir, store, syncer) = setup();

        syncer.sync_node(&node("n-1", "host-1"));
        syncer.sync_statefulset(&StatefulSet {
            metadata: ObjectMeta {
                uid: Some("sts-1".to_string()),
                name: Some("db".to_string()),
                namespace: Some("ns-a".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        syncer.sync_pod(&pod_owned_by(
            pod("p-1", "db-0", "ns-a", Some("host-1")),
            "StatefulSet",
            "sts-1",
        ));

        let sts_id = store
            .resource_id(EntityKind::StatefulSet, "sts-1")
            .unwrap()
            .unwrap();
        let linked: Option<i64> = store
            .query(
                "SELECT statefulset_id FROM pods WHERE uid = ?1",
                &[&"p-1"],
                |row| row.get(0),
            )
            .unwrap()
            .remove(0);
        assert_eq!(linked, Some(sts_id));
    }

    #[test]
    fn test_pvc_sync_and_resolve() {
        let (_dir, _store, syncer) = setup();

        let uid = "11111111-2222-3333-4444-555555555555";
        syncer.sync_pvc(&pvc(uid, "data-0", "ns-a"));

        assert!(syncer.resolve(uid, ResolveKind::Pvc).is_some());
        // A pod lookup with the same uid misses: the caches are disjoint.
        assert_eq!(syncer.resolve(uid, ResolveKind::Pod), None);
    }

    #[test]
    fn test_resolve_unknown_uid_misses() {
        let (_dir, _store, syncer) = setup();
        assert_eq!(syncer.resolve("nope", ResolveKind::Pod), None);
        assert_eq!(syncer.resolve("nope", ResolveKind::Pvc), None);
    }

    #[test]
    fn test_namespace_created_on_first_reference() {
        let (_dir, store, syncer) = setup();

        syncer.sync_deployment(&deployment("d-1", "web", "ns-a"));

        let count: i64 = store
            .query("SELECT COUNT(*) FROM namespaces", &[], |row| row.get(0))
            .unwrap()[0];
        assert_eq!(count, 1);

        // A second workload in the same namespace reuses the row.
        syncer.sync_daemonset(&DaemonSet {
            metadata: ObjectMeta {
                uid: Some("ds-1".to_string()),
                name: Some("logger".to_string()),
                namespace: Some("ns-a".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        let count: i64 = store
            .query("SELECT COUNT(*) FROM namespaces", &[], |row| row.get(0))
            .unwrap()[0];
        assert_eq!(count, 1);
    }
}
