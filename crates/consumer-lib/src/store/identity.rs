//! Relational identity store
//!
//! Maps orchestrator UIDs to stable internal integer ids across
//! namespaces, nodes, workload controllers, pods, and PVCs. Every upsert
//! is a single atomic `INSERT ... ON CONFLICT ... RETURNING id` round
//! trip; callers never read-then-write. The connection serializes access
//! internally, so the store can be shared freely across tasks.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS namespaces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL
);

CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT UNIQUE NOT NULL,
    name TEXT UNIQUE NOT NULL,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS deployments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT UNIQUE NOT NULL,
    name TEXT NOT NULL,
    namespace_id INTEGER NOT NULL,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY(namespace_id) REFERENCES namespaces(id)
);

CREATE TABLE IF NOT EXISTS statefulsets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT UNIQUE NOT NULL,
    name TEXT NOT NULL,
    namespace_id INTEGER NOT NULL,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY(namespace_id) REFERENCES namespaces(id)
);

CREATE TABLE IF NOT EXISTS daemonsets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT UNIQUE NOT NULL,
    name TEXT NOT NULL,
    namespace_id INTEGER NOT NULL,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY(namespace_id) REFERENCES namespaces(id)
);

CREATE TABLE IF NOT EXISTS pods (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT UNIQUE NOT NULL,
    name TEXT NOT NULL,
    namespace_id INTEGER NOT NULL,
    node_id INTEGER NOT NULL,
    deployment_id INTEGER,
    statefulset_id INTEGER,
    daemonset_id INTEGER,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY(namespace_id) REFERENCES namespaces(id),
    FOREIGN KEY(node_id) REFERENCES nodes(id),
    FOREIGN KEY(deployment_id) REFERENCES deployments(id),
    FOREIGN KEY(statefulset_id) REFERENCES statefulsets(id),
    FOREIGN KEY(daemonset_id) REFERENCES daemonsets(id)
);

CREATE TABLE IF NOT EXISTS pvcs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT UNIQUE NOT NULL,
    name TEXT NOT NULL,
    namespace_id INTEGER NOT NULL,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY(namespace_id) REFERENCES namespaces(id)
);

CREATE INDEX IF NOT EXISTS idx_pods_uid ON pods(uid);
CREATE INDEX IF NOT EXISTS idx_pvcs_uid ON pvcs(uid);
"#;

/// Entity kinds addressable by [`IdentityStore::resource_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Node,
    Deployment,
    StatefulSet,
    DaemonSet,
    Pod,
    Pvc,
}

impl EntityKind {
    fn table(self) -> &'static str {
        match self {
            EntityKind::Node => "nodes",
            EntityKind::Deployment => "deployments",
            EntityKind::StatefulSet => "statefulsets",
            EntityKind::DaemonSet => "daemonsets",
            EntityKind::Pod => "pods",
            EntityKind::Pvc => "pvcs",
        }
    }
}

/// SQLite-backed identity store with foreign keys enforced.
pub struct IdentityStore {
    conn: Mutex<Connection>,
}

impl IdentityStore {
    /// Open (or create) the store at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open identity store at {}", path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("failed to enable foreign keys")?;
        conn.execute_batch(SCHEMA)
            .context("failed to initialize identity schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a namespace if absent; returns the existing id on conflict.
    pub fn upsert_namespace(&self, name: &str) -> Result<i64> {
        let conn = self.conn.lock().expect("identity store lock poisoned");
        let id = conn.query_row(
            "INSERT INTO namespaces (name) VALUES (?1)
             ON CONFLICT(name) DO UPDATE SET name = excluded.name
             RETURNING id",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Upsert a node. A repeated uid refreshes the name; a known name with
    /// a new uid (stub row reconciling to the real node object) refreshes
    /// the uid in place, so one name never grows a second row.
    pub fn upsert_node(&self, uid: &str, name: &str) -> Result<i64> {
        let conn = self.conn.lock().expect("identity store lock poisoned");
        let id = conn.query_row(
            "INSERT INTO nodes (uid, name, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
             ON CONFLICT(uid) DO UPDATE SET name = excluded.name, updated_at = CURRENT_TIMESTAMP
             ON CONFLICT(name) DO UPDATE SET uid = excluded.uid, updated_at = CURRENT_TIMESTAMP
             RETURNING id",
            params![uid, name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn upsert_deployment(&self, uid: &str, name: &str, namespace_id: i64) -> Result<i64> {
        self.upsert_workload("deployments", uid, name, namespace_id)
    }

    pub fn upsert_statefulset(&self, uid: &str, name: &str, namespace_id: i64) -> Result<i64> {
        self.upsert_workload("statefulsets", uid, name, namespace_id)
    }

    pub fn upsert_daemonset(&self, uid: &str, name: &str, namespace_id: i64) -> Result<i64> {
        self.upsert_workload("daemonsets", uid, name, namespace_id)
    }

    fn upsert_workload(&self, table: &str, uid: &str, name: &str, namespace_id: i64) -> Result<i64> {
        let sql = format!(
            "INSERT INTO {table} (uid, name, namespace_id, updated_at)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
             ON CONFLICT(uid) DO UPDATE SET
                 name = excluded.name,
                 namespace_id = excluded.namespace_id,
                 updated_at = CURRENT_TIMESTAMP
             RETURNING id"
        );
        let conn = self.conn.lock().expect("identity store lock poisoned");
        let id = conn.query_row(&sql, params![uid, name, namespace_id], |row| row.get(0))?;
        Ok(id)
    }

    /// Upsert a pod with its resolved namespace, node, and at most one
    /// controller link.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_pod(
        &self,
        uid: &str,
        name: &str,
        namespace_id: i64,
        node_id: i64,
        deployment_id: Option<i64>,
        statefulset_id: Option<i64>,
        daemonset_id: Option<i64>,
    ) -> Result<i64> {
        let conn = self.conn.lock().expect("identity store lock poisoned");
        let id = conn.query_row(
            "INSERT INTO pods (uid, name, namespace_id, node_id,
                               deployment_id, statefulset_id, daemonset_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, CURRENT_TIMESTAMP)
             ON CONFLICT(uid) DO UPDATE SET
                 name = excluded.name,
                 namespace_id = excluded.namespace_id,
                 node_id = excluded.node_id,
                 deployment_id = excluded.deployment_id,
                 statefulset_id = excluded.statefulset_id,
                 daemonset_id = excluded.daemonset_id,
                 updated_at = CURRENT_TIMESTAMP
             RETURNING id",
            params![
                uid,
                name,
                namespace_id,
                node_id,
                deployment_id,
                statefulset_id,
                daemonset_id
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn upsert_pvc(&self, uid: &str, name: &str, namespace_id: i64) -> Result<i64> {
        let conn = self.conn.lock().expect("identity store lock poisoned");
        let id = conn.query_row(
            "INSERT INTO pvcs (uid, name, namespace_id, updated_at)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
             ON CONFLICT(uid) DO UPDATE SET
                 name = excluded.name,
                 namespace_id = excluded.namespace_id,
                 updated_at = CURRENT_TIMESTAMP
             RETURNING id",
            params![uid, name, namespace_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Look up an entity's internal id by its orchestrator uid.
    pub fn resource_id(&self, kind: EntityKind, uid: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock().expect("identity store lock poisoned");
        let sql = format!("SELECT id FROM {} WHERE uid = ?1", kind.table());
        let id = conn
            .query_row(&sql, params![uid], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    /// Run a read query, mapping each row through `map`. Only the query
    /// API issues ad-hoc SQL; everything else goes through the typed
    /// upserts above.
    pub fn query<T>(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
        mut map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let conn = self.conn.lock().expect("identity store lock poisoned");
        let mut stmt = conn
            .prepare(sql)
            .with_context(|| format!("failed to prepare query: {sql}"))?;
        let rows = stmt.query_map(params, |row| map(row))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, IdentityStore) {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::open(dir.path().join("meta.db")).unwrap();
        (dir, store)
    }

    fn row_count(store: &IdentityStore, table: &str) -> i64 {
        store
            .query(&format!("SELECT COUNT(*) FROM {table}"), &[], |row| {
                row.get(0)
            })
            .unwrap()[0]
    }

    #[test]
    fn test_namespace_upsert_idempotent() {
        let (_dir, store) = open_store();

        let first = store.upsert_namespace("ns-a").unwrap();
        let second = store.upsert_namespace("ns-a").unwrap();

        assert_eq!(first, second);
        assert_eq!(row_count(&store, "namespaces"), 1);
    }

    #[test]
    fn test_node_upsert_idempotent() {
        let (_dir, store) = open_store();

        let first = store.upsert_node("n-1", "host-1").unwrap();
        let second = store.upsert_node("n-1", "host-1").unwrap();

        assert_eq!(first, second);
        assert_eq!(row_count(&store, "nodes"), 1);
    }

    #[test]
    fn test_node_stub_reconciles_to_real_uid() {
        let (_dir, store) = open_store();

        let stub_id = store.upsert_node("stub-host-1", "host-1").unwrap();
        let real_id = store.upsert_node("n-1", "host-1").unwrap();

        assert_eq!(stub_id, real_id);
        assert_eq!(row_count(&store, "nodes"), 1);

        let uid: String = store
            .query("SELECT uid FROM nodes WHERE name = ?1", &[&"host-1"], |row| {
                row.get(0)
            })
            .unwrap()
            .remove(0);
        assert_eq!(uid, "n-1");
    }

    #[test]
    fn test_workload_upsert_updates_fields() {
        let (_dir, store) = open_store();
        let ns_a = store.upsert_namespace("ns-a").unwrap();
        let ns_b = store.upsert_namespace("ns-b").unwrap();

        let first = store.upsert_deployment("d-1", "web", ns_a).unwrap();
        let second = store.upsert_deployment("d-1", "web-renamed", ns_b).unwrap();

        assert_eq!(first, second);
        assert_eq!(row_count(&store, "deployments"), 1);

        let (name, ns): (String, i64) = store
            .query(
                "SELECT name, namespace_id FROM deployments WHERE uid = ?1",
                &[&"d-1"],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap()
            .remove(0);
        assert_eq!(name, "web-renamed");
        assert_eq!(ns, ns_b);
    }

    #[test]
    fn test_pod_upsert_with_controller_link() {
        let (_dir, store) = open_store();
        let ns = store.upsert_namespace("ns-a").unwrap();
        let node = store.upsert_node("n-1", "host-1").unwrap();
        let dep = store.upsert_deployment("d-1", "web", ns).unwrap();

        let pod = store
            .upsert_pod("p-1", "web-xyz", ns, node, Some(dep), None, None)
            .unwrap();
        let again = store
            .upsert_pod("p-1", "web-xyz", ns, node, Some(dep), None, None)
            .unwrap();

        assert_eq!(pod, again);
        assert_eq!(row_count(&store, "pods"), 1);
    }

    #[test]
    fn test_pod_upsert_rejects_missing_node() {
        let (_dir, store) = open_store();
        let ns = store.upsert_namespace("ns-a").unwrap();

        // node_id 999 has no row; the foreign key must reject it.
        let result = store.upsert_pod("p-1", "web-xyz", ns, 999, None, None, None);
        assert!(result.is_err());
        assert_eq!(row_count(&store, "pods"), 0);
    }

    #[test]
    fn test_resource_id_lookup() {
        let (_dir, store) = open_store();
        let ns = store.upsert_namespace("ns-a").unwrap();
        let pvc = store
            .upsert_pvc("11111111-2222-3333-4444-555555555555", "data-0", ns)
            .unwrap();

        assert_eq!(
            store
                .resource_id(EntityKind::Pvc, "11111111-2222-3333-4444-555555555555")
                .unwrap(),
            Some(pvc)
        );
        assert_eq!(store.resource_id(EntityKind::Pod, "nope").unwrap(), None);
    }
}
