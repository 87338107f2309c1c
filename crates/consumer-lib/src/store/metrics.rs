//! Columnar metrics store
//!
//! Append-only DuckDB table of time-stamped samples keyed by internal id.
//! The flush worker is the only writer; each batch lands in a single
//! transaction and a failed batch is discarded whole.

use crate::models::Sample;
use anyhow::{Context, Result};
use duckdb::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS metrics (
    time TIMESTAMPTZ NOT NULL,
    resource_id BIGINT NOT NULL,
    metric_type VARCHAR NOT NULL,
    value DOUBLE NOT NULL,
    agg_type VARCHAR DEFAULT 'raw'
);
";

/// DuckDB-backed analytical store for historical samples.
pub struct MetricsStore {
    conn: Mutex<Connection>,
}

impl MetricsStore {
    /// Open (or create) the store at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open metrics store at {}", path.display()))?;
        conn.execute_batch(SCHEMA)
            .context("failed to initialize metrics schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append all samples in one transaction. Any failure rolls the whole
    /// batch back.
    pub fn batch_insert(&self, samples: &[Sample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().expect("metrics store lock poisoned");
        let tx = conn.transaction().context("failed to begin transaction")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO metrics (time, resource_id, metric_type, value, agg_type)
                     VALUES (to_timestamp(?), ?, ?, ?, ?)",
                )
                .context("failed to prepare insert")?;
            for sample in samples {
                stmt.execute(params![
                    sample.time,
                    sample.resource_id,
                    sample.metric_type,
                    sample.value,
                    sample.aggregation_kind
                ])
                .context("failed to insert sample")?;
            }
        }
        tx.commit().context("failed to commit sample batch")?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn samples_for(&self, resource_id: i64) -> Result<Vec<Sample>> {
        let conn = self.conn.lock().expect("metrics store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT CAST(epoch(time) AS BIGINT), resource_id, metric_type, value, agg_type
             FROM metrics WHERE resource_id = ? ORDER BY time",
        )?;
        let rows = stmt.query_map(params![resource_id], |row| {
            Ok(Sample {
                time: row.get(0)?,
                resource_id: row.get(1)?,
                metric_type: row.get(2)?,
                value: row.get(3)?,
                aggregation_kind: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    #[cfg(test)]
    pub(crate) fn sample_count(&self) -> Result<i64> {
        let conn = self.conn.lock().expect("metrics store lock poisoned");
        let count = conn.query_row("SELECT COUNT(*) FROM metrics", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, MetricsStore) {
        let dir = TempDir::new().unwrap();
        let store = MetricsStore::open(dir.path().join("metrics.duckdb")).unwrap();
        (dir, store)
    }

    fn sample(time: i64, resource_id: i64, key: &str, value: f64) -> Sample {
        Sample::raw(time, resource_id, key, value)
    }

    #[test]
    fn test_batch_insert_and_readback() {
        let (_dir, store) = open_store();

        store
            .batch_insert(&[
                sample(1000, 7, "cpu_ms", 123.0),
                sample(1001, 7, "mem_mb", 42.5),
            ])
            .unwrap();

        let rows = store.samples_for(7).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].time, 1000);
        assert_eq!(rows[0].metric_type, "cpu_ms");
        assert_eq!(rows[0].value, 123.0);
        assert_eq!(rows[0].aggregation_kind, "raw");
        assert_eq!(rows[1].metric_type, "mem_mb");
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let (_dir, store) = open_store();
        store.batch_insert(&[]).unwrap();
        assert_eq!(store.sample_count().unwrap(), 0);
    }

    #[test]
    fn test_unresolved_samples_are_kept() {
        let (_dir, store) = open_store();

        store
            .batch_insert(&[sample(2000, 0, "used_mb", 42.0)])
            .unwrap();

        assert_eq!(store.sample_count().unwrap(), 1);
    }
}
