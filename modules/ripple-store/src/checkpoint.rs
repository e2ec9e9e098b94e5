//! Checkpoint store: fingerprint -> pagination cursor, running item count,
//! completion flag.
//!
//! `items_fetched` is additive. Each `upsert` adds its delta to the stored
//! counter, so callers must write at most once per page advance. Writes for
//! one fingerprint are serialised by the backing store (a single
//! `INSERT .. ON CONFLICT` row update in Postgres, a mutex in memory).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ripple_common::Fingerprint;
use sqlx::PgPool;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub fingerprint: Fingerprint,
    pub query_text: String,
    pub cursor: Option<String>,
    pub items_fetched: u64,
    pub last_worker: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed: bool,
}

/// One checkpoint write. `items_delta` is added to the stored counter.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointWrite {
    pub fingerprint: Fingerprint,
    pub query_text: String,
    pub cursor: Option<String>,
    pub items_delta: u64,
    pub worker: Option<String>,
    pub completed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointSummary {
    pub total: u64,
    pub active: u64,
    pub completed: u64,
    pub items_fetched: u64,
}

impl std::fmt::Display for CheckpointSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Checkpoints:    {}", self.total)?;
        writeln!(f, "  Active:       {}", self.active)?;
        writeln!(f, "  Completed:    {}", self.completed)?;
        writeln!(f, "Items fetched:  {}", self.items_fetched)
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get_state(&self, fingerprint: &Fingerprint) -> Result<Option<Checkpoint>>;

    async fn upsert(&self, write: &CheckpointWrite) -> Result<()>;

    /// Completion with zero delta. Clears the cursor.
    async fn mark_completed(&self, fingerprint: &Fingerprint, worker: Option<&str>) -> Result<()> {
        self.upsert(&CheckpointWrite {
            fingerprint: fingerprint.clone(),
            query_text: String::new(),
            cursor: None,
            items_delta: 0,
            worker: worker.map(str::to_string),
            completed: true,
        })
        .await
    }

    /// Delete completed checkpoints not updated within `retention`.
    async fn sweep_completed(&self, retention: Duration) -> Result<u64>;

    /// Incomplete checkpoints, most recently updated first.
    async fn active(&self, limit: i64) -> Result<Vec<Checkpoint>>;

    async fn summary(&self) -> Result<CheckpointSummary>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct CheckpointRow {
    fingerprint: String,
    query_text: String,
    page_cursor: Option<String>,
    items_fetched: i64,
    last_worker: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed: bool,
}

impl From<CheckpointRow> for Checkpoint {
    fn from(row: CheckpointRow) -> Self {
        Self {
            fingerprint: row.fingerprint.into(),
            query_text: row.query_text,
            cursor: row.page_cursor,
            items_fetched: row.items_fetched.max(0) as u64,
            last_worker: row.last_worker,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed: row.completed,
        }
    }
}

#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn get_state(&self, fingerprint: &Fingerprint) -> Result<Option<Checkpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            r#"
            SELECT fingerprint, query_text, page_cursor, items_fetched, last_worker,
                   created_at, updated_at, completed
            FROM scout_checkpoints
            WHERE fingerprint = $1
            "#,
        )
        .bind(fingerprint.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Checkpoint::from))
    }

    async fn upsert(&self, write: &CheckpointWrite) -> Result<()> {
        let delta = i64::try_from(write.items_delta)
            .map_err(|_| StoreError::Other(anyhow::anyhow!("items delta out of range")))?;

        sqlx::query(
            r#"
            INSERT INTO scout_checkpoints
                (fingerprint, query_text, page_cursor, items_fetched, last_worker, completed)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (fingerprint) DO UPDATE SET
                page_cursor   = EXCLUDED.page_cursor,
                items_fetched = scout_checkpoints.items_fetched + EXCLUDED.items_fetched,
                last_worker   = COALESCE(EXCLUDED.last_worker, scout_checkpoints.last_worker),
                completed     = EXCLUDED.completed,
                updated_at    = now()
            "#,
        )
        .bind(write.fingerprint.as_str())
        .bind(&write.query_text)
        .bind(&write.cursor)
        .bind(delta)
        .bind(&write.worker)
        .bind(write.completed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn sweep_completed(&self, retention: Duration) -> Result<u64> {
        let cutoff = Utc::now() - retention;
        let result = sqlx::query(
            "DELETE FROM scout_checkpoints WHERE completed = true AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn active(&self, limit: i64) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query_as::<_, CheckpointRow>(
            r#"
            SELECT fingerprint, query_text, page_cursor, items_fetched, last_worker,
                   created_at, updated_at, completed
            FROM scout_checkpoints
            WHERE completed = false
            ORDER BY updated_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Checkpoint::from).collect())
    }

    async fn summary(&self) -> Result<CheckpointSummary> {
        let (total, active, completed, items): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE NOT completed),
                   COUNT(*) FILTER (WHERE completed),
                   COALESCE(SUM(items_fetched), 0)::BIGINT
            FROM scout_checkpoints
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CheckpointSummary {
            total: total as u64,
            active: active as u64,
            completed: completed as u64,
            items_fetched: items as u64,
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local checkpoint store with the same semantics as the Postgres
/// one. Used for dry runs and tests.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    rows: Mutex<HashMap<Fingerprint, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row directly, bypassing the additive counter.
    pub fn insert(&self, checkpoint: Checkpoint) {
        self.lock().insert(checkpoint.fingerprint.clone(), checkpoint);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Fingerprint, Checkpoint>> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get_state(&self, fingerprint: &Fingerprint) -> Result<Option<Checkpoint>> {
        Ok(self.lock().get(fingerprint).cloned())
    }

    async fn upsert(&self, write: &CheckpointWrite) -> Result<()> {
        let now = Utc::now();
        let mut rows = self.lock();
        match rows.get_mut(&write.fingerprint) {
            Some(row) => {
                row.cursor = write.cursor.clone();
                row.items_fetched += write.items_delta;
                if write.worker.is_some() {
                    row.last_worker = write.worker.clone();
                }
                row.completed = write.completed;
                row.updated_at = now;
            }
            None => {
                rows.insert(
                    write.fingerprint.clone(),
                    Checkpoint {
                        fingerprint: write.fingerprint.clone(),
                        query_text: write.query_text.clone(),
                        cursor: write.cursor.clone(),
                        items_fetched: write.items_delta,
                        last_worker: write.worker.clone(),
                        created_at: now,
                        updated_at: now,
                        completed: write.completed,
                    },
                );
            }
        }
        Ok(())
    }

    async fn sweep_completed(&self, retention: Duration) -> Result<u64> {
        let cutoff = Utc::now() - retention;
        let mut rows = self.lock();
        let before = rows.len();
        rows.retain(|_, row| !(row.completed && row.updated_at < cutoff));
        Ok((before - rows.len()) as u64)
    }

    async fn active(&self, limit: i64) -> Result<Vec<Checkpoint>> {
        let mut active: Vec<Checkpoint> = self
            .lock()
            .values()
            .filter(|row| !row.completed)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        active.truncate(limit.max(0) as usize);
        Ok(active)
    }

    async fn summary(&self) -> Result<CheckpointSummary> {
        let rows = self.lock();
        let completed = rows.values().filter(|r| r.completed).count() as u64;
        Ok(CheckpointSummary {
            total: rows.len() as u64,
            active: rows.len() as u64 - completed,
            completed,
            items_fetched: rows.values().map(|r| r.items_fetched).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(fp: &str, cursor: Option<&str>, delta: u64, completed: bool) -> CheckpointWrite {
        CheckpointWrite {
            fingerprint: fp.to_string().into(),
            query_text: "q".into(),
            cursor: cursor.map(str::to_string),
            items_delta: delta,
            worker: Some("scout-0".into()),
            completed,
        }
    }

    #[tokio::test]
    async fn deltas_accumulate() {
        let store = MemoryCheckpointStore::new();
        store.upsert(&write("a", Some("c1"), 5, false)).await.unwrap();
        store.upsert(&write("a", Some("c2"), 7, false)).await.unwrap();

        let cp = store.get_state(&"a".to_string().into()).await.unwrap().unwrap();
        assert_eq!(cp.items_fetched, 12);
        assert_eq!(cp.cursor.as_deref(), Some("c2"));
        assert!(!cp.completed);
    }

    #[tokio::test]
    async fn mark_completed_clears_cursor_and_keeps_count() {
        let store = MemoryCheckpointStore::new();
        let fp: Fingerprint = "a".to_string().into();
        store.upsert(&write("a", Some("c1"), 3, false)).await.unwrap();
        store.mark_completed(&fp, None).await.unwrap();

        let cp = store.get_state(&fp).await.unwrap().unwrap();
        assert!(cp.completed);
        assert_eq!(cp.cursor, None);
        assert_eq!(cp.items_fetched, 3);
        assert_eq!(cp.query_text, "q");
        assert_eq!(cp.last_worker.as_deref(), Some("scout-0"));
    }

    #[tokio::test]
    async fn sweep_removes_only_old_completed_rows() {
        let store = MemoryCheckpointStore::new();
        let old = Utc::now() - Duration::days(10);
        for (fp, completed) in [("old-done", true), ("old-active", false)] {
            store.insert(Checkpoint {
                fingerprint: fp.to_string().into(),
                query_text: "q".into(),
                cursor: None,
                items_fetched: 1,
                last_worker: None,
                created_at: old,
                updated_at: old,
                completed,
            });
        }
        store.upsert(&write("fresh-done", None, 1, true)).await.unwrap();

        let removed = store.sweep_completed(Duration::days(7)).await.unwrap();
        assert_eq!(removed, 1);

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.active, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.items_fetched, 2);

        let active = store.active(10).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].fingerprint.as_str(), "old-active");
    }

    #[tokio::test]
    async fn concurrent_writers_never_lose_deltas() {
        let store = std::sync::Arc::new(MemoryCheckpointStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert(&write("shared", Some(&format!("c{i}")), 1, false))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let cp = store.get_state(&"shared".to_string().into()).await.unwrap().unwrap();
        assert_eq!(cp.items_fetched, 16);
    }
}
