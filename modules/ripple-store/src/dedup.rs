//! Deduplication store: a durable write-once set of item ids, mirrored in
//! memory.
//!
//! The cache is loaded once at construction and written through on every
//! insert. Workers in one process claim an id with [`DedupStore::try_claim`]
//! before storing it, so two workers never both pass the check for the same
//! id. Separate processes sharing the backend can still race between check
//! and insert; that rare double store is tolerated.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

use crate::error::Result;

#[async_trait]
pub trait SeenBackend: Send + Sync {
    async fn load_all(&self) -> Result<Vec<String>>;

    /// Insert ids; already-present ids are ignored.
    async fn insert(&self, ids: &[String]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgSeenBackend {
    pool: PgPool,
}

impl PgSeenBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SeenBackend for PgSeenBackend {
    async fn load_all(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>("SELECT item_id FROM seen_items")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn insert(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO seen_items (item_id)
            SELECT * FROM UNNEST($1::text[])
            ON CONFLICT (item_id) DO NOTHING
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySeenBackend {
    ids: Mutex<HashSet<String>>,
}

impl MemorySeenBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids<I: IntoIterator<Item = String>>(ids: I) -> Self {
        Self {
            ids: Mutex::new(ids.into_iter().collect()),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.lock().unwrap_or_else(|e| e.into_inner()).contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SeenBackend for MemorySeenBackend {
    async fn load_all(&self) -> Result<Vec<String>> {
        Ok(self
            .ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect())
    }

    async fn insert(&self, ids: &[String]) -> Result<()> {
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(ids.iter().cloned());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DedupStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SeenState {
    seen: HashSet<String>,
    in_flight: HashSet<String>,
}

pub struct DedupStore {
    backend: Arc<dyn SeenBackend>,
    state: Mutex<SeenState>,
}

impl DedupStore {
    /// Load the durable set into memory.
    pub async fn load(backend: Arc<dyn SeenBackend>) -> Result<Self> {
        let seen: HashSet<String> = backend.load_all().await?.into_iter().collect();
        info!(seen = seen.len(), "Loaded seen-item set");
        Ok(Self {
            backend,
            state: Mutex::new(SeenState {
                seen,
                in_flight: HashSet::new(),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, SeenState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_seen(&self, id: &str) -> bool {
        self.state().seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.state().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically check and reserve `id`. Returns false when it is already
    /// seen or claimed by another worker. A successful claim must be
    /// followed by [`mark_seen`](Self::mark_seen) or [`release`](Self::release).
    pub fn try_claim(&self, id: &str) -> bool {
        let mut state = self.state();
        if state.seen.contains(id) || state.in_flight.contains(id) {
            return false;
        }
        state.in_flight.insert(id.to_string());
        true
    }

    /// Drop a claim without marking the id seen (the store attempt failed).
    pub fn release(&self, id: &str) {
        self.state().in_flight.remove(id);
    }

    /// Mark one id seen. Re-marking is a no-op. The id stays in the cache
    /// even if the durable write fails, and the error is returned.
    pub async fn mark_seen(&self, id: &str) -> Result<()> {
        let ids = [id.to_string()];
        self.mark_seen_batch(&ids).await
    }

    pub async fn mark_seen_batch(&self, ids: &[String]) -> Result<()> {
        let fresh: Vec<String> = {
            let mut state = self.state();
            let mut fresh = Vec::new();
            for id in ids {
                state.in_flight.remove(id);
                if state.seen.insert(id.clone()) {
                    fresh.push(id.clone());
                }
            }
            fresh
        };

        if fresh.is_empty() {
            return Ok(());
        }
        self.backend.insert(&fresh).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts backend writes and fails every write when `fail` is set.
    #[derive(Default)]
    struct CountingBackend {
        writes: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SeenBackend for CountingBackend {
        async fn load_all(&self) -> Result<Vec<String>> {
            Ok(vec!["preloaded".to_string()])
        }

        async fn insert(&self, _ids: &[String]) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StoreError::Other(anyhow::anyhow!("disk full")));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn loads_snapshot_at_construction() {
        let store = DedupStore::load(Arc::new(CountingBackend::default())).await.unwrap();
        assert!(store.is_seen("preloaded"));
        assert!(!store.is_seen("other"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn mark_seen_twice_writes_once() {
        let backend = Arc::new(CountingBackend::default());
        let store = DedupStore::load(backend.clone()).await.unwrap();

        store.mark_seen("a").await.unwrap();
        store.mark_seen("a").await.unwrap();
        assert!(store.is_seen("a"));
        assert_eq!(backend.writes.load(Ordering::SeqCst), 1);

        store.mark_seen_batch(&["a".into(), "preloaded".into()]).await.unwrap();
        assert_eq!(backend.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn claim_is_exclusive_until_released() {
        let store = DedupStore::load(Arc::new(MemorySeenBackend::new())).await.unwrap();

        assert!(store.try_claim("x"));
        assert!(!store.try_claim("x"));
        assert!(!store.is_seen("x"));

        store.release("x");
        assert!(store.try_claim("x"));

        store.mark_seen("x").await.unwrap();
        assert!(!store.try_claim("x"));
        assert!(store.is_seen("x"));
    }

    #[tokio::test]
    async fn concurrent_claims_admit_one_winner() {
        let store = Arc::new(DedupStore::load(Arc::new(MemorySeenBackend::new())).await.unwrap());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.try_claim("contested") }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn failed_durable_write_keeps_cache_entry() {
        let backend = Arc::new(CountingBackend {
            fail: true,
            ..Default::default()
        });
        let store = DedupStore::load(backend).await.unwrap();

        assert!(store.try_claim("y"));
        assert!(store.mark_seen("y").await.is_err());
        assert!(store.is_seen("y"));
        assert!(!store.try_claim("y"));
    }

    #[tokio::test]
    async fn memory_backend_round_trips_through_reload() {
        let backend = Arc::new(MemorySeenBackend::new());
        let store = DedupStore::load(backend.clone()).await.unwrap();
        store.mark_seen_batch(&["1".into(), "2".into()]).await.unwrap();
        drop(store);

        let reloaded = DedupStore::load(backend.clone()).await.unwrap();
        assert!(reloaded.is_seen("1") && reloaded.is_seen("2"));
        assert_eq!(backend.len(), 2);
    }
}
