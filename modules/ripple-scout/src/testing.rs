// Test mocks for the crawl pipeline.
//
// One mock per trait boundary:
// - MockSource (ContentSource): scripted search pages, edges and failures
// - MockSink (StorageSink): records every capture, optional per-id failures
// - StaticJobSource (JobSource): settable job list with a bumpable version
// Plus FlakyCheckpointStore (a CheckpointStore wrapper that fails on demand),
// builders for items, users and jobs, and a TestHarness that wires ScoutDeps.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use ripple_common::{
    build_query, Capture, CollectionMethod, ExpansionConfig, Item, Job, JobParams, JobSpec,
    SearchPage, SinkStats, SourceError, UserRef,
};
use ripple_store::{
    Checkpoint, CheckpointStore, CheckpointSummary, CheckpointWrite, DedupStore,
    MemoryCheckpointStore, MemorySeenBackend, StoreError,
};

use crate::deps::ScoutDeps;
use crate::traits::{ContentSource, JobSource, StorageSink};

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

type PageKey = (String, Option<String>);

/// Scripted content source. Unregistered searches return an empty final
/// page; unregistered edges return empty lists.
/// Builder pattern: `.on_pages()`, `.on_replies()`, `.exhausted()`, ...
#[derive(Default)]
pub struct MockSource {
    pages: HashMap<PageKey, SearchPage>,
    search_failures: Mutex<HashMap<PageKey, (SourceError, u32)>>,
    hang: HashSet<String>,
    panic: HashSet<String>,
    search_delay: Option<StdDuration>,
    replies: HashMap<String, Vec<Item>>,
    retweeters: HashMap<String, Vec<UserRef>>,
    timelines: HashMap<String, Vec<Item>>,
    details: HashMap<String, Item>,
    node_failures: HashMap<String, SourceError>,
    calls: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one page: `query` at `cursor` yields `items` and `next`.
    pub fn on_page(mut self, query: &str, cursor: Option<&str>, items: Vec<Item>, next: Option<&str>) -> Self {
        self.pages.insert(
            (query.to_string(), cursor.map(str::to_string)),
            SearchPage {
                items,
                next_cursor: next.map(str::to_string),
            },
        );
        self
    }

    /// Register a chain of pages linked by cursors `c1`, `c2`, ...
    pub fn on_pages(mut self, query: &str, pages: Vec<Vec<Item>>) -> Self {
        let count = pages.len();
        for (i, items) in pages.into_iter().enumerate() {
            let cursor = (i > 0).then(|| format!("c{i}"));
            let next = (i + 1 < count).then(|| format!("c{}", i + 1));
            self = self.on_page(query, cursor.as_deref(), items, next.as_deref());
        }
        self
    }

    /// The next `times` searches for `query` at `cursor` fail with `Exhausted`.
    pub fn exhausted(self, query: &str, cursor: Option<&str>, times: u32) -> Self {
        self.failing(query, cursor, SourceError::Exhausted("rate limit".into()), times)
    }

    pub fn failing(self, query: &str, cursor: Option<&str>, error: SourceError, times: u32) -> Self {
        self.search_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((query.to_string(), cursor.map(str::to_string)), (error, times));
        self
    }

    /// Searches for `query` never return.
    pub fn hang_on(mut self, query: &str) -> Self {
        self.hang.insert(query.to_string());
        self
    }

    /// Searches for `query` panic.
    pub fn panic_on(mut self, query: &str) -> Self {
        self.panic.insert(query.to_string());
        self
    }

    /// Sleep before answering each search.
    pub fn with_search_delay(mut self, delay: StdDuration) -> Self {
        self.search_delay = Some(delay);
        self
    }

    pub fn on_replies(mut self, item_id: &str, items: Vec<Item>) -> Self {
        self.replies.insert(item_id.to_string(), items);
        self
    }

    pub fn on_retweeters(mut self, item_id: &str, users: Vec<UserRef>) -> Self {
        self.retweeters.insert(item_id.to_string(), users);
        self
    }

    pub fn on_timeline(mut self, user_id: &str, items: Vec<Item>) -> Self {
        self.timelines.insert(user_id.to_string(), items);
        self
    }

    pub fn on_details(mut self, item: Item) -> Self {
        self.details.insert(item.id.clone(), item);
        self
    }

    /// Every edge lookup for this post or user id fails with `error`.
    pub fn fail_node(mut self, id: &str, error: SourceError) -> Self {
        self.node_failures.insert(id.to_string(), error);
        self
    }

    /// Call log, e.g. `search:<query>:<cursor>`, `replies:<id>`, `timeline:<id>`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }

    fn node_check(&self, id: &str) -> Result<(), SourceError> {
        match self.node_failures.get(id) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn scripted_failure(&self, key: &PageKey) -> Option<SourceError> {
        let mut failures = self.search_failures.lock().unwrap_or_else(|e| e.into_inner());
        let (err, remaining) = failures.get_mut(key)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(err.clone())
    }
}

#[async_trait]
impl ContentSource for MockSource {
    async fn search(&self, query: &str, cursor: Option<&str>) -> Result<SearchPage, SourceError> {
        self.record(format!("search:{query}:{}", cursor.unwrap_or("-")));

        if self.panic.contains(query) {
            panic!("MockSource: panic registered for {query}");
        }
        if self.hang.contains(query) {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.search_delay {
            tokio::time::sleep(delay).await;
        }

        let key = (query.to_string(), cursor.map(str::to_string));
        if let Some(err) = self.scripted_failure(&key) {
            return Err(err);
        }
        Ok(self.pages.get(&key).cloned().unwrap_or_default())
    }

    async fn replies_of(&self, item_id: &str, limit: u32) -> Result<Vec<Item>, SourceError> {
        self.record(format!("replies:{item_id}"));
        self.node_check(item_id)?;
        Ok(take(self.replies.get(item_id), limit))
    }

    async fn retweeters_of(&self, item_id: &str, limit: u32) -> Result<Vec<UserRef>, SourceError> {
        self.record(format!("retweeters:{item_id}"));
        self.node_check(item_id)?;
        Ok(take(self.retweeters.get(item_id), limit))
    }

    async fn timeline_of(&self, user_id: &str, limit: u32) -> Result<Vec<Item>, SourceError> {
        self.record(format!("timeline:{user_id}"));
        self.node_check(user_id)?;
        Ok(take(self.timelines.get(user_id), limit))
    }

    async fn details(&self, item_id: &str) -> Result<Option<Item>, SourceError> {
        self.record(format!("details:{item_id}"));
        Ok(self.details.get(item_id).cloned())
    }
}

fn take<T: Clone>(values: Option<&Vec<T>>, limit: u32) -> Vec<T> {
    values
        .map(|v| v.iter().take(limit as usize).cloned().collect())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

/// Records captures in arrival order. Ids registered with `fail_on` error.
#[derive(Default)]
pub struct MockSink {
    captures: Mutex<Vec<Capture>>,
    failing: Mutex<HashSet<String>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(self, item_id: &str) -> Self {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(item_id.to_string());
        self
    }

    /// Stop failing writes for `item_id`.
    pub fn heal(&self, item_id: &str) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(item_id);
    }

    pub fn captures(&self) -> Vec<Capture> {
        self.captures.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.captures().into_iter().map(|c| c.item.id).collect()
    }

    pub fn count(&self) -> usize {
        self.captures.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn count_by(&self, method: CollectionMethod) -> usize {
        self.captures().iter().filter(|c| c.method == method).count()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.captures().iter().any(|c| c.item.id == item_id)
    }
}

#[async_trait]
impl StorageSink for MockSink {
    async fn store(&self, capture: &Capture) -> Result<()> {
        if self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&capture.item.id)
        {
            bail!("MockSink: write refused for {}", capture.item.id);
        }
        self.captures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(capture.clone());
        Ok(())
    }

    async fn stats(&self) -> Result<SinkStats> {
        let captures = self.captures();
        let mut by_label: HashMap<String, u64> = HashMap::new();
        for c in &captures {
            let label = c
                .job_label
                .clone()
                .or_else(|| c.job_keyword.clone())
                .unwrap_or_default();
            *by_label.entry(label).or_default() += 1;
        }
        let mut by_label: Vec<(String, u64)> = by_label.into_iter().collect();
        by_label.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(SinkStats {
            total: captures.len() as u64,
            by_label,
            earliest: captures.iter().map(|c| c.item.created_at).min(),
            latest: captures.iter().map(|c| c.item.created_at).max(),
        })
    }
}

// ---------------------------------------------------------------------------
// StaticJobSource
// ---------------------------------------------------------------------------

struct JobFile {
    specs: Vec<JobSpec>,
    modified: DateTime<Utc>,
}

/// In-memory job collection. `replace` swaps the list and moves the version
/// marker forward, like saving the job file.
pub struct StaticJobSource {
    file: Mutex<JobFile>,
}

impl StaticJobSource {
    pub fn new(specs: Vec<JobSpec>) -> Self {
        Self {
            file: Mutex::new(JobFile {
                specs,
                modified: Utc::now(),
            }),
        }
    }

    pub fn replace(&self, specs: Vec<JobSpec>) {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.specs = specs;
        file.modified += Duration::seconds(1);
    }

    pub fn push(&self, spec: JobSpec) {
        let mut specs = self
            .file
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .specs
            .clone();
        specs.push(spec);
        self.replace(specs);
    }
}

#[async_trait]
impl JobSource for StaticJobSource {
    async fn last_modified(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(Some(self.file.lock().unwrap_or_else(|e| e.into_inner()).modified))
    }

    async fn load(&self) -> Result<Vec<JobSpec>> {
        Ok(self.file.lock().unwrap_or_else(|e| e.into_inner()).specs.clone())
    }
}

// ---------------------------------------------------------------------------
// FlakyCheckpointStore
// ---------------------------------------------------------------------------

/// Memory checkpoint store that fails the next N writes (or reads) on demand.
#[derive(Default)]
pub struct FlakyCheckpointStore {
    inner: MemoryCheckpointStore,
    failing_writes: AtomicU32,
    failing_reads: AtomicU32,
    write_attempts: AtomicU32,
}

impl FlakyCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub fn insert(&self, checkpoint: Checkpoint) {
        self.inner.insert(checkpoint);
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CheckpointStore for FlakyCheckpointStore {
    async fn get_state(&self, fingerprint: &ripple_common::Fingerprint) -> ripple_store::Result<Option<Checkpoint>> {
        if Self::take_failure(&self.failing_reads) {
            return Err(StoreError::Other(anyhow!("checkpoint read refused")));
        }
        self.inner.get_state(fingerprint).await
    }

    async fn upsert(&self, write: &CheckpointWrite) -> ripple_store::Result<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_writes) {
            return Err(StoreError::Other(anyhow!("checkpoint write refused")));
        }
        self.inner.upsert(write).await
    }

    async fn sweep_completed(&self, retention: Duration) -> ripple_store::Result<u64> {
        self.inner.sweep_completed(retention).await
    }

    async fn active(&self, limit: i64) -> ripple_store::Result<Vec<Checkpoint>> {
        self.inner.active(limit).await
    }

    async fn summary(&self) -> ripple_store::Result<CheckpointSummary> {
        self.inner.summary().await
    }
}

// ---------------------------------------------------------------------------
// TestHarness
// ---------------------------------------------------------------------------

/// Mocks plus an in-memory dedup store, ready to build `ScoutDeps`.
pub struct TestHarness {
    pub source: Arc<MockSource>,
    pub sink: Arc<MockSink>,
    pub checkpoints: Arc<FlakyCheckpointStore>,
    pub seen: Arc<MemorySeenBackend>,
    pub dedup: Arc<DedupStore>,
    pub expansion: ExpansionConfig,
    pub language_fallback: bool,
    pub force: bool,
}

impl TestHarness {
    pub async fn new(source: MockSource) -> Result<Self> {
        Self::with_sink(source, MockSink::new()).await
    }

    pub async fn with_sink(source: MockSource, sink: MockSink) -> Result<Self> {
        let seen = Arc::new(MemorySeenBackend::new());
        let dedup = DedupStore::load(seen.clone()).await?;
        Ok(Self {
            source: Arc::new(source),
            sink: Arc::new(sink),
            checkpoints: Arc::new(FlakyCheckpointStore::new()),
            seen,
            dedup: Arc::new(dedup),
            expansion: ExpansionConfig::default(),
            language_fallback: true,
            force: false,
        })
    }

    pub fn deps(&self) -> ScoutDeps {
        ScoutDeps::builder()
            .source(self.source.clone())
            .sink(self.sink.clone())
            .checkpoints(self.checkpoints.clone())
            .dedup(self.dedup.clone())
            .expansion(self.expansion.clone())
            .language_fallback(self.language_fallback)
            .force(self.force)
            .build()
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn user(id: &str, followers: u64) -> UserRef {
    UserRef {
        id: id.to_string(),
        username: format!("user_{id}"),
        followers,
        following: followers / 10 + 1,
        ..Default::default()
    }
}

/// An item posted an hour ago by a 1k-follower author.
pub fn item(id: &str, text: &str) -> Item {
    item_at(id, text, Utc::now() - Duration::hours(1))
}

pub fn item_at(id: &str, text: &str, created_at: DateTime<Utc>) -> Item {
    item_by(id, text, user(&format!("author_{id}"), 1_000), created_at)
}

pub fn item_by(id: &str, text: &str, author: UserRef, created_at: DateTime<Utc>) -> Item {
    Item {
        id: id.to_string(),
        author,
        text: text.to_string(),
        created_at,
        engagement: Default::default(),
        hashtags: Vec::new(),
        conversation_id: None,
        in_reply_to: None,
        lang: None,
    }
}

/// `n` items `<prefix>-0 .. <prefix>-(n-1)` whose text mentions `text`.
pub fn items(prefix: &str, n: usize, text: &str) -> Vec<Item> {
    (0..n).map(|i| item(&format!("{prefix}-{i}"), text)).collect()
}

/// Flat job spec for a label with a fixed January 2024 window.
pub fn spec(label: &str) -> JobSpec {
    JobSpec {
        params: JobParams {
            label: Some(label.to_string()),
            post_start_datetime: Some("2024-01-01".to_string()),
            post_end_datetime: Some("2024-01-31".to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn job_from(spec: &JobSpec) -> Job {
    match Job::from_spec(spec, Utc::now()) {
        Ok(job) => job,
        Err(e) => panic!("invalid test job: {e}"),
    }
}

/// Label job with expansion disabled.
pub fn job(label: &str) -> Job {
    let mut spec = spec(label);
    spec.params.enable_network_expansion = Some(false);
    job_from(&spec)
}

/// Label job with expansion to `depth`.
pub fn expanding_job(label: &str, depth: u32) -> Job {
    let mut spec = spec(label);
    spec.params.max_network_depth = Some(depth);
    job_from(&spec)
}

/// The query string the orchestrator will issue for `job`.
pub fn query_for(job: &Job) -> String {
    build_query(job)
}
