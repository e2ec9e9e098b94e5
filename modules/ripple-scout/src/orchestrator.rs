//! Per-job orchestration: query -> resumable paginated search -> dedup ->
//! sink, then a follow-up pass from the stored search items: the full
//! network walk when the job enables it, otherwise direct replies only.
//!
//! Checkpoint protocol for one fingerprint:
//! - start: `get_state`. Completed rows are skipped unless forced; incomplete
//!   rows resume from their cursor.
//! - each page: one `upsert` carrying the items fetched since the last
//!   successful write. A failed intermediate write keeps its delta pending
//!   for the next write instead of losing it.
//! - every exit path (drained, exhausted, failed, interrupted): one final
//!   `upsert`, retried with backoff.

use std::time::Duration;

use ripple_common::{
    build_query, fingerprint, resolved_language, Capture, CollectionMethod, Fingerprint, Item,
    Job, SourceError,
};
use ripple_store::CheckpointWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collector::{collect, StoreOutcome};
use crate::deps::ScoutDeps;
use crate::expansion::NetworkExpander;
use crate::stats::{JobOutcome, JobReport};

/// Languages tried, in order, when a language-filtered search finds nothing.
pub const FALLBACK_LANGUAGES: &[&str] = &["en", "ja", "es"];

const FINAL_WRITE_ATTEMPTS: u32 = 3;
const FINAL_WRITE_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct Orchestrator {
    deps: ScoutDeps,
}

/// One resumable query: the job it came from, its text and fingerprint.
struct SearchTarget<'a> {
    job: &'a Job,
    query: &'a str,
    fp: &'a Fingerprint,
}

/// Outcome of draining one fingerprint.
struct SearchRun {
    outcome: JobOutcome,
    items: u64,
    /// Items recorded by earlier runs of a resumed checkpoint.
    prior: u64,
}

impl SearchRun {
    fn skipped() -> Self {
        Self {
            outcome: JobOutcome::Skipped,
            items: 0,
            prior: 0,
        }
    }

    fn total(&self) -> u64 {
        self.items + self.prior
    }
}

impl Orchestrator {
    pub fn new(deps: ScoutDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &ScoutDeps {
        &self.deps
    }

    /// Run one job to completion, exhaustion, failure or cancellation.
    pub async fn run_job(&self, job: &Job, worker: &str, cancel: &CancellationToken) -> JobReport {
        let query = build_query(job);
        let fp = fingerprint(&query, job);
        let mut report = JobReport::new(job, &query, &fp);
        let mut seeds: Vec<Item> = Vec::new();

        info!(job = job.name(), worker, fingerprint = %fp, query = %query, "Job started");

        let target = SearchTarget {
            job,
            query: &query,
            fp: &fp,
        };
        let run = self
            .drain(&target, worker, cancel, &mut seeds, &mut report)
            .await;
        report.outcome = run.outcome.clone();

        if report.outcome == JobOutcome::Completed && run.total() == 0 {
            self.language_fallback(job, worker, cancel, &mut seeds, &mut report)
                .await;
        }

        let follow_up = report.outcome == JobOutcome::Completed
            && !seeds.is_empty()
            && !cancel.is_cancelled();
        if follow_up && job.expansion.enabled {
            report.expansion = NetworkExpander::new(&self.deps, job)
                .run(seeds, cancel)
                .await;
        } else if follow_up && self.deps.expansion.search_replies {
            report.expansion = NetworkExpander::replies_only(&self.deps, job)
                .run(seeds, cancel)
                .await;
        }

        info!(
            job = job.name(),
            worker,
            outcome = report.outcome.label(),
            pages = report.pages,
            fetched = report.items_fetched,
            stored = report.stored,
            duplicates = report.duplicates,
            expanded = report.expansion.stored(),
            "Job finished"
        );
        report
    }

    /// Retry a zero-result search in the fallback languages. Works on a
    /// transient copy of the job; each language has its own fingerprint.
    async fn language_fallback(
        &self,
        job: &Job,
        worker: &str,
        cancel: &CancellationToken,
        seeds: &mut Vec<Item>,
        report: &mut JobReport,
    ) {
        if !self.deps.language_fallback {
            return;
        }
        let Some(original) = resolved_language(job) else {
            return;
        };

        for lang in FALLBACK_LANGUAGES.iter().filter(|l| **l != original.as_str()) {
            if cancel.is_cancelled() {
                return;
            }
            let alt = job.with_language(lang);
            let query = build_query(&alt);
            let fp = fingerprint(&query, &alt);
            info!(job = job.name(), from = %original, to = *lang, "No results, trying fallback language");

            let target = SearchTarget {
                job: &alt,
                query: &query,
                fp: &fp,
            };
            let run = self.drain(&target, worker, cancel, seeds, report).await;
            report.outcome = run.outcome.clone();
            if report.outcome != JobOutcome::Completed && report.outcome != JobOutcome::Skipped {
                return;
            }
            if run.total() > 0 {
                report.fallback_language = Some(lang.to_string());
                return;
            }
        }
        // No fallback produced items; the original search still counts as drained.
        report.outcome = JobOutcome::Completed;
    }

    async fn drain(
        &self,
        target: &SearchTarget<'_>,
        worker: &str,
        cancel: &CancellationToken,
        seeds: &mut Vec<Item>,
        report: &mut JobReport,
    ) -> SearchRun {
        let SearchTarget { job, query, fp } = *target;
        let state = match self.deps.checkpoints.get_state(fp).await {
            Ok(state) => state,
            Err(e) => {
                // Rescan from the first page; dedup filters re-fetched items.
                warn!(fingerprint = %fp, error = %e, "Checkpoint read failed, starting from the first page");
                report.checkpoint_degraded = true;
                None
            }
        };

        let mut prior: u64 = 0;
        let mut cursor = match state {
            Some(cp) if cp.completed && !self.deps.force => {
                info!(job = job.name(), fingerprint = %fp, items = cp.items_fetched, "Already completed, skipping");
                return SearchRun::skipped();
            }
            Some(cp) if !cp.completed => {
                info!(job = job.name(), items = cp.items_fetched, "Resuming from checkpoint");
                report.resumed = true;
                prior = cp.items_fetched;
                cp.cursor
            }
            _ => None,
        };

        let mut pending: u64 = 0;
        let mut items: u64 = 0;

        let outcome = loop {
            if cancel.is_cancelled() {
                break JobOutcome::Interrupted;
            }

            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => break JobOutcome::Interrupted,
                page = self.deps.source.search(query, cursor.as_deref()) => page,
            };

            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    warn!(job = job.name(), fingerprint = %fp, error = %e, "Search page failed");
                    break outcome_for(e);
                }
            };

            report.pages += 1;
            let fetched = page.items.len() as u64;
            items += fetched;
            pending += fetched;
            report.items_fetched += fetched;
            debug!(job = job.name(), page = report.pages, fetched, "Search page");

            for item in page.items {
                if !keyword_match(job, &item) {
                    report.filtered += 1;
                    continue;
                }
                self.store_search_item(job, item, seeds, report).await;
            }

            cursor = page.next_cursor;
            if cursor.is_none() || fetched == 0 {
                break JobOutcome::Completed;
            }

            let write = checkpoint_write(fp, query, cursor.clone(), pending, worker, false);
            match self.deps.checkpoints.upsert(&write).await {
                Ok(()) => pending = 0,
                Err(e) => {
                    warn!(fingerprint = %fp, pending, error = %e, "Checkpoint write failed, carrying delta forward");
                    report.checkpoint_degraded = true;
                }
            }
        };

        let completed = outcome == JobOutcome::Completed;
        let final_cursor = if completed { None } else { cursor };
        let write = checkpoint_write(fp, query, final_cursor, pending, worker, completed);
        if !self.write_final(&write).await {
            report.checkpoint_lost = true;
        }

        SearchRun {
            outcome,
            items,
            prior,
        }
    }

    async fn store_search_item(
        &self,
        job: &Job,
        item: Item,
        seeds: &mut Vec<Item>,
        report: &mut JobReport,
    ) {
        let capture = Capture {
            item,
            job_label: job.label.clone(),
            job_keyword: job.keyword.clone(),
            method: CollectionMethod::Search,
            depth: 0,
        };
        let outcome = collect(&self.deps, &capture).await;
        match outcome {
            StoreOutcome::Stored => {
                report.stored += 1;
                seeds.push(capture.item);
            }
            StoreOutcome::Duplicate => report.duplicates += 1,
            StoreOutcome::Failed => report.sink_failures += 1,
        }
    }

    /// Exit-path write with exponential backoff. Returns false when every
    /// attempt failed.
    async fn write_final(&self, write: &CheckpointWrite) -> bool {
        let mut delay = FINAL_WRITE_BACKOFF;
        for attempt in 1..=FINAL_WRITE_ATTEMPTS {
            match self.deps.checkpoints.upsert(write).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(fingerprint = %write.fingerprint, attempt, error = %e, "Final checkpoint write failed");
                    if attempt < FINAL_WRITE_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        error!(
            fingerprint = %write.fingerprint,
            items = write.items_delta,
            "Checkpoint lost; next run rescans this query"
        );
        false
    }
}

fn outcome_for(err: SourceError) -> JobOutcome {
    if err.is_retryable() {
        JobOutcome::Exhausted(err.to_string())
    } else {
        JobOutcome::Failed(err.to_string())
    }
}

/// Keyword jobs keep only items whose text contains the keyword.
fn keyword_match(job: &Job, item: &Item) -> bool {
    match job.keyword.as_deref() {
        Some(kw) => item.text.to_lowercase().contains(&kw.to_lowercase()),
        None => true,
    }
}

fn checkpoint_write(
    fp: &Fingerprint,
    query: &str,
    cursor: Option<String>,
    delta: u64,
    worker: &str,
    completed: bool,
) -> CheckpointWrite {
    CheckpointWrite {
        fingerprint: fp.clone(),
        query_text: query.to_string(),
        cursor,
        items_delta: delta,
        worker: Some(worker.to_string()),
        completed,
    }
}
