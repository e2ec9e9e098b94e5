//! Job scheduler: one shared work queue, a fixed worker pool, and an
//! optional hot-reload monitor that appends newly discovered jobs while the
//! pool is running.
//!
//! Per worker: `Idle -> Fetching(job) -> Idle`, terminal `Stopped`. Each job
//! runs in its own task, so a panic is recorded against that job and the
//! worker returns to `Idle`.
//!
//! Termination: without hot reload a worker stops once the queue is empty
//! and no job is in flight. With hot reload the pool additionally waits one
//! grace window of idleness for late arrivals. Cancellation stops dequeuing
//! immediately; in-flight jobs write their final checkpoint first.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use ripple_common::{load_jobs, Config, Job, JobIdentity};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::orchestrator::Orchestrator;
use crate::stats::{JobOutcome, JobReport, RunSummary};
use crate::traits::JobSource;

// ---------------------------------------------------------------------------
// WorkQueue
// ---------------------------------------------------------------------------

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    active: usize,
    closed: bool,
}

/// FIFO of jobs with a bounded-wait `pop`. Tracks how many popped jobs are
/// still running so "empty and idle" is a single atomic check. Once closed,
/// pushes are refused.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue `front` ahead of everything (keeping its order) and `back`
    /// behind everything, in one step. Returns false and queues nothing once
    /// the queue is closed.
    pub fn push_batch(&self, front: Vec<Job>, back: Vec<Job>) -> bool {
        let n = front.len() + back.len();
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            for job in front.into_iter().rev() {
                state.jobs.push_front(job);
            }
            state.jobs.extend(back);
        }
        for _ in 0..n {
            self.notify.notify_one();
        }
        true
    }

    pub fn push_back(&self, job: Job) -> bool {
        self.push_batch(Vec::new(), vec![job])
    }

    pub fn push_front(&self, job: Job) -> bool {
        self.push_batch(vec![job], Vec::new())
    }

    pub fn push_front_all(&self, jobs: Vec<Job>) -> bool {
        self.push_batch(jobs, Vec::new())
    }

    pub fn extend(&self, jobs: Vec<Job>) -> bool {
        self.push_batch(Vec::new(), jobs)
    }

    /// Close the queue if nothing is queued or running. Checked and applied
    /// under one lock, so no push can land between the check and the close.
    pub fn close_if_idle(&self) -> bool {
        let mut state = self.lock();
        if state.jobs.is_empty() && state.active == 0 {
            state.closed = true;
        }
        state.closed
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Wait up to `wait` for a job. A returned job counts as active until
    /// [`finish`](Self::finish) is called.
    pub async fn pop(&self, wait: Duration) -> Option<Job> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.try_pop() {
                return Some(job);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    fn try_pop(&self) -> Option<Job> {
        let mut state = self.lock();
        let job = state.jobs.pop_front()?;
        state.active += 1;
        Some(job)
    }

    pub fn finish(&self) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nothing queued and nothing running.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.jobs.is_empty() && state.active == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().jobs.iter().map(|j| j.name().to_string()).collect()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub hot_reload: bool,
    pub reload_interval: Duration,
    pub grace_window: Duration,
    pub queue_wait: Duration,
    /// Times one job may go back on the queue after source exhaustion.
    pub max_requeues: u32,
    pub worker_id_prefix: String,
    /// Shuffle the initial queue so workers do not all start on one topic.
    pub shuffle: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            hot_reload: true,
            reload_interval: Duration::from_secs(30),
            grace_window: Duration::from_secs(60),
            queue_wait: Duration::from_secs(5),
            max_requeues: 1,
            worker_id_prefix: "scout".to_string(),
            shuffle: true,
        }
    }
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.workers,
            hot_reload: config.hot_reload,
            reload_interval: config.hot_reload_interval,
            grace_window: config.grace_window,
            queue_wait: config.queue_wait,
            max_requeues: config.max_requeues,
            worker_id_prefix: config.worker_id_prefix.clone(),
            shuffle: true,
        }
    }
}

/// State shared by workers and the reload monitor for one run.
struct RunState {
    queue: WorkQueue,
    summary: Mutex<RunSummary>,
    seen: Mutex<HashSet<JobIdentity>>,
    requeues: Mutex<HashMap<JobIdentity, u32>>,
    idle_since: Mutex<Option<Instant>>,
    /// Fired when the pool has drained (and, with hot reload, sat idle for
    /// the grace window).
    drained: CancellationToken,
}

impl RunState {
    fn summary(&self) -> MutexGuard<'_, RunSummary> {
        self.summary.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record identities; returns the jobs not seen before in this run.
    fn admit(&self, jobs: Vec<Job>) -> Vec<Job> {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        jobs.into_iter()
            .filter(|job| seen.insert(job.identity.clone()))
            .collect()
    }

    fn try_requeue(&self, job: &Job, max: u32) -> bool {
        let mut requeues = self.requeues.lock().unwrap_or_else(|e| e.into_inner());
        let count = requeues.entry(job.identity.clone()).or_insert(0);
        if *count >= max {
            return false;
        }
        *count += 1;
        true
    }

    /// True once the pool has been idle for `grace`.
    fn idle_for(&self, grace: Duration) -> bool {
        let mut idle_since = self.idle_since.lock().unwrap_or_else(|e| e.into_inner());
        let since = idle_since.get_or_insert_with(Instant::now);
        since.elapsed() >= grace
    }

    fn clear_idle(&self) {
        *self.idle_since.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    jobs: Arc<dyn JobSource>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(orchestrator: Orchestrator, jobs: Arc<dyn JobSource>, config: SchedulerConfig) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            jobs,
            config,
        }
    }

    /// Load jobs, run the pool until drained or cancelled, and return the
    /// run summary.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary> {
        let started = Instant::now();
        let version = self.jobs.last_modified().await.unwrap_or_else(|e| {
            warn!(error = %e, "Job source has no modification time");
            None
        });
        let specs = self.jobs.load().await?;
        let loaded = load_jobs(&specs, Utc::now());

        let state = Arc::new(RunState {
            queue: WorkQueue::new(),
            summary: Mutex::new(RunSummary::default()),
            seen: Mutex::new(HashSet::new()),
            requeues: Mutex::new(HashMap::new()),
            idle_since: Mutex::new(None),
            drained: CancellationToken::new(),
        });

        let mut initial = state.admit(loaded.jobs);
        if self.config.shuffle {
            initial.shuffle(&mut rand::rng());
        }
        {
            let mut summary = state.summary();
            summary.jobs_loaded = initial.len() as u32;
            summary.jobs_rejected = loaded.rejected as u32;
        }
        info!(
            jobs = initial.len(),
            rejected = loaded.rejected,
            workers = self.config.workers,
            hot_reload = self.config.hot_reload,
            "Scheduler starting"
        );
        state.queue.extend(initial);

        let monitor = self.config.hot_reload.then(|| {
            let jobs = self.jobs.clone();
            let state = state.clone();
            let cancel = cancel.clone();
            let interval = self.config.reload_interval;
            tokio::spawn(async move { reload_monitor(jobs, state, version, interval, cancel).await })
        });

        let workers: Vec<_> = (0..self.config.workers.max(1))
            .map(|i| {
                let worker_id = format!("{}-{i}", self.config.worker_id_prefix);
                let orchestrator = self.orchestrator.clone();
                let state = state.clone();
                let cancel = cancel.clone();
                let config = self.config.clone();
                tokio::spawn(async move { worker_loop(worker_id, orchestrator, state, config, cancel).await })
            })
            .collect();

        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task ended abnormally");
            }
        }

        state.drained.cancel();
        if let Some(monitor) = monitor {
            if let Err(e) = monitor.await {
                error!(error = %e, "Reload monitor ended abnormally");
            }
        }

        let mut summary = state.summary().clone();
        summary.duration = started.elapsed();
        Ok(summary)
    }
}

async fn worker_loop(
    worker_id: String,
    orchestrator: Arc<Orchestrator>,
    state: Arc<RunState>,
    config: SchedulerConfig,
    cancel: CancellationToken,
) {
    debug!(worker = %worker_id, "Worker started");
    loop {
        if cancel.is_cancelled() || state.drained.is_cancelled() {
            break;
        }

        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = state.drained.cancelled() => break,
            job = state.queue.pop(config.queue_wait) => job,
        };

        let Some(job) = next else {
            if !state.queue.is_idle() {
                continue;
            }
            let settled = !config.hot_reload || state.idle_for(config.grace_window);
            if settled && state.queue.close_if_idle() {
                debug!(worker = %worker_id, "Queue drained");
                state.drained.cancel();
                break;
            }
            continue;
        };

        state.clear_idle();
        let report = run_isolated(&orchestrator, &job, &worker_id, &cancel).await;

        let requeue = matches!(report.outcome, JobOutcome::Exhausted(_))
            && !cancel.is_cancelled()
            && state.try_requeue(&job, config.max_requeues);

        {
            let mut summary = state.summary();
            summary.record(&report);
            if requeue {
                summary.jobs_requeued += 1;
            }
        }
        if requeue {
            info!(job = job.name(), "Requeueing exhausted job");
            if !state.queue.push_back(job) {
                warn!(worker = %worker_id, "Queue closed, requeue dropped");
            }
        }
        state.queue.finish();
    }
    debug!(worker = %worker_id, "Worker stopped");
}

/// Run one job in its own task so a panic is confined to that job.
async fn run_isolated(
    orchestrator: &Arc<Orchestrator>,
    job: &Job,
    worker_id: &str,
    cancel: &CancellationToken,
) -> JobReport {
    let task = {
        let orchestrator = orchestrator.clone();
        let job = job.clone();
        let worker_id = worker_id.to_string();
        let cancel = cancel.clone();
        tokio::spawn(async move { orchestrator.run_job(&job, &worker_id, &cancel).await })
    };

    match task.await {
        Ok(report) => report,
        Err(e) => {
            error!(job = job.name(), worker = worker_id, error = %e, "Job task failed");
            JobReport::failed(job, e.to_string())
        }
    }
}

async fn reload_monitor(
    jobs: Arc<dyn JobSource>,
    state: Arc<RunState>,
    mut version: Option<DateTime<Utc>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = state.drained.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let current = match jobs.last_modified().await {
            Ok(current) => current,
            Err(e) => {
                warn!(error = %e, "Job source check failed");
                continue;
            }
        };
        let changed = match (current, version) {
            (Some(current), Some(previous)) => current > previous,
            (Some(_), None) => true,
            _ => false,
        };
        if !changed {
            continue;
        }
        version = current;

        let specs = match jobs.load().await {
            Ok(specs) => specs,
            Err(e) => {
                warn!(error = %e, "Job source reload failed");
                continue;
            }
        };

        // load_jobs orders each tier by weight; `is_new` jobs jump the queue.
        let loaded = load_jobs(&specs, Utc::now());
        let added = state.admit(loaded.jobs);
        if added.is_empty() {
            debug!("Job source changed, no new jobs");
            continue;
        }

        let (fresh, rest): (Vec<Job>, Vec<Job>) = added.into_iter().partition(|j| j.is_new);
        let (new, other) = (fresh.len(), rest.len());
        state.clear_idle();
        if !state.queue.push_batch(fresh, rest) {
            warn!(jobs = new + other, "Job source changed after the pool drained, jobs not queued");
            break;
        }
        {
            let mut summary = state.summary();
            summary.jobs_added_by_reload += (new + other) as u32;
            summary.jobs_rejected += loaded.rejected as u32;
        }
        info!(new, other, queued = state.queue.len(), "Hot reload added jobs");
    }
}
