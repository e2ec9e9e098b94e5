use std::time::Duration;

use ripple_common::{Fingerprint, Job};

/// How a job's search ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Search drained to the last page.
    Completed,
    /// Checkpoint already marked completed.
    Skipped,
    /// Source rate budget ran out; checkpoint left resumable.
    Exhausted(String),
    /// Cancelled from outside; checkpoint left resumable.
    Interrupted,
    /// Non-retryable source error, or the job's task panicked.
    Failed(String),
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Exhausted(_) => "exhausted",
            Self::Interrupted => "interrupted",
            Self::Failed(_) => "failed",
        }
    }
}

/// Stats from one network expansion run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExpansionStats {
    pub seeds: u32,
    pub seeds_hydrated: u32,
    pub influencers: u32,
    pub nodes_expanded: u32,
    pub nodes_failed: u32,
    /// Nodes popped at max depth and left unexpanded.
    pub leaves: u32,
    pub replies_stored: u32,
    pub retweeters_seen: u32,
    pub users_gated: u32,
    pub timeline_items_stored: u32,
    pub stale_skipped: u32,
    pub off_topic_skipped: u32,
    pub duplicates: u32,
    pub sink_failures: u32,
    pub exhausted: bool,
}

impl ExpansionStats {
    pub fn stored(&self) -> u32 {
        self.replies_stored + self.timeline_items_stored
    }

    pub fn absorb(&mut self, other: &ExpansionStats) {
        self.seeds += other.seeds;
        self.seeds_hydrated += other.seeds_hydrated;
        self.influencers += other.influencers;
        self.nodes_expanded += other.nodes_expanded;
        self.nodes_failed += other.nodes_failed;
        self.leaves += other.leaves;
        self.replies_stored += other.replies_stored;
        self.retweeters_seen += other.retweeters_seen;
        self.users_gated += other.users_gated;
        self.timeline_items_stored += other.timeline_items_stored;
        self.stale_skipped += other.stale_skipped;
        self.off_topic_skipped += other.off_topic_skipped;
        self.duplicates += other.duplicates;
        self.sink_failures += other.sink_failures;
        self.exhausted |= other.exhausted;
    }
}

/// Per-job result handed back to the scheduler.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub name: String,
    pub query: String,
    pub fingerprint: Fingerprint,
    pub outcome: JobOutcome,
    pub resumed: bool,
    pub pages: u32,
    pub items_fetched: u64,
    pub stored: u32,
    pub duplicates: u32,
    /// Dropped by the strict keyword match.
    pub filtered: u32,
    pub sink_failures: u32,
    pub fallback_language: Option<String>,
    pub expansion: ExpansionStats,
    /// An intermediate checkpoint write failed; the next one carried its delta.
    pub checkpoint_degraded: bool,
    /// The exit-path checkpoint write failed after retries.
    pub checkpoint_lost: bool,
}

impl JobReport {
    pub fn new(job: &Job, query: &str, fingerprint: &Fingerprint) -> Self {
        Self {
            name: job.name().to_string(),
            query: query.to_string(),
            fingerprint: fingerprint.clone(),
            outcome: JobOutcome::Completed,
            resumed: false,
            pages: 0,
            items_fetched: 0,
            stored: 0,
            duplicates: 0,
            filtered: 0,
            sink_failures: 0,
            fallback_language: None,
            expansion: ExpansionStats::default(),
            checkpoint_degraded: false,
            checkpoint_lost: false,
        }
    }

    /// Report for a job whose task died before producing one.
    pub fn failed(job: &Job, reason: String) -> Self {
        let query = ripple_common::build_query(job);
        let fingerprint = ripple_common::fingerprint(&query, job);
        Self {
            outcome: JobOutcome::Failed(reason),
            ..Self::new(job, &query, &fingerprint)
        }
    }
}

/// Stats from a full scheduler run.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub jobs_loaded: u32,
    pub jobs_rejected: u32,
    pub jobs_added_by_reload: u32,
    pub jobs_completed: u32,
    pub jobs_skipped: u32,
    pub jobs_exhausted: u32,
    pub jobs_requeued: u32,
    pub jobs_interrupted: u32,
    pub jobs_failed: u32,
    pub pages: u32,
    pub items_fetched: u64,
    pub stored: u32,
    pub duplicates: u32,
    pub filtered: u32,
    pub sink_failures: u32,
    pub checkpoints_degraded: u32,
    pub checkpoints_lost: u32,
    pub expansion: ExpansionStats,
    pub duration: Duration,
}

impl RunSummary {
    pub fn record(&mut self, report: &JobReport) {
        match report.outcome {
            JobOutcome::Completed => self.jobs_completed += 1,
            JobOutcome::Skipped => self.jobs_skipped += 1,
            JobOutcome::Exhausted(_) => self.jobs_exhausted += 1,
            JobOutcome::Interrupted => self.jobs_interrupted += 1,
            JobOutcome::Failed(_) => self.jobs_failed += 1,
        }
        self.pages += report.pages;
        self.items_fetched += report.items_fetched;
        self.stored += report.stored;
        self.duplicates += report.duplicates;
        self.filtered += report.filtered;
        self.sink_failures += report.sink_failures;
        self.checkpoints_degraded += report.checkpoint_degraded as u32;
        self.checkpoints_lost += report.checkpoint_lost as u32;
        self.expansion.absorb(&report.expansion);
    }

    pub fn jobs_finished(&self) -> u32 {
        self.jobs_completed
            + self.jobs_skipped
            + self.jobs_exhausted
            + self.jobs_interrupted
            + self.jobs_failed
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Scout Run Complete ===")?;
        writeln!(f, "Duration:           {:.1}s", self.duration.as_secs_f64())?;
        writeln!(f, "Jobs loaded:        {}", self.jobs_loaded)?;
        writeln!(f, "Jobs rejected:      {}", self.jobs_rejected)?;
        writeln!(f, "Jobs from reload:   {}", self.jobs_added_by_reload)?;
        writeln!(f, "\nOutcomes:")?;
        writeln!(f, "  Completed:   {}", self.jobs_completed)?;
        writeln!(f, "  Skipped:     {}", self.jobs_skipped)?;
        writeln!(f, "  Exhausted:   {} ({} requeued)", self.jobs_exhausted, self.jobs_requeued)?;
        writeln!(f, "  Interrupted: {}", self.jobs_interrupted)?;
        writeln!(f, "  Failed:      {}", self.jobs_failed)?;
        writeln!(f, "\nSearch:")?;
        writeln!(f, "  Pages:        {}", self.pages)?;
        writeln!(f, "  Items:        {}", self.items_fetched)?;
        writeln!(f, "  Stored:       {}", self.stored)?;
        writeln!(f, "  Duplicates:   {}", self.duplicates)?;
        writeln!(f, "  Off-keyword:  {}", self.filtered)?;
        if self.sink_failures > 0 {
            writeln!(f, "  Sink errors:  {}", self.sink_failures)?;
        }
        if self.expansion.nodes_expanded > 0 || self.expansion.seeds > 0 {
            let e = &self.expansion;
            writeln!(f, "\nNetwork expansion:")?;
            writeln!(f, "  Seeds:            {}", e.seeds)?;
            writeln!(f, "  Influencers:      {}", e.influencers)?;
            writeln!(f, "  Nodes expanded:   {}", e.nodes_expanded)?;
            writeln!(f, "  Nodes failed:     {}", e.nodes_failed)?;
            writeln!(f, "  Replies stored:   {}", e.replies_stored)?;
            writeln!(f, "  Retweeters seen:  {}", e.retweeters_seen)?;
            writeln!(f, "  Users gated out:  {}", e.users_gated)?;
            writeln!(f, "  Timeline stored:  {}", e.timeline_items_stored)?;
            writeln!(f, "  Stale skipped:    {}", e.stale_skipped)?;
        }
        if self.checkpoints_degraded > 0 || self.checkpoints_lost > 0 {
            writeln!(f, "\nCheckpoints:")?;
            writeln!(f, "  Degraded writes: {}", self.checkpoints_degraded)?;
            writeln!(f, "  Lost:            {}", self.checkpoints_lost)?;
        }
        Ok(())
    }
}
