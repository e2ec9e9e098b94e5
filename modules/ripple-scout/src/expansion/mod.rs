//! Network expansion: bounded breadth-first walk from a search's seed items.
//!
//! Three edges are followed:
//! - post -> replies (stored, then enqueued as posts one level deeper)
//! - seed post -> retweeters (enqueued as users one level deeper)
//! - user -> recent timeline (matching items stored; timeline items are leaves)
//!
//! An engagement pass over hydrated seeds adds the top contributors as
//! depth-0 influencer users. Non-influencer users are expanded only when they
//! clear the follower floor for their depth and the relevance threshold.
//! Every discovered item must also fall inside the recency window.
//!
//! Jobs without network expansion get a replies-only pass: every seed's
//! direct replies, no retweeters, no influencers, no second hop.

pub mod frontier;

pub use frontier::{Entry, Frontier, Node, Origin};

use chrono::{DateTime, Duration, Utc};
use ripple_common::scoring::{follower_floor, relevance_score, top_contributors};
use ripple_common::{Capture, CollectionMethod, Item, Job, RippleError, SourceError, UserRef};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::{collect, StoreOutcome};
use crate::deps::ScoutDeps;
use crate::stats::ExpansionStats;

pub struct NetworkExpander<'a> {
    deps: &'a ScoutDeps,
    job: &'a Job,
    cutoff: DateTime<Utc>,
    replies_only: bool,
}

impl<'a> NetworkExpander<'a> {
    pub fn new(deps: &'a ScoutDeps, job: &'a Job) -> Self {
        Self {
            deps,
            job,
            cutoff: Utc::now() - Duration::days(deps.expansion.recency_days),
            replies_only: false,
        }
    }

    pub fn replies_only(deps: &'a ScoutDeps, job: &'a Job) -> Self {
        Self {
            replies_only: true,
            ..Self::new(deps, job)
        }
    }

    fn max_depth(&self) -> u32 {
        if self.replies_only {
            1
        } else {
            self.job.expansion.max_depth
        }
    }

    pub async fn run(&self, seeds: Vec<Item>, cancel: &CancellationToken) -> ExpansionStats {
        let cfg = &self.deps.expansion;
        let mut stats = ExpansionStats::default();
        let mut frontier = Frontier::new(self.max_depth());

        stats.seeds = seeds.len() as u32;
        for seed in &seeds {
            frontier.push(Node::Post(seed.id.clone()), 0, Origin::Seed);
        }

        // Influencers enter at depth 0, so a zero-depth walk could never use them.
        let influencer_pass = !self.replies_only && frontier.max_depth() > 0;
        if influencer_pass && seeds.len() > cfg.min_seed_details {
            let hydrated = self.hydrate(&seeds, &mut stats, cancel).await;
            if stats.exhausted {
                return stats;
            }
            if hydrated.len() > cfg.min_seed_details {
                for (user, score) in top_contributors(&hydrated, cfg.top_influencers) {
                    if user.id.is_empty() {
                        continue;
                    }
                    debug!(user = %user.username, score, "Influencer seed");
                    if frontier.push(Node::User(user), 0, Origin::Influencer) {
                        stats.influencers += 1;
                    }
                }
            }
        }

        let mut retweeter_seeds = 0usize;
        while let Some(entry) = frontier.pop() {
            if cancel.is_cancelled() {
                debug!(job = self.job.name(), "Expansion cancelled");
                break;
            }
            if frontier.is_leaf(&entry) {
                stats.leaves += 1;
                continue;
            }

            let result = match &entry.node {
                Node::Post(id) => {
                    self.expand_post(id, &entry, &mut frontier, &mut stats, &mut retweeter_seeds)
                        .await
                }
                Node::User(user) => self.expand_user(user, &entry, &mut stats).await,
            };

            match result {
                Ok(true) => stats.nodes_expanded += 1,
                Ok(false) => {}
                Err(e) if e.is_retryable() => {
                    warn!(job = self.job.name(), error = %e, "Source exhausted during expansion");
                    stats.exhausted = true;
                    break;
                }
                Err(e) => {
                    stats.nodes_failed += 1;
                    let err = RippleError::Traversal {
                        node: entry.node.key(),
                        reason: e.to_string(),
                    };
                    warn!(job = self.job.name(), depth = entry.depth, error = %err, "Node expansion failed");
                }
            }
        }

        info!(
            job = self.job.name(),
            visited = frontier.visited(),
            expanded = stats.nodes_expanded,
            stored = stats.stored(),
            "Network expansion finished"
        );
        stats
    }

    /// Fetch full records for seeds so engagement scoring sees complete
    /// counters. Missing or failing seeds are skipped.
    async fn hydrate(
        &self,
        seeds: &[Item],
        stats: &mut ExpansionStats,
        cancel: &CancellationToken,
    ) -> Vec<Item> {
        let mut hydrated = Vec::new();
        for seed in seeds.iter().take(self.deps.expansion.max_seed_details) {
            if cancel.is_cancelled() {
                break;
            }
            match self.deps.source.details(&seed.id).await {
                Ok(Some(item)) => hydrated.push(item),
                Ok(None) => debug!(item_id = %seed.id, "Seed no longer available"),
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "Source exhausted while hydrating seeds");
                    stats.exhausted = true;
                    break;
                }
                Err(e) => {
                    stats.nodes_failed += 1;
                    warn!(item_id = %seed.id, error = %e, "Seed detail fetch failed");
                }
            }
        }
        stats.seeds_hydrated = hydrated.len() as u32;
        hydrated
    }

    async fn expand_post(
        &self,
        id: &str,
        entry: &Entry,
        frontier: &mut Frontier,
        stats: &mut ExpansionStats,
        retweeter_seeds: &mut usize,
    ) -> Result<bool, SourceError> {
        let cfg = &self.deps.expansion;
        let child_depth = entry.depth + 1;

        let replies = self.deps.source.replies_of(id, cfg.replies_per_post).await?;
        for reply in replies {
            if !self.is_recent(&reply) {
                stats.stale_skipped += 1;
                continue;
            }
            let reply_id = reply.id.clone();
            match self
                .store(reply, CollectionMethod::ConversationReply, child_depth)
                .await
            {
                StoreOutcome::Stored => stats.replies_stored += 1,
                StoreOutcome::Duplicate => stats.duplicates += 1,
                StoreOutcome::Failed => stats.sink_failures += 1,
            }
            frontier.push(Node::Post(reply_id), child_depth, Origin::Reply);
        }

        if !self.replies_only
            && entry.origin == Origin::Seed
            && *retweeter_seeds < cfg.max_retweeter_seeds
        {
            *retweeter_seeds += 1;
            let users = self
                .deps
                .source
                .retweeters_of(id, cfg.retweeters_per_post)
                .await?;
            for user in users {
                stats.retweeters_seen += 1;
                frontier.push(Node::User(user), child_depth, Origin::Retweeter);
            }
        }

        Ok(true)
    }

    async fn expand_user(
        &self,
        user: &UserRef,
        entry: &Entry,
        stats: &mut ExpansionStats,
    ) -> Result<bool, SourceError> {
        let cfg = &self.deps.expansion;
        if entry.origin != Origin::Influencer && !self.passes_gate(user, entry.depth) {
            stats.users_gated += 1;
            return Ok(false);
        }

        let (limit, method) = match entry.origin {
            Origin::Influencer => (cfg.influencer_timeline, CollectionMethod::InfluencerTimeline),
            _ => (cfg.timeline_per_user, CollectionMethod::RetweeterTimeline),
        };

        let items = self.deps.source.timeline_of(&user.id, limit).await?;
        for item in items {
            if !self.is_recent(&item) {
                stats.stale_skipped += 1;
                continue;
            }
            if !item.matches_terms(self.job.label.as_deref(), self.job.keyword.as_deref()) {
                stats.off_topic_skipped += 1;
                continue;
            }
            match self.store(item, method, entry.depth + 1).await {
                StoreOutcome::Stored => stats.timeline_items_stored += 1,
                StoreOutcome::Duplicate => stats.duplicates += 1,
                StoreOutcome::Failed => stats.sink_failures += 1,
            }
        }
        Ok(true)
    }

    /// Follower floor for the depth, then the relevance threshold.
    fn passes_gate(&self, user: &UserRef, depth: u32) -> bool {
        if user.followers < follower_floor(depth) {
            return false;
        }
        let score = relevance_score(user, self.job.label.as_deref(), self.job.keyword.as_deref());
        score >= self.deps.expansion.min_relevance
    }

    fn is_recent(&self, item: &Item) -> bool {
        item.created_at >= self.cutoff
    }

    async fn store(&self, item: Item, method: CollectionMethod, depth: u32) -> StoreOutcome {
        let capture = Capture {
            item,
            job_label: self.job.label.clone(),
            job_keyword: self.job.keyword.clone(),
            method,
            depth,
        };
        collect(self.deps, &capture).await
    }
}
