//! The single path by which any discovered item reaches the sink:
//! claim in the dedup store, store, then mark seen.

use ripple_common::Capture;
use tracing::warn;

use crate::deps::ScoutDeps;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    Duplicate,
    Failed,
}

pub async fn collect(deps: &ScoutDeps, capture: &Capture) -> StoreOutcome {
    let id = capture.item.id.as_str();
    if !deps.dedup.try_claim(id) {
        return StoreOutcome::Duplicate;
    }

    if let Err(e) = deps.sink.store(capture).await {
        deps.dedup.release(id);
        warn!(item_id = id, method = %capture.method, error = %e, "Sink write failed");
        return StoreOutcome::Failed;
    }

    if let Err(e) = deps.dedup.mark_seen(id).await {
        // Cached as seen for this run; the durable set misses it.
        warn!(item_id = id, error = %e, "Seen-set write failed");
    }
    StoreOutcome::Stored
}
