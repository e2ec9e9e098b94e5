use std::sync::Arc;

use ripple_common::ExpansionConfig;
use ripple_store::{CheckpointStore, DedupStore};
use typed_builder::TypedBuilder;

use crate::traits::{ContentSource, StorageSink};

/// Shared dependency container for orchestrator and traversal. Cheap to
/// clone; every field is a shared handle.
#[derive(Clone, TypedBuilder)]
pub struct ScoutDeps {
    pub source: Arc<dyn ContentSource>,
    pub sink: Arc<dyn StorageSink>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub dedup: Arc<DedupStore>,
    #[builder(default)]
    pub expansion: ExpansionConfig,
    /// Retry zero-result language-filtered searches in other languages.
    #[builder(default = true)]
    pub language_fallback: bool,
    /// Re-run fingerprints already marked completed.
    #[builder(default)]
    pub force: bool,
}
