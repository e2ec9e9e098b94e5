//! Durable state for the crawl: pagination checkpoints, the seen-id set,
//! and the captured-item sink.

pub mod checkpoint;
pub mod dedup;
pub mod error;
pub mod sink;

pub use checkpoint::{
    Checkpoint, CheckpointStore, CheckpointSummary, CheckpointWrite, MemoryCheckpointStore,
    PgCheckpointStore,
};
pub use dedup::{DedupStore, MemorySeenBackend, PgSeenBackend, SeenBackend};
pub use error::{Result, StoreError};
pub use sink::PgItemSink;

use sqlx::PgPool;

/// Run the embedded SQL migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
