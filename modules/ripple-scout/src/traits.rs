// Trait abstractions for the crawl's external collaborators.
//
// ContentSource: the remote social-media source (search pages, replies,
//   retweeters, timelines, item details). Production: GatewayClient.
// StorageSink: durable record store for captured items. Production: PgItemSink.
// JobSource: versioned, re-readable job collection. Production: FileJobSource.
//
// Mocks for all three live in `testing.rs`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ripple_common::{Capture, Item, JobSpec, SearchPage, SinkStats, SourceError, UserRef};

// ---------------------------------------------------------------------------
// ContentSource
// ---------------------------------------------------------------------------

/// Every call returns a finite batch. `SourceError::Exhausted` is the
/// retryable rate-limit signal.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// One page of results for `query`, starting at `cursor`.
    async fn search(&self, query: &str, cursor: Option<&str>) -> Result<SearchPage, SourceError>;

    async fn replies_of(&self, item_id: &str, limit: u32) -> Result<Vec<Item>, SourceError>;

    async fn retweeters_of(&self, item_id: &str, limit: u32) -> Result<Vec<UserRef>, SourceError>;

    async fn timeline_of(&self, user_id: &str, limit: u32) -> Result<Vec<Item>, SourceError>;

    async fn details(&self, item_id: &str) -> Result<Option<Item>, SourceError>;
}

#[async_trait]
impl ContentSource for gateway_client::GatewayClient {
    async fn search(&self, query: &str, cursor: Option<&str>) -> Result<SearchPage, SourceError> {
        let page = gateway_client::GatewayClient::search(self, query, cursor)
            .await
            .map_err(crate::gateway_bridge::source_error)?;
        Ok(crate::gateway_bridge::search_page(page))
    }

    async fn replies_of(&self, item_id: &str, limit: u32) -> Result<Vec<Item>, SourceError> {
        let tweets = self
            .replies(item_id, limit)
            .await
            .map_err(crate::gateway_bridge::source_error)?;
        Ok(crate::gateway_bridge::items(tweets))
    }

    async fn retweeters_of(&self, item_id: &str, limit: u32) -> Result<Vec<UserRef>, SourceError> {
        let users = self
            .retweeters(item_id, limit)
            .await
            .map_err(crate::gateway_bridge::source_error)?;
        Ok(users
            .into_iter()
            .filter_map(crate::gateway_bridge::user_ref)
            .collect())
    }

    async fn timeline_of(&self, user_id: &str, limit: u32) -> Result<Vec<Item>, SourceError> {
        let tweets = self
            .timeline(user_id, limit)
            .await
            .map_err(crate::gateway_bridge::source_error)?;
        Ok(crate::gateway_bridge::items(tweets))
    }

    async fn details(&self, item_id: &str) -> Result<Option<Item>, SourceError> {
        let tweet = self
            .tweet(item_id)
            .await
            .map_err(crate::gateway_bridge::source_error)?;
        Ok(tweet.and_then(crate::gateway_bridge::item))
    }
}

// ---------------------------------------------------------------------------
// StorageSink
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StorageSink: Send + Sync {
    /// Persist one capture. Idempotent from the caller's side; dedup keeps
    /// known ids from reaching it.
    async fn store(&self, capture: &Capture) -> Result<()>;

    async fn stats(&self) -> Result<SinkStats>;
}

#[async_trait]
impl StorageSink for ripple_store::PgItemSink {
    async fn store(&self, capture: &Capture) -> Result<()> {
        ripple_store::PgItemSink::store(self, capture).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<SinkStats> {
        Ok(ripple_store::PgItemSink::stats(self).await?)
    }
}

// ---------------------------------------------------------------------------
// JobSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait JobSource: Send + Sync {
    /// Version marker; a later value means `load` may return new jobs.
    async fn last_modified(&self) -> Result<Option<DateTime<Utc>>>;

    async fn load(&self) -> Result<Vec<JobSpec>>;
}
