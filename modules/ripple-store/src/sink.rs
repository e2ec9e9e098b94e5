// Postgres sink for captured items. Stores the full item as JSONB alongside
// the job context it was collected under.

use chrono::{DateTime, Utc};
use ripple_common::{Capture, SinkStats};
use sqlx::PgPool;

use crate::error::Result;

#[derive(Clone)]
pub struct PgItemSink {
    pool: PgPool,
}

impl PgItemSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a capture. Returns false when the item id was already stored.
    pub async fn store(&self, capture: &Capture) -> Result<bool> {
        let payload = serde_json::to_value(&capture.item)?;
        let result = sqlx::query(
            r#"
            INSERT INTO captured_items
                (item_id, job_label, job_keyword, method, depth,
                 author_id, author_username, payload, posted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (item_id) DO NOTHING
            "#,
        )
        .bind(&capture.item.id)
        .bind(&capture.job_label)
        .bind(&capture.job_keyword)
        .bind(capture.method.as_str())
        .bind(capture.depth as i32)
        .bind(&capture.item.author.id)
        .bind(&capture.item.author.username)
        .bind(payload)
        .bind(capture.item.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn stats(&self) -> Result<SinkStats> {
        let (total, earliest, latest): (i64, Option<DateTime<Utc>>, Option<DateTime<Utc>>) =
            sqlx::query_as(
                "SELECT COUNT(*), MIN(posted_at), MAX(posted_at) FROM captured_items",
            )
            .fetch_one(&self.pool)
            .await?;

        let by_label: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT COALESCE(job_label, job_keyword, '') AS label, COUNT(*) AS n
            FROM captured_items
            GROUP BY 1
            ORDER BY n DESC
            LIMIT 10
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(SinkStats {
            total: total as u64,
            by_label: by_label
                .into_iter()
                .map(|(label, n)| (label, n as u64))
                .collect(),
            earliest,
            latest,
        })
    }
}
