pub mod error;
pub mod types;

pub use error::{GatewayError, Result};
pub use types::{GatewayTweet, GatewayUser, ListResponse, SearchResponse};

use serde::de::DeserializeOwned;

/// Client for the content-source gateway. The gateway owns account rotation
/// and per-account rate limits; this client only speaks REST.
#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// One page of search results. Pass the previous page's `next_cursor`
    /// to continue.
    pub async fn search(&self, query: &str, cursor: Option<&str>) -> Result<SearchResponse> {
        let mut params = vec![("q", query.to_string())];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }
        tracing::debug!(query, cursor, "Gateway search");

        let page: SearchResponse = self
            .get("/search", &params)
            .await?
            .ok_or_else(|| GatewayError::Api {
                status: 404,
                message: "search endpoint not found".to_string(),
            })?;
        Ok(page)
    }

    pub async fn replies(&self, tweet_id: &str, limit: u32) -> Result<Vec<GatewayTweet>> {
        let path = format!("/items/{tweet_id}/replies");
        self.list(&path, limit).await
    }

    pub async fn retweeters(&self, tweet_id: &str, limit: u32) -> Result<Vec<GatewayUser>> {
        let path = format!("/items/{tweet_id}/retweeters");
        self.list(&path, limit).await
    }

    pub async fn timeline(&self, user_id: &str, limit: u32) -> Result<Vec<GatewayTweet>> {
        let path = format!("/users/{user_id}/timeline");
        self.list(&path, limit).await
    }

    /// Fetch one post. `None` when the gateway reports it missing.
    pub async fn tweet(&self, tweet_id: &str) -> Result<Option<GatewayTweet>> {
        self.get(&format!("/items/{tweet_id}"), &[]).await
    }

    async fn list<T: DeserializeOwned>(&self, path: &str, limit: u32) -> Result<Vec<T>> {
        let resp: Option<ListResponse<T>> =
            self.get(path, &[("limit", limit.to_string())]).await?;
        Ok(resp.map(|r| r.items).unwrap_or_default())
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.get(&url).query(params);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify(status.as_u16(), body));
        }

        let bytes = resp.bytes().await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

fn classify(status: u16, message: String) -> GatewayError {
    match status {
        429 | 503 => GatewayError::RateLimited { status, message },
        _ => GatewayError::Api { status, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_statuses_are_classified() {
        assert!(classify(429, "slow down".into()).is_rate_limited());
        assert!(classify(503, "no accounts".into()).is_rate_limited());
        assert!(!classify(500, "boom".into()).is_rate_limited());
        assert!(matches!(classify(401, String::new()), GatewayError::Api { status: 401, .. }));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = GatewayClient::new("http://localhost:8080/", None);
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn search_page_deserializes() {
        let page: SearchResponse = serde_json::from_str(
            r#"{
                "items": [{
                    "id": "1790",
                    "rawContent": "gm #btc",
                    "date": "2024-05-01T10:00:00Z",
                    "user": {"id": "42", "username": "satoshi", "followersCount": 1200,
                             "friendsCount": 10, "blue": true, "rawDescription": "btc maxi"},
                    "likeCount": 5, "retweetCount": 1, "viewCount": 900,
                    "hashtags": ["btc"], "conversationId": "1790"
                }],
                "nextCursor": "DAABCgAB"
            }"#,
        )
        .unwrap();

        assert_eq!(page.next_cursor.as_deref(), Some("DAABCgAB"));
        let tweet = &page.items[0];
        assert_eq!(tweet.content(), Some("gm #btc"));
        let user = tweet.user.as_ref().unwrap();
        assert_eq!(user.followers_count, Some(1200));
        assert_eq!(user.blue_verified, Some(true));
        assert_eq!(tweet.quote_count, None);
    }

    #[test]
    fn last_page_has_no_cursor() {
        let page: SearchResponse = serde_json::from_str(r#"{"items": []}"#).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
    }
}
