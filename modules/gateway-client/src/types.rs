use chrono::{DateTime, Utc};
use serde::Deserialize;

// --- Records ---

/// An account record as returned by the gateway.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayUser {
    pub id: Option<String>,
    pub username: Option<String>,
    #[serde(rename = "displayname")]
    pub display_name: Option<String>,
    #[serde(rename = "followersCount")]
    pub followers_count: Option<i64>,
    #[serde(rename = "friendsCount")]
    pub friends_count: Option<i64>,
    pub verified: Option<bool>,
    #[serde(rename = "blue")]
    pub blue_verified: Option<bool>,
    #[serde(rename = "rawDescription")]
    pub description: Option<String>,
}

/// A post record as returned by the gateway. Every field is optional on
/// the wire; callers decide which ones are required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayTweet {
    pub id: Option<String>,
    #[serde(rename = "rawContent")]
    pub raw_content: Option<String>,
    pub text: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub user: Option<GatewayUser>,
    #[serde(rename = "likeCount")]
    pub like_count: Option<i64>,
    #[serde(rename = "retweetCount")]
    pub retweet_count: Option<i64>,
    #[serde(rename = "replyCount")]
    pub reply_count: Option<i64>,
    #[serde(rename = "quoteCount")]
    pub quote_count: Option<i64>,
    #[serde(rename = "viewCount")]
    pub view_count: Option<i64>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(rename = "conversationId")]
    pub conversation_id: Option<String>,
    #[serde(rename = "inReplyToTweetId")]
    pub in_reply_to: Option<String>,
    pub lang: Option<String>,
}

impl GatewayTweet {
    /// Returns whichever text field is populated, preferring `rawContent`.
    pub fn content(&self) -> Option<&str> {
        self.raw_content.as_deref().or(self.text.as_deref())
    }
}

// --- Envelopes ---

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub items: Vec<GatewayTweet>,
    #[serde(rename = "nextCursor", alias = "next_cursor")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}
