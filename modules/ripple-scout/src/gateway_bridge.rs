//! Conversion boundary between gateway wire records and typed items.
//!
//! Wire records carry every field as optional. Records without an id (or
//! an item without a timestamp) are dropped here so the rest of the crate
//! never deals with missing fields.

use gateway_client::{GatewayError, GatewayTweet, GatewayUser, SearchResponse};
use ripple_common::{Engagement, Item, SearchPage, SourceError, UserRef};
use tracing::debug;

pub fn source_error(err: GatewayError) -> SourceError {
    match err {
        GatewayError::RateLimited { status, message } => {
            SourceError::Exhausted(format!("{status}: {message}"))
        }
        GatewayError::Network(msg) => SourceError::Transport(msg),
        GatewayError::Api { status, message } => {
            SourceError::Transport(format!("{status}: {message}"))
        }
        GatewayError::Parse(msg) => SourceError::Decode(msg),
    }
}

pub fn search_page(resp: SearchResponse) -> SearchPage {
    SearchPage {
        items: items(resp.items),
        next_cursor: resp.next_cursor.filter(|c| !c.is_empty()),
    }
}

pub fn items(tweets: Vec<GatewayTweet>) -> Vec<Item> {
    tweets.into_iter().filter_map(item).collect()
}

pub fn item(tweet: GatewayTweet) -> Option<Item> {
    let text = tweet.content().unwrap_or_default().to_string();
    let Some(id) = tweet.id.filter(|id| !id.is_empty()) else {
        debug!("Dropping gateway record without id");
        return None;
    };
    let Some(created_at) = tweet.date else {
        debug!(id = %id, "Dropping gateway record without date");
        return None;
    };
    let author = tweet.user.and_then(user_ref).unwrap_or_default();

    Some(Item {
        id,
        author,
        text,
        created_at,
        engagement: Engagement {
            likes: count(tweet.like_count),
            retweets: count(tweet.retweet_count),
            replies: count(tweet.reply_count),
            quotes: count(tweet.quote_count),
            views: tweet.view_count.map(|v| v.max(0) as u64),
        },
        hashtags: tweet.hashtags,
        conversation_id: tweet.conversation_id,
        in_reply_to: tweet.in_reply_to,
        lang: tweet.lang,
    })
}

pub fn user_ref(user: GatewayUser) -> Option<UserRef> {
    let id = user.id.filter(|id| !id.is_empty())?;
    Some(UserRef {
        id,
        username: user.username.unwrap_or_default(),
        display_name: user.display_name,
        followers: count(user.followers_count),
        following: count(user.friends_count),
        verified: user.verified.unwrap_or(false),
        blue_verified: user.blue_verified.unwrap_or(false),
        bio: user.description,
    })
}

fn count(v: Option<i64>) -> u64 {
    v.unwrap_or(0).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn records_without_id_or_date_are_dropped() {
        let ok = GatewayTweet {
            id: Some("1".into()),
            raw_content: Some("hi".into()),
            date: Some(Utc::now()),
            like_count: Some(-3),
            ..Default::default()
        };
        let no_id = GatewayTweet {
            date: Some(Utc::now()),
            ..Default::default()
        };
        let no_date = GatewayTweet {
            id: Some("2".into()),
            ..Default::default()
        };

        let converted = items(vec![ok, no_id, no_date]);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].text, "hi");
        assert_eq!(converted[0].engagement.likes, 0);
        assert_eq!(converted[0].author, UserRef::default());
    }

    #[test]
    fn rate_limit_maps_to_exhaustion() {
        let err = source_error(GatewayError::RateLimited {
            status: 429,
            message: "slow".into(),
        });
        assert!(err.is_retryable());
        assert!(!source_error(GatewayError::Network("reset".into())).is_retryable());
    }

    #[test]
    fn empty_cursor_means_last_page() {
        let page = search_page(SearchResponse {
            items: vec![],
            next_cursor: Some(String::new()),
        });
        assert!(page.next_cursor.is_none());
    }
}
