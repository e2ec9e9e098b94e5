use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Items and users ---

/// An account as seen by the content source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub followers: u64,
    #[serde(default)]
    pub following: u64,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub blue_verified: bool,
    #[serde(default)]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub retweets: u64,
    #[serde(default)]
    pub replies: u64,
    #[serde(default)]
    pub quotes: u64,
    #[serde(default)]
    pub views: Option<u64>,
}

/// One discovered content unit (post or reply).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub author: UserRef,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub engagement: Engagement,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
}

impl Item {
    /// True when the item mentions the label (without `#`/`$`) in its text
    /// or hashtags, or the keyword in its text. Case-insensitive.
    pub fn matches_terms(&self, label: Option<&str>, keyword: Option<&str>) -> bool {
        let text = self.text.to_lowercase();

        if let Some(label) = label.map(|l| l.trim_start_matches(['#', '$']).to_lowercase()) {
            if !label.is_empty() {
                if text.contains(&label) {
                    return true;
                }
                if self
                    .hashtags
                    .iter()
                    .any(|h| h.trim_start_matches('#').eq_ignore_ascii_case(&label))
                {
                    return true;
                }
            }
        }

        match keyword.map(str::to_lowercase) {
            Some(kw) if !kw.is_empty() => text.contains(&kw),
            _ => false,
        }
    }
}

// --- Captures ---

/// How an item reached the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMethod {
    Search,
    ConversationReply,
    RetweeterTimeline,
    InfluencerTimeline,
}

impl CollectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::ConversationReply => "conversation_reply",
            Self::RetweeterTimeline => "retweeter_timeline",
            Self::InfluencerTimeline => "influencer_timeline",
        }
    }
}

impl std::fmt::Display for CollectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An item plus the job context it was collected under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub item: Item,
    pub job_label: Option<String>,
    pub job_keyword: Option<String>,
    pub method: CollectionMethod,
    pub depth: u32,
}

/// One page of search results plus the cursor for the next page.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub items: Vec<Item>,
    pub next_cursor: Option<String>,
}

/// Aggregate counts reported by a storage sink.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SinkStats {
    pub total: u64,
    pub by_label: Vec<(String, u64)>,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

impl std::fmt::Display for SinkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Items stored:   {}", self.total)?;
        if let (Some(earliest), Some(latest)) = (self.earliest, self.latest) {
            writeln!(f, "Posted between: {} .. {}", earliest.date_naive(), latest.date_naive())?;
        }
        if !self.by_label.is_empty() {
            writeln!(f, "By label:")?;
            for (label, count) in &self.by_label {
                writeln!(f, "  {label:<24} {count}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(text: &str, hashtags: &[&str]) -> Item {
        Item {
            id: "1".into(),
            author: UserRef::default(),
            text: text.into(),
            created_at: Utc::now(),
            engagement: Engagement::default(),
            hashtags: hashtags.iter().map(|h| h.to_string()).collect(),
            conversation_id: None,
            in_reply_to: None,
            lang: None,
        }
    }

    #[test]
    fn label_matches_text_or_hashtag() {
        assert!(item("Loving the #Bitcoin rally", &[]).matches_terms(Some("#bitcoin"), None));
        assert!(item("up only", &["BTC"]).matches_terms(Some("#btc"), None));
        assert!(!item("nothing here", &["eth"]).matches_terms(Some("#btc"), None));
    }

    #[test]
    fn keyword_matches_text_only() {
        assert!(item("Gold MINING stocks", &[]).matches_terms(None, Some("mining")));
        assert!(!item("gold stocks", &["mining"]).matches_terms(None, Some("mining")));
        assert!(!item("anything", &[]).matches_terms(None, None));
    }
}
