//! Engagement and relevance scoring used by network expansion.

use std::collections::HashMap;

use crate::types::{Item, UserRef};

/// Minimum follower count a user must have to be expanded at `depth`.
pub fn follower_floor(depth: u32) -> u64 {
    match depth {
        0 => 100,
        1 => 500,
        2 => 1_000,
        3 => 5_000,
        _ => 50_000,
    }
}

/// `likes + 3*retweets + 2*replies + 2.5*quotes + 0.001*views`, x1.5 when
/// the author is verified.
pub fn engagement_score(item: &Item) -> f64 {
    let e = &item.engagement;
    let mut score = e.likes as f64
        + e.retweets as f64 * 3.0
        + e.replies as f64 * 2.0
        + e.quotes as f64 * 2.5
        + e.views.unwrap_or(0) as f64 * 0.001;
    if item.author.verified || item.author.blue_verified {
        score *= 1.5;
    }
    score
}

/// Sum engagement per author and return the `top_n` authors, highest first.
pub fn top_contributors(items: &[Item], top_n: usize) -> Vec<(UserRef, f64)> {
    let mut totals: HashMap<&str, (&UserRef, f64)> = HashMap::new();
    for item in items {
        let entry = totals
            .entry(item.author.id.as_str())
            .or_insert((&item.author, 0.0));
        entry.1 += engagement_score(item);
    }

    let mut ranked: Vec<(UserRef, f64)> = totals
        .into_values()
        .map(|(user, score)| (user.clone(), score))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
    ranked.truncate(top_n);
    ranked
}

/// 0-100 composite: log10(followers)*10 (max 30), verified +20, label in
/// bio +15, keyword in bio +15, follower/following ratio*2 (max 20).
pub fn relevance_score(user: &UserRef, label: Option<&str>, keyword: Option<&str>) -> f64 {
    let mut score = 0.0;

    if user.followers > 0 {
        score += ((user.followers as f64).log10() * 10.0).min(30.0);
    }

    if user.verified || user.blue_verified {
        score += 20.0;
    }

    let bio = user.bio.as_deref().unwrap_or_default().to_lowercase();
    if !bio.is_empty() {
        if let Some(label) = label.map(|l| l.trim_start_matches('#').to_lowercase()) {
            if !label.is_empty() && bio.contains(&label) {
                score += 15.0;
            }
        }
        if let Some(keyword) = keyword.map(str::to_lowercase) {
            if !keyword.is_empty() && bio.contains(&keyword) {
                score += 15.0;
            }
        }
    }

    if user.followers > 0 && user.following > 0 {
        let ratio = user.followers as f64 / user.following.max(1) as f64;
        score += (ratio * 2.0).min(20.0);
    }

    score.min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Engagement;
    use chrono::Utc;

    fn user(id: &str, followers: u64, following: u64) -> UserRef {
        UserRef {
            id: id.into(),
            username: id.into(),
            followers,
            following,
            ..Default::default()
        }
    }

    fn item(author: UserRef, likes: u64, retweets: u64) -> Item {
        Item {
            id: format!("{}-{likes}-{retweets}", author.id),
            author,
            text: String::new(),
            created_at: Utc::now(),
            engagement: Engagement {
                likes,
                retweets,
                replies: 2,
                quotes: 2,
                views: Some(1000),
            },
            hashtags: vec![],
            conversation_id: None,
            in_reply_to: None,
            lang: None,
        }
    }

    #[test]
    fn engagement_formula() {
        let plain = item(user("a", 0, 0), 10, 1);
        // 10 + 3 + 4 + 5 + 1
        assert!((engagement_score(&plain) - 23.0).abs() < 1e-9);

        let mut verified = plain.clone();
        verified.author.verified = true;
        assert!((engagement_score(&verified) - 34.5).abs() < 1e-9);
    }

    #[test]
    fn contributors_sum_per_author() {
        let items = vec![
            item(user("a", 0, 0), 10, 0),
            item(user("b", 0, 0), 100, 0),
            item(user("a", 0, 0), 100, 0),
            item(user("c", 0, 0), 0, 0),
        ];
        let top = top_contributors(&items, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0.id, "a");
        assert_eq!(top[1].0.id, "b");
    }

    #[test]
    fn relevance_components() {
        // 10k followers -> 40 capped to 30; ratio 10000/100*2 capped to 20
        let u = user("a", 10_000, 100);
        assert!((relevance_score(&u, None, None) - 50.0).abs() < 1e-9);

        let mut v = u.clone();
        v.verified = true;
        v.bio = Some("Bitcoin miner and mining analyst".into());
        assert!((relevance_score(&v, Some("#bitcoin"), Some("mining")) - 100.0).abs() < 1e-9);

        let nobody = user("z", 0, 0);
        assert_eq!(relevance_score(&nobody, Some("#x"), None), 0.0);
    }

    #[test]
    fn floor_rises_with_depth() {
        assert_eq!(follower_floor(0), 100);
        assert_eq!(follower_floor(1), 500);
        assert_eq!(follower_floor(2), 1_000);
        assert_eq!(follower_floor(3), 5_000);
        assert_eq!(follower_floor(4), 50_000);
        assert_eq!(follower_floor(9), 50_000);
    }
}
