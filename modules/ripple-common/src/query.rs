//! Query builder: `Job` to source-query string.
//!
//! Clauses are appended in a fixed order (strategy term, keyword, filters,
//! language, dates) and joined by single spaces. The date clause is always
//! last.

use serde_json::Value;

use crate::job::{Job, Strategy};

/// Filter key to operator, for boolean filters.
const FLAG_FILTERS: &[(&str, &str)] = &[
    // content type
    ("has_media", "filter:media"),
    ("has_video", "filter:videos"),
    ("has_images", "filter:images"),
    ("has_links", "filter:links"),
    ("has_mentions", "filter:mentions"),
    // tweet type
    ("filter_replies", "filter:replies"),
    ("filter_quotes", "filter:quote"),
    ("filter_spaces", "filter:spaces"),
    // user verification
    ("verified_only", "filter:verified"),
    ("blue_verified_only", "filter:blue_verified"),
    // exclusions
    ("exclude_retweets", "-filter:retweets"),
    ("exclude_replies", "-filter:replies"),
    ("exclude_quotes", "-filter:quote"),
];

/// Filter key to operator prefix, for numeric thresholds.
const THRESHOLD_FILTERS: &[(&str, &str)] = &[
    ("min_likes", "min_faves"),
    ("min_retweets", "min_retweets"),
    ("min_replies", "min_replies"),
];

pub fn build_query(job: &Job) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(term) = strategy_term(job) {
        parts.push(term);
    }
    if let Some(keyword) = job.keyword.as_deref().and_then(strip_date_operators) {
        parts.push(format!("(\"{keyword}\" OR {keyword})"));
    }
    parts.extend(filter_clauses(job));
    if let Some(lang) = resolved_language(job) {
        parts.push(format!("lang:{lang}"));
    }
    parts.push(format!(
        "since:{} until:{}",
        job.window.since(),
        job.window.until()
    ));

    parts.join(" ")
}

/// The job's language, else `filters.language`, if it is a 2-letter code
/// other than `all`.
pub fn resolved_language(job: &Job) -> Option<String> {
    let candidate = job.language.clone().or_else(|| {
        job.filters
            .get("language")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_lowercase())
    })?;

    let valid = candidate.len() == 2
        && candidate.chars().all(|c| c.is_ascii_alphabetic())
        && candidate != "all";
    valid.then_some(candidate)
}

fn strategy_term(job: &Job) -> Option<String> {
    let label = job.label.as_deref().and_then(strip_date_operators)?;
    let label = label.as_str();
    let term = match job.strategy {
        Strategy::Hashtag => {
            if job.filters.get("use_variants").and_then(Value::as_bool) == Some(false) {
                label.to_string()
            } else {
                format!("({})", hashtag_variants(label).join(" OR "))
            }
        }
        Strategy::Keyword => format!("(\"{label}\" OR {label})"),
        Strategy::User => format!("from:{}", label.trim_start_matches('@')),
        Strategy::Location => format!("near:{label}"),
        Strategy::Advanced => label.to_string(),
    };
    Some(term)
}

/// `#term`, `term`, `"term"`, plural forms, then the cashtag/hashtag twin.
/// Plurals are added when the label as written is longer than three
/// characters and the term does not already end in `s`.
pub fn hashtag_variants(label: &str) -> Vec<String> {
    let term = label.trim_start_matches(['#', '$']).trim();
    let mut variants = vec![format!("#{term}"), term.to_string(), format!("\"{term}\"")];

    if !term.ends_with('s') && label.chars().count() > 3 {
        variants.push(format!("#{term}s"));
        variants.push(format!("{term}s"));
    }

    if label.starts_with('#') {
        variants.push(format!("${term}"));
    }
    // `$term` already yields `#term` first.

    variants
}

fn filter_clauses(job: &Job) -> Vec<String> {
    let mut clauses = Vec::new();

    for (key, op) in THRESHOLD_FILTERS {
        if let Some(n) = job.filters.get(*key).and_then(as_count) {
            if n > 0 {
                clauses.push(format!("{op}:{n}"));
            }
        }
    }

    for (key, op) in FLAG_FILTERS {
        if job.filters.get(*key).and_then(Value::as_bool) == Some(true) {
            clauses.push((*op).to_string());
        }
    }

    if let Some(url) = filter_str(job, "url_contains") {
        clauses.push(format!("url:{url}"));
    }
    if let Some(user) = filter_str(job, "to_user") {
        clauses.push(format!("to:{}", user.trim_start_matches('@')));
    }
    if let Some(user) = filter_str(job, "mention_user") {
        clauses.push(format!("@{}", user.trim_start_matches('@')));
    }

    clauses
}

fn filter_str(job: &Job, key: &str) -> Option<String> {
    job.filters
        .get(key)
        .and_then(Value::as_str)
        .and_then(strip_date_operators)
}

/// Drops any token carrying a `since:`/`until:` operator so the date range
/// stays the only date clause. `None` when nothing is left.
fn strip_date_operators(text: &str) -> Option<String> {
    let kept: Vec<&str> = text
        .split_whitespace()
        .filter(|token| {
            let lower = token.to_ascii_lowercase();
            !lower.contains("since:") && !lower.contains("until:")
        })
        .collect();
    (!kept.is_empty()).then(|| kept.join(" "))
}

fn as_count(v: &Value) -> Option<u64> {
    v.as_u64()
        .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobSpec;
    use chrono::{TimeZone, Utc};

    fn job(json: &str) -> Job {
        let spec: JobSpec = serde_json::from_str(json).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
        Job::from_spec(&spec, now).unwrap()
    }

    #[test]
    fn hashtag_label_expands_to_variant_group() {
        let q = build_query(&job(
            r##"{"label": "#abc", "start_datetime": "2024-01-01", "end_datetime": "2024-01-31"}"##,
        ));
        assert_eq!(
            q,
            r#"(#abc OR abc OR "abc" OR #abcs OR abcs OR $abc) since:2024-01-01 until:2024-01-31"#
        );
    }

    #[test]
    fn keyword_only_job_has_no_hashtag_group() {
        let q = build_query(&job(r#"{"keyword": "mining"}"#));
        assert!(q.contains(r#""mining""#));
        assert!(q.starts_with(r#"("mining" OR mining)"#));
        assert!(!q.contains('#'));
        assert!(q.ends_with("since:2024-05-16 until:2024-06-15"));
    }

    #[test]
    fn plural_and_cashtag_rules() {
        assert_eq!(hashtag_variants("news"), ["#news", "news", "\"news\""]);
        assert_eq!(hashtag_variants("$eth"), ["#eth", "eth", "\"eth\"", "#eths", "eths"]);
        assert_eq!(hashtag_variants("btc"), ["#btc", "btc", "\"btc\""]);
    }

    #[test]
    fn strategy_terms() {
        assert!(build_query(&job(r#"{"label": "@jack", "strategy": "user"}"#)).starts_with("from:jack "));
        assert!(build_query(&job(r#"{"label": "Lisbon", "strategy": "location"}"#)).starts_with("near:Lisbon "));
        assert!(build_query(&job(r#"{"label": "a OR b", "strategy": "advanced"}"#)).starts_with("a OR b "));
        assert!(build_query(&job(r#"{"label": "solar", "strategy": "keyword"}"#))
            .starts_with(r#"("solar" OR solar) "#));
    }

    #[test]
    fn filters_map_to_operators_in_order() {
        let q = build_query(&job(
            r#"{"label": "x", "strategy": "advanced", "start_datetime": "2024-01-01", "end_datetime": "2024-01-02",
                "filters": {"min_likes": 100, "min_retweets": "5", "has_media": true, "has_links": false,
                            "verified_only": true, "exclude_retweets": true, "to_user": "@bob",
                            "mention_user": "alice", "url_contains": "example.com"}}"#,
        ));
        assert_eq!(
            q,
            "x min_faves:100 min_retweets:5 filter:media filter:verified -filter:retweets \
             url:example.com to:bob @alice since:2024-01-01 until:2024-01-02"
        );
    }

    #[test]
    fn language_rules() {
        let q = build_query(&job(r#"{"label": "x", "strategy": "advanced", "language": "EN"}"#));
        assert!(q.contains(" lang:en since:"));

        let q = build_query(&job(r#"{"label": "x", "strategy": "advanced", "language": "all"}"#));
        assert!(!q.contains("lang:"));

        let q = build_query(&job(r#"{"label": "x", "strategy": "advanced", "language": "eng"}"#));
        assert!(!q.contains("lang:"));

        let q = build_query(&job(
            r#"{"label": "x", "strategy": "advanced", "filters": {"language": "ja"}}"#,
        ));
        assert!(q.contains("lang:ja"));

        let q = build_query(&job(
            r#"{"label": "x", "strategy": "advanced", "language": "es", "filters": {"language": "ja"}}"#,
        ));
        assert!(q.contains("lang:es") && !q.contains("lang:ja"));
    }

    #[test]
    fn variants_can_be_disabled() {
        let q = build_query(&job(r##"{"label": "#abc", "filters": {"use_variants": false}}"##));
        assert!(q.starts_with("#abc since:"));
    }

    #[test]
    fn exactly_one_since_and_until() {
        for j in [
            r##"{"label": "#since"}"##,
            r#"{"keyword": "until", "language": "fr"}"#,
            r#"{"label": "x", "filters": {"min_likes": 3, "exclude_replies": true}}"#,
            r#"{"keyword": "halving since:2020-01-01 until:2030-01-01"}"#,
            r#"{"label": "btc (until:2031-01-01)", "strategy": "advanced"}"#,
            r#"{"label": "x", "filters": {"url_contains": "since:2020-01-01"}}"#,
        ] {
            let q = build_query(&job(j));
            assert_eq!(q.matches("since:").count(), 1, "{q}");
            assert_eq!(q.matches("until:").count(), 1, "{q}");
        }
    }

    #[test]
    fn date_operators_in_terms_are_dropped() {
        let q = build_query(&job(
            r#"{"keyword": "halving SINCE:2020-01-01", "start_datetime": "2024-01-01", "end_datetime": "2024-01-31"}"#,
        ));
        assert_eq!(q, r#"("halving" OR halving) since:2024-01-01 until:2024-01-31"#);
    }
}
