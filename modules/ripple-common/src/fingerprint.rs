use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::job::Job;
use crate::query::resolved_language;

/// Deterministic key for one resumable query. The sole join key between a
/// running job and its checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `sha256(query + ":" + json(sorted params))`, params being label,
/// strategy, resolved language and the date window.
pub fn fingerprint(query: &str, job: &Job) -> Fingerprint {
    let mut params: BTreeMap<&str, Value> = BTreeMap::new();
    params.insert("label", job.label.clone().map_or(Value::Null, Value::String));
    params.insert("strategy", Value::String(job.strategy.as_str().to_string()));
    params.insert("language", resolved_language(job).map_or(Value::Null, Value::String));
    params.insert(
        "dates",
        Value::String(format!("{}_to_{}", job.window.since(), job.window.until())),
    );

    // BTreeMap serialises in key order.
    let canonical = serde_json::to_string(&params).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update(b":");
    hasher.update(canonical.as_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobSpec;
    use crate::query::build_query;
    use chrono::{Duration, TimeZone, Utc};

    fn job(json: &str, hours_later: i64) -> Job {
        let spec: JobSpec = serde_json::from_str(json).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 8, 0, 0).unwrap() + Duration::hours(hours_later);
        Job::from_spec(&spec, now).unwrap()
    }

    fn fp(j: &Job) -> Fingerprint {
        fingerprint(&build_query(j), j)
    }

    #[test]
    fn same_query_same_fingerprint() {
        let a = job(r##"{"label": "#abc", "weight": 1}"##, 0);
        let b = job(r##"{"label": "#abc", "weight": 9, "is_new": true}"##, 3);
        assert_eq!(fp(&a), fp(&b));
        assert_eq!(fp(&a).as_str().len(), 64);
    }

    #[test]
    fn language_and_window_change_fingerprint() {
        let base = job(r##"{"label": "#abc"}"##, 0);
        assert_ne!(fp(&base), fp(&base.with_language("ja")));
        assert_ne!(fp(&base), fp(&job(r##"{"label": "#abc"}"##, 24)));
    }

    #[test]
    fn filters_change_fingerprint_through_query() {
        let a = job(r##"{"label": "#abc"}"##, 0);
        let b = job(r##"{"label": "#abc", "filters": {"min_likes": 5}}"##, 0);
        assert_ne!(fp(&a), fp(&b));
    }
}
