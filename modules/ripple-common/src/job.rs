//! Job model: the raw, permissive shape read from a job source and the
//! validated `Job` that the scheduler queues.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::RippleError;

/// Window used when a job omits its start date.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;
pub const DEFAULT_MAX_DEPTH: u32 = 2;

// --- Strategy ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Hashtag,
    Keyword,
    User,
    Location,
    Advanced,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hashtag => "hashtag",
            Self::Keyword => "keyword",
            Self::User => "user",
            Self::Location => "location",
            Self::Advanced => "advanced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hashtag" => Some(Self::Hashtag),
            "keyword" => Some(Self::Keyword),
            "user" => Some(Self::User),
            "location" => Some(Self::Location),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Date window ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    /// End defaults to `now`, start defaults to `end - 30d`.
    pub fn resolve(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self, RippleError> {
        let end = end.unwrap_or(now);
        let start = start.unwrap_or(end - Duration::days(DEFAULT_WINDOW_DAYS));
        if start > end {
            return Err(RippleError::Validation(format!(
                "date window starts after it ends ({start} > {end})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn since(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn until(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

// --- Network expansion policy ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkExpansion {
    pub enabled: bool,
    pub max_depth: u32,
}

impl Default for NetworkExpansion {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

// --- Raw job spec ---

/// Job parameters as written in a job file. Every field is optional; the
/// flat legacy format uses `start_datetime`/`end_datetime`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default, alias = "start_datetime")]
    pub post_start_datetime: Option<String>,
    #[serde(default, alias = "end_datetime")]
    pub post_end_datetime: Option<String>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default, alias = "filters")]
    pub additional_filters: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub enable_network_expansion: Option<bool>,
    #[serde(default)]
    pub max_network_depth: Option<u32>,
}

/// One element of a job file, in either the nested
/// `{"id", "weight", "is_new", "params": {...}}` shape or the flat one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawJobSpec")]
pub struct JobSpec {
    pub id: Option<String>,
    pub weight: Option<f64>,
    pub is_new: bool,
    pub params: JobParams,
}

#[derive(Deserialize)]
struct RawJobSpec {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    is_new: bool,
    #[serde(default)]
    params: Option<JobParams>,
    #[serde(flatten)]
    flat: JobParams,
}

impl From<RawJobSpec> for JobSpec {
    fn from(raw: RawJobSpec) -> Self {
        let id = raw.id.map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        });
        Self {
            id,
            weight: raw.weight,
            is_new: raw.is_new,
            params: raw.params.unwrap_or(raw.flat),
        }
    }
}

// --- Identity ---

/// Stable per-job identity derived from label, keyword, and the declared
/// date window. Survives reloads even when filters change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobIdentity(String);

impl JobIdentity {
    pub fn from_params(params: &JobParams) -> Self {
        let part = |v: &Option<String>| v.as_deref().map(str::trim).unwrap_or("").to_string();
        let raw = [
            part(&params.label),
            part(&params.keyword),
            part(&params.post_start_datetime),
            part(&params.post_end_datetime),
        ]
        .join("|");
        Self(hex::encode(Sha256::digest(raw.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

// --- Validated job ---

/// A validated search task. Immutable once queued; language fallback works
/// on a transient copy via [`Job::with_language`].
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Option<String>,
    pub label: Option<String>,
    pub keyword: Option<String>,
    pub strategy: Strategy,
    pub window: DateWindow,
    pub weight: f64,
    pub filters: BTreeMap<String, Value>,
    pub language: Option<String>,
    pub expansion: NetworkExpansion,
    pub is_new: bool,
    pub identity: JobIdentity,
}

impl Job {
    pub fn from_spec(spec: &JobSpec, now: DateTime<Utc>) -> Result<Self, RippleError> {
        let p = &spec.params;
        let label = non_empty(&p.label);
        let keyword = non_empty(&p.keyword);
        if label.is_none() && keyword.is_none() {
            return Err(RippleError::Validation(
                "job has neither label nor keyword".to_string(),
            ));
        }

        let mut strategy = match non_empty(&p.strategy) {
            Some(s) => Strategy::parse(&s)
                .ok_or_else(|| RippleError::Validation(format!("unknown strategy '{s}'")))?,
            None => Strategy::default(),
        };
        if strategy == Strategy::Hashtag && label.as_deref().is_some_and(|l| l.starts_with('@')) {
            strategy = Strategy::User;
        }

        let start = parse_optional_datetime(&p.post_start_datetime)?;
        let end = parse_optional_datetime(&p.post_end_datetime)?;
        let window = DateWindow::resolve(start, end, now)?;

        let weight = match spec.weight {
            Some(w) if w.is_finite() && w > 0.0 => w,
            Some(_) => 0.0,
            None => 1.0,
        };

        let language = non_empty(&p.language).map(|l| l.to_ascii_lowercase());

        Ok(Self {
            id: spec.id.clone(),
            label,
            keyword,
            strategy,
            window,
            weight,
            filters: p.additional_filters.clone().unwrap_or_default(),
            language,
            expansion: NetworkExpansion {
                enabled: p.enable_network_expansion.unwrap_or(true),
                max_depth: p.max_network_depth.unwrap_or(DEFAULT_MAX_DEPTH),
            },
            is_new: spec.is_new,
            identity: JobIdentity::from_params(p),
        })
    }

    /// Human-readable name for logs: label, else keyword.
    pub fn name(&self) -> &str {
        self.label
            .as_deref()
            .or(self.keyword.as_deref())
            .unwrap_or_default()
    }

    /// Transient copy with a different language, used for fallback searches.
    pub fn with_language(&self, language: &str) -> Self {
        Self {
            language: Some(language.to_string()),
            ..self.clone()
        }
    }
}

fn non_empty(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_optional_datetime(v: &Option<String>) -> Result<Option<DateTime<Utc>>, RippleError> {
    match non_empty(v) {
        None => Ok(None),
        Some(s) => parse_datetime(&s)
            .map(Some)
            .ok_or_else(|| RippleError::Validation(format!("unparseable datetime '{s}'"))),
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and `YYYY-MM-DD`.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// --- Loading ---

#[derive(Debug, Default)]
pub struct LoadedJobs {
    pub jobs: Vec<Job>,
    pub rejected: usize,
}

/// Validate specs and order them: new jobs first, then the rest, each tier
/// by descending weight. Invalid specs are logged and dropped.
pub fn load_jobs(specs: &[JobSpec], now: DateTime<Utc>) -> LoadedJobs {
    let mut loaded = LoadedJobs::default();
    for (index, spec) in specs.iter().enumerate() {
        match Job::from_spec(spec, now) {
            Ok(job) => loaded.jobs.push(job),
            Err(e) => {
                warn!(index, id = ?spec.id, error = %e, "Rejected job");
                loaded.rejected += 1;
            }
        }
    }
    prioritize(&mut loaded.jobs);
    loaded
}

/// Stable sort: `is_new` tier first, descending weight within a tier.
pub fn prioritize(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| {
        b.is_new
            .cmp(&a.is_new)
            .then_with(|| b.weight.total_cmp(&a.weight))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn spec(json: &str) -> JobSpec {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn nested_format_parses() {
        let s = spec(
            r##"{"id": 7, "weight": 2.5, "is_new": true,
                "params": {"label": "#btc", "post_start_datetime": "2024-01-01",
                           "post_end_datetime": "2024-01-31 23:59:59", "strategy": "hashtag",
                           "additional_filters": {"min_likes": 10}, "max_network_depth": 3}}"##,
        );
        assert_eq!(s.id.as_deref(), Some("7"));
        assert!(s.is_new);

        let job = Job::from_spec(&s, now()).unwrap();
        assert_eq!(job.label.as_deref(), Some("#btc"));
        assert_eq!(job.weight, 2.5);
        assert_eq!(job.window.since(), "2024-01-01");
        assert_eq!(job.window.until(), "2024-01-31");
        assert_eq!(job.expansion.max_depth, 3);
        assert!(job.expansion.enabled);
        assert_eq!(job.filters["min_likes"], 10);
    }

    #[test]
    fn flat_format_parses() {
        let s = spec(
            r#"{"keyword": "mining", "start_datetime": "2024-03-01T00:00:00Z",
                "weight": 0.5, "strategy": "keyword", "enable_network_expansion": false}"#,
        );
        let job = Job::from_spec(&s, now()).unwrap();
        assert_eq!(job.keyword.as_deref(), Some("mining"));
        assert_eq!(job.strategy, Strategy::Keyword);
        assert_eq!(job.window.since(), "2024-03-01");
        assert_eq!(job.window.until(), "2024-06-15");
        assert!(!job.expansion.enabled);
    }

    #[test]
    fn default_window_is_thirty_days_ending_now() {
        let job = Job::from_spec(&spec(r##"{"label": "#abc"}"##), now()).unwrap();
        assert_eq!(job.window.end, now());
        assert_eq!(job.window.start, now() - Duration::days(30));
        assert_eq!(job.weight, 1.0);
    }

    #[test]
    fn job_without_label_or_keyword_is_rejected() {
        let err = Job::from_spec(&spec(r#"{"label": "  ", "weight": 3}"#), now()).unwrap_err();
        assert!(matches!(err, RippleError::Validation(_)));
    }

    #[test]
    fn unknown_strategy_and_bad_dates_are_rejected() {
        assert!(Job::from_spec(&spec(r#"{"label": "x", "strategy": "telepathy"}"#), now()).is_err());
        assert!(Job::from_spec(&spec(r#"{"label": "x", "start_datetime": "soon"}"#), now()).is_err());
        assert!(Job::from_spec(
            &spec(r#"{"label": "x", "start_datetime": "2024-02-01", "end_datetime": "2024-01-01"}"#),
            now()
        )
        .is_err());
    }

    #[test]
    fn at_label_under_hashtag_becomes_user() {
        let job = Job::from_spec(&spec(r#"{"label": "@satoshi"}"#), now()).unwrap();
        assert_eq!(job.strategy, Strategy::User);
    }

    #[test]
    fn negative_weight_clamps_to_zero() {
        let job = Job::from_spec(&spec(r#"{"label": "x", "weight": -4}"#), now()).unwrap();
        assert_eq!(job.weight, 0.0);
    }

    #[test]
    fn load_orders_new_tier_first_then_weight() {
        let specs: Vec<JobSpec> = serde_json::from_str(
            r#"[
                {"label": "old-low", "weight": 1},
                {"label": "new-low", "weight": 1, "is_new": true},
                {"weight": 9},
                {"label": "old-high", "weight": 5},
                {"label": "new-high", "weight": 3, "is_new": true}
            ]"#,
        )
        .unwrap();

        let loaded = load_jobs(&specs, now());
        assert_eq!(loaded.rejected, 1);
        let names: Vec<&str> = loaded.jobs.iter().map(|j| j.name()).collect();
        assert_eq!(names, ["new-high", "new-low", "old-high", "old-low"]);
    }

    #[test]
    fn identity_ignores_filters_but_tracks_window() {
        let a = spec(r##"{"label": "#abc", "start_datetime": "2024-01-01"}"##);
        let b = spec(r##"{"label": "#abc", "start_datetime": "2024-01-01", "filters": {"min_likes": 5}}"##);
        let c = spec(r##"{"label": "#abc", "start_datetime": "2024-01-02"}"##);

        assert_eq!(JobIdentity::from_params(&a.params), JobIdentity::from_params(&b.params));
        assert_ne!(JobIdentity::from_params(&a.params), JobIdentity::from_params(&c.params));
    }

    #[test]
    fn open_window_identity_is_stable_across_loads() {
        let s = spec(r#"{"keyword": "mining"}"#);
        let first = Job::from_spec(&s, now()).unwrap();
        let later = Job::from_spec(&s, now() + Duration::hours(5)).unwrap();
        assert_eq!(first.identity, later.identity);
    }
}
