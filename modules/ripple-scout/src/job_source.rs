//! JSON job file, re-read whenever its modification time moves forward.
//!
//! Accepts a top-level array of job objects or `{"jobs": [...]}`. Elements
//! that are not job objects are logged and skipped; semantic validation
//! happens later in `load_jobs`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ripple_common::JobSpec;
use serde_json::Value;
use tracing::warn;

use crate::traits::JobSource;

pub struct FileJobSource {
    path: PathBuf,
}

impl FileJobSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl JobSource for FileJobSource {
    async fn last_modified(&self) -> Result<Option<DateTime<Utc>>> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .with_context(|| format!("stat {}", self.path.display()))?;
        Ok(meta.modified().ok().map(DateTime::<Utc>::from))
    }

    async fn load(&self) -> Result<Vec<JobSpec>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("read {}", self.path.display()))?;
        parse_job_file(&raw).with_context(|| format!("parse {}", self.path.display()))
    }
}

pub fn parse_job_file(raw: &str) -> Result<Vec<JobSpec>> {
    let doc: Value = serde_json::from_str(raw)?;
    let elements = match doc {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("jobs") {
            Some(Value::Array(items)) => items,
            _ => bail!("expected a JSON array of jobs or an object with a \"jobs\" array"),
        },
        _ => bail!("expected a JSON array of jobs"),
    };

    let mut specs = Vec::with_capacity(elements.len());
    for (index, element) in elements.into_iter().enumerate() {
        match serde_json::from_value::<JobSpec>(element) {
            Ok(spec) => specs.push(spec),
            Err(e) => warn!(index, error = %e, "Skipping malformed job entry"),
        }
    }
    Ok(specs)
}
