pub mod config;
pub mod error;
pub mod fingerprint;
pub mod job;
pub mod query;
pub mod scoring;
pub mod types;

pub use config::{Config, ExpansionConfig};
pub use error::{RippleError, SourceError};
pub use fingerprint::{fingerprint, Fingerprint};
pub use job::{load_jobs, DateWindow, Job, JobIdentity, JobParams, JobSpec, LoadedJobs, NetworkExpansion, Strategy};
pub use query::{build_query, resolved_language};
pub use types::*;
