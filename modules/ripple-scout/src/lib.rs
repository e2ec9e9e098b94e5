pub mod collector;
pub mod deps;
pub mod expansion;
pub mod gateway_bridge;
pub mod job_source;
pub mod orchestrator;
pub mod scheduler;
pub mod stats;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use deps::ScoutDeps;
pub use orchestrator::Orchestrator;
pub use scheduler::{Scheduler, SchedulerConfig, WorkQueue};
pub use stats::{ExpansionStats, JobOutcome, JobReport, RunSummary};
