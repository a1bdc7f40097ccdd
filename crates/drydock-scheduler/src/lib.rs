//! Job scheduling and build execution for Drydock CI.
//!
//! Every job's builds pass through one process-wide queue drained by a
//! single worker, so at most one build runs at a time. Working directories
//! are retired through a background cleaner once their job is done.

pub mod cleaner;
pub mod error;
pub mod git;
pub mod queue;
pub mod runner;
pub mod services;
pub mod submit;
pub mod worker;

#[cfg(test)]
mod testing;

pub use cleaner::{Cleaner, Retirement, WorkingDir};
pub use error::{SchedulerError, SchedulerResult};
pub use git::{GitError, GitService, SourceControl};
pub use queue::{Completion, JobQueue};
pub use runner::BuildRunner;
pub use services::{Services, build_executor};
pub use submit::{JobOutcome, JobSubmitter, SkipReason};
pub use worker::Worker;
