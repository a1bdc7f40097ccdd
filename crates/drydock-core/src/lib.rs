//! Core domain types and traits for Drydock CI.
//!
//! This crate contains:
//! - Resource identifiers and the core error type
//! - Job keys, builds and their result records
//! - The executor trait and container job types

pub mod error;
pub mod executor;
pub mod id;
pub mod job;

pub use error::{Error, Result};
pub use id::ResourceId;
pub use job::{Build, JobKey, JobRecord, RepoName, ResultRecord};
