//! Outbound integrations.

pub mod github;

pub use github::{Commit, CommitState, GitHubStatusClient, StatusReporter};
