//! Scheduler error types.

use thiserror::Error;

use crate::git::GitError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("git: {0}")]
    Git(#[from] GitError),

    #[error("configuration: {0}")]
    Config(#[from] drydock_config::ConfigError),

    #[error(transparent)]
    Execution(#[from] drydock_core::Error),

    #[error("results store: {0}")]
    Store(#[from] drydock_store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job queue is closed")]
    QueueClosed,
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
