//! Error types shared by the Drydock crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    /// A malformed repository name, job key or similar identifier.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The container backend could not start, follow or stop a build.
    #[error("container execution failed: {0}")]
    ExecutionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
