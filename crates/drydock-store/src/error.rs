//! Results store error types.

use drydock_core::JobKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no results held in memory for job {0}")]
    NotResident(JobKey),

    #[error("corrupt record for job {key}: {source}")]
    Corrupt {
        key: JobKey,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
