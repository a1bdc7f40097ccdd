//! Sequential build numbers per repository.

use drydock_core::RepoName;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::{ResultsStore, StoreResult};

/// Hands out build numbers: one past the highest persisted job, or the
/// count of persisted jobs plus one if that is larger.
///
/// Assignment is serialized per repository and remembers the last number
/// handed out, so two submissions racing before either job is persisted
/// still get distinct numbers. Numbers that were handed out but never
/// persisted leave gaps on disk; counting past the highest persisted number
/// keeps a later process from reusing a job above such a gap. Other
/// processes sharing the results root are not coordinated with.
pub struct BuildNumberer {
    store: Arc<ResultsStore>,
    last_assigned: Mutex<HashMap<RepoName, Arc<tokio::sync::Mutex<u64>>>>,
}

impl BuildNumberer {
    pub fn new(store: Arc<ResultsStore>) -> Self {
        Self {
            store,
            last_assigned: Mutex::new(HashMap::new()),
        }
    }

    pub async fn next_build(&self, repo: &RepoName) -> StoreResult<u64> {
        let slot = self
            .last_assigned
            .lock()
            .entry(repo.clone())
            .or_default()
            .clone();
        let mut last = slot.lock().await;

        let numbers = self.store.job_numbers(repo).await?;
        let persisted = numbers.len() as u64;
        let highest = numbers.last().copied().unwrap_or(0);
        let next = persisted.max(highest).max(*last) + 1;
        *last = next;

        info!(repo = %repo, persisted, highest, next, "Assigned build number");
        Ok(next)
    }
}
