//! Wiring of the scheduling components for a running process.

use drydock_config::{ExecutorKind, SystemConfig};
use drydock_core::executor::Executor;
use drydock_core::{JobKey, JobRecord, RepoName};
use drydock_executor::{DockerApiExecutor, DockerCliExecutor};
use drydock_store::{BuildNumberer, ResultsStore};
use std::sync::Arc;
use tracing::info;

use crate::cleaner::Cleaner;
use crate::git::SourceControl;
use crate::queue::JobQueue;
use crate::runner::BuildRunner;
use crate::submit::{JobOutcome, JobSubmitter};
use crate::SchedulerResult;

/// Shared handles to the results store, numbering, cleanup and job queue.
/// Cheap to clone.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<ResultsStore>,
    pub numberer: Arc<BuildNumberer>,
    pub cleaner: Cleaner,
    pub queue: JobQueue,
    pub submitter: Arc<JobSubmitter>,
}

impl Services {
    /// Build the components and spawn the worker and cleaner tasks.
    /// Must be called inside a tokio runtime.
    pub fn start(
        config: &SystemConfig,
        executor: Arc<dyn Executor>,
        source: Arc<dyn SourceControl>,
    ) -> Self {
        Self::start_with_cleaner(config, executor, source, Cleaner::spawn())
    }

    pub fn start_with_cleaner(
        config: &SystemConfig,
        executor: Arc<dyn Executor>,
        source: Arc<dyn SourceControl>,
        cleaner: Cleaner,
    ) -> Self {
        info!(
            results_root = %config.results_root.display(),
            executor = executor.name(),
            timeout_secs = config.build_timeout.map(|t| t.as_secs()),
            "Starting scheduler"
        );

        let store = Arc::new(ResultsStore::new(&config.results_root));
        let numberer = Arc::new(BuildNumberer::new(store.clone()));

        let runner = BuildRunner::new(executor, store.clone())
            .with_env(config.env.clone())
            .with_timeout(config.build_timeout);
        let (queue, worker) = JobQueue::new(runner);
        tokio::spawn(worker.run());

        let submitter = Arc::new(JobSubmitter::new(queue.clone(), cleaner.clone(), source));

        Self {
            store,
            numberer,
            cleaner,
            queue,
            submitter,
        }
    }

    /// Assign the next job key of a repository.
    pub async fn next_job(&self, repo: &RepoName) -> SchedulerResult<JobKey> {
        let number = self.numberer.next_build(repo).await?;
        Ok(JobKey::new(repo.clone(), number)?)
    }

    /// Run a job to completion. See [`JobSubmitter::run_job`].
    pub async fn run_job(&self, job: &JobKey, url: &str, branch: &str) -> SchedulerResult<JobOutcome> {
        self.submitter.run_job(job, url, branch).await
    }

    /// Results of a job, partial while it runs.
    pub async fn read_results(&self, job: &JobKey) -> SchedulerResult<Option<JobRecord>> {
        Ok(self.store.read(job).await?)
    }
}

/// Construct the configured container backend.
pub fn build_executor(kind: ExecutorKind) -> SchedulerResult<Arc<dyn Executor>> {
    let executor: Arc<dyn Executor> = match kind {
        ExecutorKind::DockerCli => Arc::new(DockerCliExecutor::new()),
        ExecutorKind::DockerApi => Arc::new(DockerApiExecutor::new()?),
    };
    Ok(executor)
}
