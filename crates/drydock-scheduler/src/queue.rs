//! Process-wide queue of build groups.

use drydock_core::{Build, JobKey};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::cleaner::WorkingDir;
use crate::runner::BuildRunner;
use crate::worker::Worker;
use crate::{SchedulerError, SchedulerResult};

/// A job's builds, drained in order by the worker.
pub(crate) struct BuildGroup {
    pub job: JobKey,
    pub pending: VecDeque<Build>,
    pub completion: oneshot::Sender<Vec<Build>>,
    /// Retired by the worker once the group has drained, not when the
    /// submitter stops waiting.
    pub workdir: Option<WorkingDir>,
}

/// Submission side of the job queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<BuildGroup>,
    depth: Arc<AtomicUsize>,
}

impl JobQueue {
    /// Create the queue and the single worker that drains it. The worker
    /// does nothing until [`Worker::run`] is spawned.
    pub fn new(runner: BuildRunner) -> (Self, Worker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let worker = Worker::new(rx, runner, depth.clone());
        (Self { tx, depth }, worker)
    }

    /// Enqueue a job's builds behind every group already submitted.
    pub fn submit(&self, job: JobKey, builds: Vec<Build>) -> SchedulerResult<Completion> {
        self.enqueue(job, builds, None)
    }

    /// Like [`JobQueue::submit`], handing the builds' working directory to
    /// the group so it outlives a submitter that gives up waiting.
    pub fn submit_in(
        &self,
        job: JobKey,
        builds: Vec<Build>,
        workdir: WorkingDir,
    ) -> SchedulerResult<Completion> {
        self.enqueue(job, builds, Some(workdir))
    }

    fn enqueue(
        &self,
        job: JobKey,
        builds: Vec<Build>,
        workdir: Option<WorkingDir>,
    ) -> SchedulerResult<Completion> {
        let (completion, rx) = oneshot::channel();
        let size = builds.len();
        let group = BuildGroup {
            job: job.clone(),
            pending: builds.into(),
            completion,
            workdir,
        };

        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(group).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(SchedulerError::QueueClosed);
        }
        info!(job = %job, builds = size, queued = self.depth(), "Queued job");
        Ok(Completion { job, rx })
    }

    /// Groups waiting or running.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

/// Released once every build of a submitted group has run.
pub struct Completion {
    job: JobKey,
    rx: oneshot::Receiver<Vec<Build>>,
}

impl Completion {
    pub fn job(&self) -> &JobKey {
        &self.job
    }

    /// Wait for the group, returning its builds with their results.
    pub async fn wait(self) -> SchedulerResult<Vec<Build>> {
        self.rx.await.map_err(|_| SchedulerError::QueueClosed)
    }
}
