//! The single worker draining the job queue.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use drydock_core::{Build, ResultRecord};

use crate::queue::BuildGroup;
use crate::runner::BuildRunner;

/// Runs queued builds one at a time, group by group.
pub struct Worker {
    rx: mpsc::UnboundedReceiver<BuildGroup>,
    runner: BuildRunner,
    depth: Arc<AtomicUsize>,
}

impl Worker {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<BuildGroup>,
        runner: BuildRunner,
        depth: Arc<AtomicUsize>,
    ) -> Self {
        Self { rx, runner, depth }
    }

    /// Run the worker loop until every [`JobQueue`](crate::JobQueue) handle
    /// is dropped.
    pub async fn run(mut self) {
        info!(executor = self.runner.executor_name(), "Starting worker");

        while let Some(group) = self.rx.recv().await {
            self.drain(group).await;
        }

        info!("Job queue closed, worker stopping");
    }

    async fn drain(&self, mut group: BuildGroup) {
        info!(job = %group.job, builds = group.pending.len(), "Starting job");
        let mut done = Vec::with_capacity(group.pending.len());

        while let Some(mut build) = group.pending.pop_front() {
            build.result = Some(self.execute(&build).await);
            done.push(build);
        }

        let succeeded = done.iter().filter(|b| b.succeeded()).count();
        info!(job = %group.job, builds = done.len(), succeeded, "Job drained");
        drop(group.workdir.take());
        self.depth.fetch_sub(1, Ordering::SeqCst);
        if group.completion.send(done).is_err() {
            warn!(job = %group.job, "Submitter went away before the job finished");
        }
    }

    /// Run one build. Whatever happens, the build ends with a sealed record.
    async fn execute(&self, build: &Build) -> ResultRecord {
        let started = Instant::now();
        let reason = match AssertUnwindSafe(self.runner.run(build)).catch_unwind().await {
            Ok(Ok(record)) => return record,
            Ok(Err(e)) => {
                error!(job = %build.job, image = %build.image, error = %e, "Build could not run");
                e.to_string()
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(job = %build.job, image = %build.image, panic = %reason, "Build panicked");
                reason
            }
        };
        self.runner
            .record_failure(build, &reason, started.elapsed())
            .await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobQueue;
    use crate::testing::{Behavior, FakeExecutor};
    use drydock_core::JobKey;
    use drydock_store::ResultsStore;
    use tempfile::TempDir;

    struct Fixture {
        _results: TempDir,
        work: TempDir,
        store: Arc<ResultsStore>,
        executor: Arc<FakeExecutor>,
        queue: JobQueue,
    }

    fn start(executor: FakeExecutor) -> Fixture {
        let results = TempDir::new().unwrap();
        let store = Arc::new(ResultsStore::new(results.path()));
        let executor = Arc::new(executor);
        let (queue, worker) = JobQueue::new(BuildRunner::new(executor.clone(), store.clone()));
        tokio::spawn(worker.run());
        Fixture {
            _results: results,
            work: TempDir::new().unwrap(),
            store,
            executor,
            queue,
        }
    }

    impl Fixture {
        fn builds(&self, job: &str, images: &[&str]) -> (JobKey, Vec<Build>) {
            let key: JobKey = job.parse().unwrap();
            let builds = images
                .iter()
                .map(|image| {
                    Build::new(
                        key.clone(),
                        *image,
                        vec!["make test".to_string()],
                        self.work.path().to_path_buf(),
                    )
                })
                .collect();
            (key, builds)
        }
    }

    #[tokio::test]
    async fn test_builds_run_in_order_without_overlap() {
        let fx = start(FakeExecutor::new());
        let (key, builds) = fx.builds("acme/widgets/1", &["b1", "b2", "b3"]);

        let done = fx.queue.submit(key, builds).unwrap().wait().await.unwrap();

        let images: Vec<&str> = done.iter().map(|b| b.image.as_str()).collect();
        assert_eq!(images, vec!["b1", "b2", "b3"]);
        assert!(done.iter().all(|b| b.succeeded()));

        let spans = fx.executor.spans.lock().clone();
        assert_eq!(spans.len(), 3);
        for pair in spans.windows(2) {
            assert!(pair[0].finished <= pair[1].started);
            assert!(pair[0].started < pair[1].started);
        }

        let started: Vec<_> = done
            .iter()
            .map(|b| b.result.as_ref().unwrap().started_at.unwrap())
            .collect();
        assert!(started.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_groups_never_interleave() {
        let fx = start(FakeExecutor::new());
        let (a, a_builds) = fx.builds("acme/widgets/1", &["a1", "a2"]);
        let (b, b_builds) = fx.builds("acme/gadgets/1", &["b1", "b2"]);

        let first = fx.queue.submit(a, a_builds).unwrap();
        let second = fx.queue.submit(b, b_builds).unwrap();
        let (first, second) = tokio::join!(first.wait(), second.wait());
        first.unwrap();
        second.unwrap();

        assert_eq!(fx.executor.images_run(), vec!["a1", "a2", "b1", "b2"]);
        assert_eq!(fx.executor.max_running(), 1);
        assert_eq!(fx.queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_submitters_run_one_build_at_a_time() {
        let fx = start(FakeExecutor::new());
        let mut waits = Vec::new();
        for n in 1..=4 {
            let (key, builds) = fx.builds(&format!("acme/widgets/{}", n), &["x", "y"]);
            let queue = fx.queue.clone();
            waits.push(tokio::spawn(async move {
                queue.submit(key, builds).unwrap().wait().await.unwrap()
            }));
        }
        for wait in waits {
            assert_eq!(wait.await.unwrap().len(), 2);
        }
        assert_eq!(fx.executor.max_running(), 1);
        assert_eq!(fx.executor.spans.lock().len(), 8);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_siblings() {
        let fx = start(
            FakeExecutor::new()
                .with("missing", Behavior::LaunchFailure)
                .with("explodes", Behavior::Panic)
                .with("red", Behavior::exit(&["FAILED"], 1)),
        );
        let (key, builds) = fx.builds("acme/widgets/7", &["missing", "explodes", "red", "green"]);

        let done = fx.queue.submit(key.clone(), builds).unwrap().wait().await.unwrap();

        let codes: Vec<Option<i32>> = done
            .iter()
            .map(|b| b.result.as_ref().unwrap().returncode)
            .collect();
        assert_eq!(codes, vec![Some(-1), Some(-1), Some(1), Some(0)]);

        let explodes = done[1].result.as_ref().unwrap();
        assert_eq!(explodes.output[0], "Build failed: runtime exploded");

        let persisted = fx.store.read(&key).await.unwrap().unwrap();
        assert_eq!(persisted.len(), 4);
        assert!(persisted.values().all(|r| r.is_finished()));

        // The worker survives for later jobs.
        let (next, builds) = fx.builds("acme/widgets/8", &["green"]);
        let done = fx.queue.submit(next, builds).unwrap().wait().await.unwrap();
        assert!(done[0].succeeded());
    }

    #[tokio::test]
    async fn test_empty_group_completes_immediately() {
        let fx = start(FakeExecutor::new());
        let key: JobKey = "acme/widgets/1".parse().unwrap();

        let done = fx.queue.submit(key, Vec::new()).unwrap().wait().await.unwrap();

        assert!(done.is_empty());
        assert!(fx.executor.spans.lock().is_empty());
    }

    #[tokio::test]
    async fn test_submit_after_worker_stops() {
        let results = TempDir::new().unwrap();
        let store = Arc::new(ResultsStore::new(results.path()));
        let (queue, worker) = JobQueue::new(BuildRunner::new(Arc::new(FakeExecutor::new()), store));
        drop(worker);

        let key: JobKey = "acme/widgets/1".parse().unwrap();
        assert!(matches!(
            queue.submit(key, Vec::new()),
            Err(crate::SchedulerError::QueueClosed)
        ));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "panic");
    }
}
