//! In-process stand-ins for the container runtime and git.

use async_trait::async_trait;
use chrono::Utc;
use drydock_core::executor::*;
use drydock_core::{Error, ResourceId, Result};
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::git::{GitError, SourceControl};

/// What a fake container does, keyed by image.
#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    Exit { lines: Vec<String>, code: i32 },
    LaunchFailure,
    Panic,
    Hang,
}

impl Behavior {
    pub(crate) fn exit(lines: &[&str], code: i32) -> Self {
        Behavior::Exit {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            code,
        }
    }
}

/// One container lifetime as seen by the executor.
#[derive(Debug, Clone)]
pub(crate) struct Span {
    pub image: String,
    pub started: Instant,
    pub finished: Instant,
}

/// Executor that runs nothing. Images without a behavior echo their command
/// and exit 0.
#[derive(Default)]
pub(crate) struct FakeExecutor {
    behaviors: HashMap<String, Behavior>,
    active: Mutex<HashMap<ResourceId, (String, Instant)>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    pub(crate) specs: Mutex<Vec<ContainerSpec>>,
    pub(crate) spans: Mutex<Vec<Span>>,
    pub(crate) cancelled: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, image: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(image.to_string(), behavior);
        self
    }

    pub(crate) fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub(crate) fn images_run(&self) -> Vec<String> {
        self.spans.lock().iter().map(|s| s.image.clone()).collect()
    }

    fn behavior(&self, image: &str) -> Behavior {
        self.behaviors
            .get(image)
            .cloned()
            .unwrap_or_else(|| Behavior::exit(&["hi"], 0))
    }

    fn image_of(&self, handle: &ContainerHandle) -> Result<String> {
        self.active
            .lock()
            .get(&handle.id)
            .map(|(image, _)| image.clone())
            .ok_or_else(|| Error::NotFound(handle.executor_id.clone()))
    }

    fn finish(&self, handle: &ContainerHandle) {
        if let Some((image, started)) = self.active.lock().remove(&handle.id) {
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.spans.lock().push(Span {
                image,
                started,
                finished: Instant::now(),
            });
        }
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn spawn(&self, spec: ContainerSpec) -> Result<ContainerHandle> {
        match self.behavior(&spec.image) {
            Behavior::LaunchFailure => {
                return Err(Error::ExecutionFailed(format!(
                    "Unable to find image '{}'",
                    spec.image
                )));
            }
            Behavior::Panic => panic!("runtime exploded"),
            Behavior::Exit { .. } | Behavior::Hang => {}
        }

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.active
            .lock()
            .insert(spec.id, (spec.image.clone(), Instant::now()));
        let handle = ContainerHandle {
            id: spec.id,
            executor_id: spec.id.container_name(),
            executor_name: self.name().to_string(),
        };
        self.specs.lock().push(spec);
        Ok(handle)
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<BoxStream<'static, LogLine>> {
        match self.behavior(&self.image_of(handle)?) {
            Behavior::Exit { lines, .. } => Ok(futures::stream::iter(lines)
                .map(|content| LogLine {
                    timestamp: Utc::now(),
                    stream: LogStream::Stdout,
                    content,
                })
                .boxed()),
            _ => Ok(futures::stream::pending().boxed()),
        }
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<ContainerExit> {
        let code = match self.behavior(&self.image_of(handle)?) {
            Behavior::Exit { code, .. } => code,
            _ => std::future::pending().await,
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.finish(handle);
        Ok(ContainerExit {
            exit_code: code,
            finished_at: Utc::now(),
        })
    }

    async fn cancel(&self, handle: &ContainerHandle) -> Result<()> {
        self.cancelled.lock().push(self.image_of(handle)?);
        self.finish(handle);
        Ok(())
    }
}

/// Source control that writes fixed files instead of cloning.
#[derive(Default)]
pub(crate) struct FakeSource {
    files: Vec<(String, String)>,
    fail: bool,
}

impl FakeSource {
    pub(crate) fn with_config(yaml: &str) -> Self {
        Self {
            files: vec![(".ci-config".to_string(), yaml.to_string())],
            fail: false,
        }
    }

    pub(crate) fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        Self {
            files: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl SourceControl for FakeSource {
    async fn checkout(&self, url: &str, _branch: &str, dir: &Path) -> std::result::Result<(), GitError> {
        if self.fail {
            return Err(GitError::CommandFailed {
                command: "git clone".to_string(),
                stderr: format!("repository '{}' not found", url),
            });
        }
        for (name, body) in &self.files {
            tokio::fs::write(dir.join(name), body).await?;
        }
        Ok(())
    }
}
