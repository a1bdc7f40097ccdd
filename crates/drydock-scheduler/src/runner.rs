//! Runs one build: the job's script inside one image.

use drydock_core::executor::{ContainerHandle, ContainerSpec, Executor, VolumeMount};
use drydock_core::{Build, ResultRecord, Result};
use drydock_store::ResultsStore;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Where the working directory is mounted inside the container.
pub const MOUNT_PATH: &str = "/citmp";

/// Generated script, shared by every build of a job.
pub const SCRIPT_NAME: &str = "script.sh";

/// Shell profile loaded by non-interactive bash in the container.
const PROFILE: &str = "~/.bashrc";

/// Executes builds and records their results.
pub struct BuildRunner {
    executor: Arc<dyn Executor>,
    store: Arc<ResultsStore>,
    env: HashMap<String, String>,
    timeout: Option<Duration>,
}

impl BuildRunner {
    pub fn new(executor: Arc<dyn Executor>, store: Arc<ResultsStore>) -> Self {
        Self {
            executor,
            store,
            env: HashMap::new(),
            timeout: None,
        }
    }

    /// Extra variables passed to every build.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Bound each build's running time. `None` runs builds to completion.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<ResultsStore> {
        &self.store
    }

    pub fn executor_name(&self) -> &'static str {
        self.executor.name()
    }

    /// Run `build` to completion and persist its record.
    ///
    /// A non-zero exit is a normal, unsuccessful record. Errors mean the
    /// build could not be run at all; see [`BuildRunner::record_failure`].
    pub async fn run(&self, build: &Build) -> Result<ResultRecord> {
        info!(job = %build.job, image = %build.image, "Running build");
        self.store.begin(&build.job, &build.image);
        let started = Instant::now();

        let returncode = self.execute(build).await?;

        let elapsed = started.elapsed();
        let record = self
            .seal(build, |record| record.finish(returncode, elapsed))
            .await;
        info!(
            job = %build.job,
            image = %build.image,
            returncode,
            duration = record.duration,
            "Build finished"
        );
        Ok(record)
    }

    /// Record a build that could not run. A record that was already sealed
    /// is returned unchanged.
    pub async fn record_failure(&self, build: &Build, reason: &str, elapsed: Duration) -> ResultRecord {
        if let Some(record) = self.store.record(&build.job, &build.image) {
            if record.is_finished() {
                return record;
            }
        }
        self.seal(build, |record| {
            record.output.push(format!("Build failed: {}", reason));
            record.finish(-1, elapsed);
        })
        .await
    }

    async fn execute(&self, build: &Build) -> Result<i32> {
        write_script(&build.root, &build.script).await?;

        let handle = self.executor.spawn(self.container_spec(build)).await?;

        let Some(limit) = self.timeout else {
            return self.drive(build, &handle).await;
        };
        match tokio::time::timeout(limit, self.drive(build, &handle)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(job = %build.job, image = %build.image, timeout_secs = limit.as_secs(), "Build timed out");
                if let Err(e) = self.executor.cancel(&handle).await {
                    warn!(container = %handle.executor_id, error = %e, "Failed to cancel container");
                }
                self.store.append_line(
                    &build.job,
                    &build.image,
                    format!("Build timed out after {}s", limit.as_secs()),
                );
                Ok(-1)
            }
        }
    }

    /// Stream output into the record until the container exits.
    async fn drive(&self, build: &Build, handle: &ContainerHandle) -> Result<i32> {
        let mut lines = self.executor.logs(handle).await?;
        while let Some(line) = lines.next().await {
            info!(target: "drydock::build_output", job = %build.job, image = %build.image, "{}", line.content);
            self.store.append_line(&build.job, &build.image, line.content);
        }

        let exit = self.executor.wait(handle).await?;
        Ok(exit.exit_code)
    }

    fn container_spec(&self, build: &Build) -> ContainerSpec {
        let mut env = self.env.clone();
        env.insert("BASH_ENV".to_string(), PROFILE.to_string());

        ContainerSpec {
            id: build.id,
            image: build.image.clone(),
            command: vec![
                "bash".to_string(),
                format!("{}/{}", MOUNT_PATH, SCRIPT_NAME),
            ],
            env,
            volumes: vec![VolumeMount {
                host_path: build.root.clone(),
                mount_path: MOUNT_PATH.to_string(),
                read_only: false,
            }],
        }
    }

    /// Apply `f` to the build's record, then persist the job.
    async fn seal(&self, build: &Build, f: impl FnOnce(&mut ResultRecord)) -> ResultRecord {
        let mut record = self
            .store
            .record(&build.job, &build.image)
            .unwrap_or_else(|| ResultRecord::started(build.job.clone()));
        f(&mut record);
        self.store.put(&build.job, &build.image, record.clone());

        if let Err(e) = self.store.write(&build.job).await {
            error!(job = %build.job, error = %e, "Failed to persist results");
        }
        record
    }
}

/// Body of the generated script: profile and context bootstrap, then the
/// configured lines.
pub fn script_body(lines: &[String]) -> String {
    let bootstrap = [
        format!(". {}", PROFILE),
        "shopt -s expand_aliases".to_string(),
        "echo Copying context".to_string(),
        format!("cp -rf {}/* /root", MOUNT_PATH),
    ];
    let mut body = bootstrap
        .into_iter()
        .chain(lines.iter().cloned())
        .collect::<Vec<_>>()
        .join("\n");
    body.push('\n');
    body
}

/// Write the script into `root` unless an earlier build of the job did.
async fn write_script(root: &Path, lines: &[String]) -> Result<()> {
    let path = root.join(SCRIPT_NAME);
    if tokio::fs::try_exists(&path).await? {
        return Ok(());
    }
    tokio::fs::write(&path, script_body(lines)).await?;
    Ok(())
}
