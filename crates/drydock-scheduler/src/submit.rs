//! Job submission: checkout, configuration, and queueing.

use derive_more::Display;
use drydock_config::{CI_CONFIG_FILE, ConfigError, parse_ci_config};
use drydock_core::{Build, JobKey};
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cleaner::Cleaner;
use crate::git::SourceControl;
use crate::queue::JobQueue;
use crate::SchedulerResult;

/// Why a job ran no builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SkipReason {
    #[display("no configuration")]
    NoConfig,
    #[display("no image specified")]
    NoImage,
    #[display("no script specified")]
    NoScript,
}

/// Result of a submitted job.
#[derive(Debug)]
pub enum JobOutcome {
    /// Every build ran; each carries its record.
    Completed(Vec<Build>),
    /// The repository asked for no builds. Nothing was queued or persisted.
    Skipped(SkipReason),
}

impl JobOutcome {
    pub fn builds(&self) -> &[Build] {
        match self {
            JobOutcome::Completed(builds) => builds,
            JobOutcome::Skipped(_) => &[],
        }
    }

    /// At least one build passed.
    pub fn is_success(&self) -> bool {
        self.builds().iter().any(Build::succeeded)
    }
}

/// Turns repository references into queued jobs.
pub struct JobSubmitter {
    queue: JobQueue,
    cleaner: Cleaner,
    source: Arc<dyn SourceControl>,
}

impl JobSubmitter {
    pub fn new(queue: JobQueue, cleaner: Cleaner, source: Arc<dyn SourceControl>) -> Self {
        Self {
            queue,
            cleaner,
            source,
        }
    }

    /// Check out `branch` of `url`, run one build per configured image and
    /// wait for all of them.
    ///
    /// Checkout failures are errors and queue nothing. A missing or
    /// incomplete configuration is [`JobOutcome::Skipped`]. Once builds are
    /// queued the working directory belongs to their group and is retired
    /// after the last of them runs, even if this future is dropped first.
    pub async fn run_job(&self, job: &JobKey, url: &str, branch: &str) -> SchedulerResult<JobOutcome> {
        let workdir = self.cleaner.working_dir().await?;
        info!(job = %job, url = %url, branch = %branch, path = %workdir.path().display(), "Preparing job");

        self.source.checkout(url, branch, workdir.path()).await?;

        let config_path = workdir.path().join(CI_CONFIG_FILE);
        let text = match tokio::fs::read_to_string(&config_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(job = %job, file = CI_CONFIG_FILE, "No configuration found, skipping");
                return Ok(JobOutcome::Skipped(SkipReason::NoConfig));
            }
            Err(e) => return Err(e.into()),
        };

        let config = match parse_ci_config(&text) {
            Ok(config) => config,
            Err(ConfigError::NoImage) => return Ok(skip(job, SkipReason::NoImage)),
            Err(ConfigError::NoScript) => return Ok(skip(job, SkipReason::NoScript)),
            Err(e) => return Err(e.into()),
        };

        let builds: Vec<Build> = config
            .images
            .iter()
            .map(|image| {
                Build::new(
                    job.clone(),
                    image.clone(),
                    config.script.clone(),
                    workdir.path().to_path_buf(),
                )
            })
            .collect();

        let builds = self
            .queue
            .submit_in(job.clone(), builds, workdir)?
            .wait()
            .await?;
        info!(
            job = %job,
            builds = builds.len(),
            succeeded = builds.iter().filter(|b| b.succeeded()).count(),
            "Job complete"
        );
        Ok(JobOutcome::Completed(builds))
    }
}

fn skip(job: &JobKey, reason: SkipReason) -> JobOutcome {
    warn!(job = %job, reason = %reason, "Skipping job");
    JobOutcome::Skipped(reason)
}
