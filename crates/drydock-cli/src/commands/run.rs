//! Local job execution command.

use anyhow::{Context, Result, bail};
use drydock_config::SystemConfig;
use drydock_core::{JobRecord, RepoName};
use drydock_scheduler::cleaner::{GRACE_INTERVAL, MAX_ATTEMPTS};
use drydock_scheduler::{GitService, JobOutcome, Services, build_executor};
use std::sync::Arc;
use std::time::Duration;

use super::summary;

/// Run one job to completion in this process, as the server would for a
/// webhook, and fail unless a build passed.
pub async fn run_job(config: &SystemConfig, repo: &str, url: &str, branch: &str) -> Result<()> {
    let repo: RepoName = repo.parse()?;
    let executor = build_executor(config.executor).context("Failed to set up container executor")?;
    let services = Services::start(config, executor, Arc::new(GitService::new()));

    let job = services.next_job(&repo).await?;
    println!("Running job {} ({} @ {})", job, url, branch);

    let outcome = services
        .run_job(&job, url, branch)
        .await
        .with_context(|| format!("Job {} could not run", job))?;

    wait_for_cleanup(&services).await;

    match outcome {
        JobOutcome::Skipped(reason) => bail!("Job {} skipped: {}", job, reason),
        JobOutcome::Completed(_) => {
            let record: JobRecord = services.read_results(&job).await?.unwrap_or_default();
            println!();
            for line in summary(&record) {
                println!("  {}", line);
            }
            println!("Results written to {}", services.store.job_path(&job).display());
        }
    }

    if !outcome.is_success() {
        bail!("Job {} failed", job);
    }
    Ok(())
}

/// Give the cleaner time to remove the working directory before exiting.
async fn wait_for_cleanup(services: &Services) {
    let deadline = GRACE_INTERVAL * MAX_ATTEMPTS + Duration::from_secs(5);
    if !services.cleaner.pending().is_empty() {
        println!("Waiting for working directory cleanup..");
    }
    let _ = tokio::time::timeout(deadline, async {
        while !services.cleaner.pending().is_empty() {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    })
    .await;
}
