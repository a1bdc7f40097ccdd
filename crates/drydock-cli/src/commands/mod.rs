//! CLI command implementations.

pub mod run;

use anyhow::{Context, Result, bail};
use drydock_config::{SystemConfig, parse_ci_config};
use drydock_core::{JobKey, JobRecord, RepoName, ResultRecord};
use drydock_store::{BuildNumberer, ResultsStore};
use std::path::Path;
use std::sync::Arc;

pub fn validate(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = parse_ci_config(&content)
        .with_context(|| format!("Configuration error in {}", path.display()))?;

    println!("Configuration is valid");
    println!("Builds ({}):", config.images.len());
    for image in &config.images {
        println!("  {}", image);
    }
    println!("Script:");
    for line in &config.script {
        println!("  {}", line);
    }
    Ok(())
}

pub async fn show(config: &SystemConfig, job: &str, image: Option<&str>, json: bool) -> Result<()> {
    let key: JobKey = job.parse()?;
    let store = ResultsStore::new(&config.results_root);
    let Some(record) = store.read(&key).await? else {
        bail!("No results for job {}", key);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    match image {
        Some(image) => {
            let Some(result) = record.get(image) else {
                bail!("Job {} has no build for image {}", key, image);
            };
            print_output(image, result);
        }
        None => {
            for (image, result) in &record {
                print_output(image, result);
            }
        }
    }
    Ok(())
}

pub async fn next(config: &SystemConfig, repo: &str) -> Result<()> {
    let repo: RepoName = repo.parse()?;
    let numberer = BuildNumberer::new(Arc::new(ResultsStore::new(&config.results_root)));
    println!("{}", numberer.next_build(&repo).await?);
    Ok(())
}

fn print_output(image: &str, result: &ResultRecord) {
    println!("=== {} ({})", image, status_line(result));
    for line in &result.output {
        println!("{}", line);
    }
}

/// One-word outcome plus exit code, e.g. `failed, exit 2`.
pub(crate) fn status_line(result: &ResultRecord) -> String {
    match (result.success, result.returncode) {
        (Some(true), _) => "passed".to_string(),
        (Some(false), Some(code)) => format!("failed, exit {}", code),
        (Some(false), None) => "failed".to_string(),
        (None, _) => "running".to_string(),
    }
}

/// Images of a job with their status, in build order.
pub(crate) fn summary(record: &JobRecord) -> Vec<String> {
    record
        .iter()
        .map(|(image, result)| format!("{}: {} ({:.2}s)", image, status_line(result), result.duration))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn finished(code: i32) -> ResultRecord {
        let mut record = ResultRecord::started("acme/widgets/1".parse().unwrap());
        record.finish(code, Duration::from_millis(500));
        record
    }

    #[test]
    fn test_status_line() {
        assert_eq!(status_line(&finished(0)), "passed");
        assert_eq!(status_line(&finished(3)), "failed, exit 3");
        let running = ResultRecord::started("acme/widgets/1".parse().unwrap());
        assert_eq!(status_line(&running), "running");
    }

    #[test]
    fn test_summary_keeps_build_order() {
        let mut record = JobRecord::new();
        record.insert("b".to_string(), finished(1));
        record.insert("a".to_string(), finished(0));
        assert_eq!(
            summary(&record),
            vec!["b: failed, exit 1 (0.50s)", "a: passed (0.50s)"]
        );
    }

    #[test]
    fn test_validate_rejects_missing_script() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".ci-config");
        std::fs::write(&path, "image: base\n").unwrap();
        assert!(validate(&path).is_err());

        std::fs::write(&path, "image: base\nscript: make\n").unwrap();
        assert!(validate(&path).is_ok());
    }

    #[tokio::test]
    async fn test_next_and_show_on_empty_root() {
        let dir = TempDir::new().unwrap();
        let config = SystemConfig {
            results_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(next(&config, "acme/widgets").await.is_ok());
        assert!(next(&config, "not-a-repo").await.is_err());
        assert!(show(&config, "acme/widgets/1", None, false).await.is_err());
    }
}
