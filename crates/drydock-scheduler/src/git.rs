//! Checking out the commit a job builds.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// Local branch the requested ref is fetched into.
const LOCAL_BRANCH: &str = "current";

/// Fetches a repository ref into a directory.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Populate the empty directory `dir` with `url` checked out at `branch`.
    async fn checkout(&self, url: &str, branch: &str, dir: &Path) -> Result<(), GitError>;
}

/// [`SourceControl`] backed by the `git` command.
pub struct GitService {
    program: OsString,
}

impl Default for GitService {
    fn default() -> Self {
        Self::new()
    }
}

impl GitService {
    pub fn new() -> Self {
        Self {
            program: OsString::from("git"),
        }
    }

    async fn git(&self, cwd: Option<&Path>, args: &[&str]) -> Result<(), GitError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let output = cmd.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(command = %args.join(" "), stderr = %stderr, "Git command failed");
            return Err(GitError::CommandFailed {
                command: format!("git {}", args.first().copied().unwrap_or_default()),
                stderr,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SourceControl for GitService {
    async fn checkout(&self, url: &str, branch: &str, dir: &Path) -> Result<(), GitError> {
        let dir_str = dir.to_str().ok_or(GitError::InvalidPath)?;

        info!(url = %url, path = %dir.display(), "Cloning repository");
        self.git(None, &["clone", url, dir_str]).await?;

        let refspec = format!("{}:{}", branch, LOCAL_BRANCH);
        info!(refspec = %refspec, "Fetching ref");
        self.git(Some(dir), &["fetch", "origin", &refspec]).await?;

        self.git(Some(dir), &["checkout", LOCAL_BRANCH]).await?;
        info!(branch = %branch, path = %dir.display(), "Checked out");
        Ok(())
    }
}

/// Git operation errors.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("working directory path is not valid UTF-8")]
    InvalidPath,
}
