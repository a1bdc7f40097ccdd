//! GitHub commit status reporting.

use async_trait::async_trait;
use drydock_core::{JobKey, RepoName};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{info, warn};

const GITHUB_API: &str = "https://api.github.com";

/// A commit on the code host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub repo: RepoName,
    pub sha: String,
}

/// Commit status states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
}

impl CommitState {
    pub fn description(&self) -> &'static str {
        match self {
            CommitState::Pending => "Working on it..",
            CommitState::Success => "All good",
            CommitState::Failure => "Things didn't go too well..",
        }
    }
}

/// Publishes the state of a job for a commit. Reporting is best effort and
/// never fails the job.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, commit: &Commit, job: &JobKey, state: CommitState);
}

#[derive(Debug, Serialize, PartialEq)]
struct StatusRequest<'a> {
    state: CommitState,
    target_url: String,
    description: &'static str,
    context: &'a str,
}

/// Status client for the GitHub statuses API.
pub struct GitHubStatusClient {
    client: reqwest::Client,
    token: String,
    api_base: String,
    public_url: String,
    context: String,
}

impl GitHubStatusClient {
    pub fn new(token: impl Into<String>, public_url: &str, context: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            api_base: GITHUB_API.to_string(),
            public_url: public_url.trim_end_matches('/').to_string(),
            context: context.into(),
        }
    }

    /// Point at a GitHub Enterprise or test server.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, commit: &Commit) -> String {
        format!(
            "{}/repos/{}/statuses/{}",
            self.api_base, commit.repo, commit.sha
        )
    }

    fn request(&self, job: &JobKey, state: CommitState) -> StatusRequest<'_> {
        StatusRequest {
            state,
            target_url: format!("{}/jobs/{}", self.public_url, job),
            description: state.description(),
            context: &self.context,
        }
    }
}

#[async_trait]
impl StatusReporter for GitHubStatusClient {
    async fn report(&self, commit: &Commit, job: &JobKey, state: CommitState) {
        let response = self
            .client
            .post(self.endpoint(commit))
            .header("Authorization", format!("token {}", self.token))
            .header("User-Agent", "Drydock-CI")
            .header("Accept", "application/vnd.github+json")
            .json(&self.request(job, state))
            .send()
            .await;

        match response {
            Ok(response) if response.status() == StatusCode::CREATED => {
                info!(job = %job, sha = %commit.sha, state = ?state, "Reported status");
            }
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                warn!(job = %job, status = %status, body = %text, "Status update rejected");
            }
            Err(e) => {
                warn!(job = %job, error = %e, "Status update failed");
            }
        }
    }
}
