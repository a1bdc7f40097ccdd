//! GitHub webhook endpoint.

use askama::Template;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::AppState;
use crate::error::ApiError;
use crate::services::{Commit, CommitState};
use drydock_core::{JobKey, RepoName};

/// Branch built for pushes.
const PUSH_BRANCH: &str = "master";

pub fn router() -> Router<AppState> {
    Router::new().route("/handler", get(handler_info).post(github_webhook))
}

#[derive(Template)]
#[template(path = "handler.html")]
struct HandlerTemplate;

async fn handler_info() -> Result<Html<String>, ApiError> {
    Ok(Html(HandlerTemplate.render()?))
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    full_name: String,
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    after: String,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    pull_request: PullRequest,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    head: HeadRef,
    base: BaseRef,
}

#[derive(Debug, Deserialize)]
struct HeadRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BaseRef {
    repo: RepositoryPayload,
}

/// What to build for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Trigger {
    commit: Commit,
    clone_url: String,
    branch: String,
}

impl Trigger {
    fn new(repo: RepositoryPayload, branch: String, sha: String) -> Result<Self, ApiError> {
        Ok(Self {
            commit: Commit {
                repo: repo.full_name.parse::<RepoName>()?,
                sha,
            },
            clone_url: repo.clone_url,
            branch,
        })
    }
}

/// Resolve an event into a trigger. `Ok(None)` for events that build
/// nothing.
fn parse_event(event: &str, body: &[u8]) -> Result<Option<Trigger>, ApiError> {
    let invalid = |e: serde_json::Error| ApiError::BadRequest(format!("Invalid {} payload: {}", event, e));

    match event {
        "push" => {
            let push: PushPayload = serde_json::from_slice(body).map_err(invalid)?;
            Trigger::new(push.repository, PUSH_BRANCH.to_string(), push.after).map(Some)
        }
        "pull_request" => {
            let payload: PullRequestPayload = serde_json::from_slice(body).map_err(invalid)?;
            if !matches!(payload.action.as_str(), "opened" | "synchronize") {
                info!(action = %payload.action, "Ignoring pull request action");
                return Ok(None);
            }
            let pr = payload.pull_request;
            Trigger::new(pr.base.repo, format!("pull/{}/head", pr.number), pr.head.sha).map(Some)
        }
        other => {
            info!(event = %other, "Unhandled event type");
            Ok(None)
        }
    }
}

/// Handle a GitHub event: assign a job, report it pending and run it in
/// the background.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, ApiError> {
    let event = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let Some(trigger) = parse_event(event, &body)? else {
        return Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))).into_response());
    };

    let job = state.services.next_job(&trigger.commit.repo).await?;
    info!(
        job = %job,
        event = %event,
        branch = %trigger.branch,
        sha = %trigger.commit.sha,
        "Received GitHub webhook"
    );

    state
        .status
        .report(&trigger.commit, &job, CommitState::Pending)
        .await;
    tokio::spawn(run_and_report(state, trigger, job.clone()));

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "queued", "job": job })),
    )
        .into_response())
}

async fn run_and_report(state: AppState, trigger: Trigger, job: JobKey) {
    let outcome = state
        .services
        .run_job(&job, &trigger.clone_url, &trigger.branch)
        .await;

    let final_state = match outcome {
        Ok(outcome) if outcome.is_success() => CommitState::Success,
        Ok(outcome) => {
            warn!(job = %job, builds = outcome.builds().len(), "Job did not succeed");
            CommitState::Failure
        }
        Err(e) => {
            error!(job = %job, error = %e, "Job failed to run");
            CommitState::Failure
        }
    };

    state.status.report(&trigger.commit, &job, final_state).await;
}
