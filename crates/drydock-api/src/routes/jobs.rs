//! Job result pages and JSON results.

use askama::Template;
use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use drydock_core::{JobKey, JobRecord, RepoName, ResultRecord};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index_page))
        .route("/jobs/{owner}/{repo}", get(builds_page))
        .route("/jobs/{owner}/{repo}/{build}", get(job_page))
        .route("/api/jobs/{owner}/{repo}/{build}", get(job_json))
}

// ============================================================================
// Templates
// ============================================================================

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate;

#[derive(Template)]
#[template(path = "builds.html")]
struct BuildsTemplate {
    repo: String,
    builds: Vec<u64>,
}

#[derive(Template)]
#[template(path = "job.html")]
struct JobTemplate {
    job: String,
    images: Vec<ImageView>,
}

#[derive(Template)]
#[template(path = "output.html")]
struct OutputTemplate {
    job: String,
    image: String,
    status: &'static str,
    lines: Vec<String>,
}

#[derive(Template)]
#[template(path = "missing.html")]
struct MissingTemplate {
    job: String,
}

struct ImageView {
    name: String,
    status: &'static str,
    duration: String,
}

fn status_of(record: &ResultRecord) -> &'static str {
    match record.success {
        None => "running",
        Some(true) => "passed",
        Some(false) => "failed",
    }
}

fn image_views(record: &JobRecord) -> Vec<ImageView> {
    record
        .iter()
        .map(|(name, result)| ImageView {
            name: name.clone(),
            status: status_of(result),
            duration: if result.is_finished() {
                format!("{:.2}s", result.duration)
            } else {
                String::new()
            },
        })
        .collect()
}

fn missing(job: &str) -> Result<Response, ApiError> {
    let page = MissingTemplate {
        job: job.to_string(),
    };
    Ok((StatusCode::NOT_FOUND, Html(page.render()?)).into_response())
}

fn job_key(owner: String, repo: String, build: &str) -> Result<Option<JobKey>, ApiError> {
    let repo = RepoName::new(owner, repo)?;
    match build.parse::<u64>() {
        Ok(number) if number > 0 => Ok(Some(JobKey::new(repo, number)?)),
        _ => Ok(None),
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn index_page() -> Result<Html<String>, ApiError> {
    Ok(Html(IndexTemplate.render()?))
}

async fn builds_page(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<Html<String>, ApiError> {
    let repo = RepoName::new(owner, repo)?;
    let builds = state.services.store.job_numbers(&repo).await?;

    let page = BuildsTemplate {
        repo: repo.to_string(),
        builds,
    };
    Ok(Html(page.render()?))
}

#[derive(Debug, Deserialize)]
struct JobQuery {
    image: Option<String>,
}

async fn job_page(
    State(state): State<AppState>,
    Path((owner, repo, build)): Path<(String, String, String)>,
    Query(query): Query<JobQuery>,
) -> Result<Response, ApiError> {
    let name = format!("{}/{}/{}", owner, repo, build);
    let Some(key) = job_key(owner, repo, &build)? else {
        return missing(&name);
    };
    let Some(record) = state.services.read_results(&key).await? else {
        return missing(&name);
    };

    let Some(image) = query.image else {
        let page = JobTemplate {
            job: key.to_string(),
            images: image_views(&record),
        };
        return Ok(Html(page.render()?).into_response());
    };

    let Some(result) = record.get(&image) else {
        return missing(&format!("{} ({})", name, image));
    };
    let page = OutputTemplate {
        job: key.to_string(),
        status: status_of(result),
        lines: result.output.clone(),
        image,
    };
    Ok(Html(page.render()?).into_response())
}

async fn job_json(
    State(state): State<AppState>,
    Path((owner, repo, build)): Path<(String, String, String)>,
) -> Result<Json<JobRecord>, ApiError> {
    let name = format!("{}/{}/{}", owner, repo, build);
    let key = job_key(owner, repo, &build)?
        .ok_or_else(|| ApiError::NotFound(format!("No results for job {}", name)))?;

    state
        .services
        .read_results(&key)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No results for job {}", key)))
}
