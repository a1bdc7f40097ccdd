//! HTTP routes.

pub mod health;
pub mod jobs;
pub mod webhooks;

use crate::AppState;
use axum::Router;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(jobs::router())
        .merge(webhooks::router())
        .merge(health::router())
        .with_state(state)
}
