//! HTTP server for Drydock CI.
//!
//! Receives GitHub webhooks, reports commit statuses, and serves job
//! results as HTML pages and JSON.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
