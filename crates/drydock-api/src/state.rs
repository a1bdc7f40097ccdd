//! Application state.

use drydock_scheduler::Services;
use std::sync::Arc;

use crate::services::StatusReporter;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub status: Arc<dyn StatusReporter>,
}

impl AppState {
    pub fn new(services: Services, status: Arc<dyn StatusReporter>) -> Self {
        Self { services, status }
    }
}
