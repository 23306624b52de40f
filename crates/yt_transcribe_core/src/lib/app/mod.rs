pub mod cron;
pub mod server;

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::orchestrator::Services;

/// Shared application state for coordinating between the maintenance cron
/// and the status HTTP server (§10.6/§10.7).
pub struct AppState {
    pub services: Services,
    pub next_tick_for_job: Mutex<Option<DateTime<Utc>>>,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        AppState { services, next_tick_for_job: Mutex::new(None) }
    }
}
