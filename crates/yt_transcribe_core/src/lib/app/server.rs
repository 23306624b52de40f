//! # Status Server
//!
//! A minimal `axum` server exposing `GET /status` with process liveness and
//! coarse job counts — operator infrastructure, not a user-facing HTTP API
//! (§10.7).
//!
//! Example response:
//!
//! ```json
//! {
//!   "healthy": true,
//!   "processing": 3,
//!   "pending": 12,
//!   "next_maintenance_tick": "2025-07-03T18:00:00+03:00"
//! }
//! ```

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::SecondsFormat;
use serde::Serialize;
use tokio::net::TcpListener;
use transcript_store::JobStatus;

use super::AppState;

pub async fn start_server(app_state: Arc<AppState>) -> anyhow::Result<()> {
    let app = Router::new().route("/status", get(status)).with_state(app_state);

    let addr = std::env::var("STATUS_SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:8001".to_string());
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("status server listening on http://{addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct StatusResponse {
    healthy: bool,
    processing: i64,
    pending: i64,
    next_maintenance_tick: Option<String>,
}

#[tracing::instrument(skip(app_state))]
async fn status(State(app_state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let processing = app_state.services.jobs.count_jobs_by_status(JobStatus::Processing).await.unwrap_or(-1);
    let pending = app_state.services.jobs.count_jobs_by_status(JobStatus::Pending).await.unwrap_or(-1);

    let next_tick = app_state.next_tick_for_job.lock().ok().and_then(|guard| guard.clone());

    Json(StatusResponse {
        healthy: true,
        processing,
        pending,
        next_maintenance_tick: next_tick.map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
    })
}
