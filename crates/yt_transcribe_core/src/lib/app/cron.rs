//! # Maintenance Cron
//!
//! Two periodic jobs, run on a `tokio-cron-scheduler` schedule with graceful
//! shutdown on `ctrl_c()`:
//!
//! - Guest-session usage garbage collection, clearing rows older than a
//!   retention window so the guest quota tables don't grow unbounded.
//! - A stale-`processing`-job sweep: jobs left `processing` past a
//!   staleness threshold (a worker crashed mid-job) are requeued to
//!   `pending` so the next worker poll picks them up again.
//!
//! The Orchestrator's own job/task loop is not cron-driven (§10.6) — this
//! binary only runs the two maintenance sweeps above.
//!
//! ## Environment Variables
//!
//! - `MAINTENANCE_CRON_SCHEDULE`: cron string (default every 15 minutes)
//! - `GUEST_USAGE_RETENTION_DAYS`: guest-usage row retention (default 30)
//! - `STALE_JOB_THRESHOLD_MINUTES`: staleness cutoff for the sweep (default 60)

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio_cron_scheduler::{JobBuilder, JobScheduler};
use uuid::Uuid;

use super::AppState;

pub async fn start_cron(cron_schedule: &str, app_state: Arc<AppState>) -> anyhow::Result<()> {
    tracing::info!(%cron_schedule);

    let mut scheduler = JobScheduler::new().await?;
    let job_id = Uuid::new_v4();
    let state = app_state.clone();

    let job = JobBuilder::new()
        .with_timezone(Utc)
        .with_job_id(job_id.into())
        .with_cron_job_type()
        .with_schedule(cron_schedule)?
        .with_run_async(Box::new(move |uuid, _| {
            let state = state.clone();
            Box::pin(async move {
                let result = std::panic::AssertUnwindSafe(run_maintenance_sweep(&state))
                    .catch_unwind()
                    .await;

                match result {
                    Ok(Ok(())) => {
                        tracing::info!(job_id = %uuid, "maintenance sweep completed");
                    }
                    Ok(Err(err)) => {
                        tracing::error!(job_id = %uuid, error = ?err, "maintenance sweep failed");
                    }
                    Err(panic_err) => {
                        tracing::error!(job_id = %uuid, error = ?panic_err, "maintenance sweep panicked");
                    }
                }
            })
        }))
        .build()?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down maintenance scheduler...");
            scheduler.shutdown().await?;
        }
        _ = check_time_till_next_job(&mut scheduler, job_id, app_state) => {}
    }

    Ok(())
}

async fn run_maintenance_sweep(app_state: &AppState) -> anyhow::Result<()> {
    let retention_days = std::env::var("GUEST_USAGE_RETENTION_DAYS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);
    let stale_threshold_minutes = std::env::var("STALE_JOB_THRESHOLD_MINUTES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(60);

    let gc_count = app_state.services.quotas.gc_guest_usage(retention_days).await?;
    tracing::info!(gc_count, retention_days, "guest usage rows reclaimed");

    let stale_jobs = app_state.services.jobs.stale_processing_jobs(stale_threshold_minutes).await?;
    for job in &stale_jobs {
        match app_state.services.jobs.requeue_job(job.id).await {
            Ok(true) => tracing::warn!(job_id = %job.id, "requeued stale processing job"),
            Ok(false) => {}
            Err(err) => tracing::error!(job_id = %job.id, %err, "failed to requeue stale job"),
        }
    }

    Ok(())
}

async fn check_time_till_next_job(
    scheduler: &mut JobScheduler,
    job_id: Uuid,
    app_state: Arc<AppState>,
) -> anyhow::Result<()> {
    loop {
        let time = scheduler.next_tick_for_job(job_id).await?;

        if let Some(next) = time {
            if let Ok(mut lock) = app_state.next_tick_for_job.lock() {
                *lock = Some(next.with_timezone(&Utc));
            }
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}
