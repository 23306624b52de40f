//! # Orchestrator Worker
//!
//! The long-running consumer of the job queue (§10.6): not cron-driven,
//! since bulk-transcription jobs arrive continuously rather than on a
//! schedule. Polls for the oldest `pending` job, drives it to a terminal
//! status, and repeats; backs off briefly when the queue is empty.

use std::time::Duration;

use yt_transcribe_core::orchestrator::process_job;
use yt_transcribe_core::tracing::init_tracing_subscriber;
use yt_transcribe_core::{Config, Services};

const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let _guard = std::env::var("SENTRY_DSN").ok().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some("production".into()),
                ..Default::default()
            },
        ))
    });

    init_tracing_subscriber()?;

    let services = Services::new(Config::from_env()?).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let http_caller = services.http_caller();
    let health_loop = tokio::spawn(async move { http_caller.run_health_loop(shutdown_rx).await });

    tracing::info!("orchestrator worker started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down orchestrator worker...");
                let _ = shutdown_tx.send(true);
                break;
            }
            next = services.jobs.next_pending_job_id() => {
                match next {
                    Ok(Some(job_id)) => {
                        if let Err(err) = process_job(&services, job_id).await {
                            tracing::error!(%job_id, %err, "job processing failed");
                        }
                    }
                    Ok(None) => {
                        tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                    }
                    Err(err) => {
                        tracing::error!(%err, "failed to poll for pending jobs");
                        tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                    }
                }
            }
        }
    }

    health_loop.await?;
    Ok(())
}
