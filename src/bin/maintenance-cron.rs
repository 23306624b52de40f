//! # Maintenance Cron Binary
//!
//! Runs the guest-usage GC / stale-job sweep on a schedule alongside the
//! `/status` HTTP surface, running the `app::cron`/`app::server` pair
//! together (§10.6/§10.7).

use std::sync::Arc;

use clap::Parser;
use yt_transcribe_core::tracing::init_tracing_subscriber;
use yt_transcribe_core::{start_cron, start_server, AppState, Config, Services};

const DEFAULT_CRON_SCHEDULE: &str = "0 */15 * * * *";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct MaintenanceCli {
    /// Cron expression for the guest-GC / stale-job sweep
    #[arg(long, default_value = DEFAULT_CRON_SCHEDULE)]
    cron_schedule: String,
}

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

    let cli = MaintenanceCli::parse();
    let services = Services::new(Config::from_env()?).await?;
    let app_state = Arc::new(AppState::new(services));

    tokio::try_join!(
        start_cron(&cli.cron_schedule, app_state.clone()),
        start_server(app_state),
    )?;

    Ok(())
}
