use clap::{Parser, Subcommand};
use transcript_store::{OutputFormat, Principal, TranscriptMethod};
use uuid::Uuid;
use yt_transcribe_core::orchestrator::{process_job, submit_job};
use yt_transcribe_core::quota_tier::TierName;
use yt_transcribe_core::tracing::init_tracing_subscriber;
use yt_transcribe_core::{Config, Services};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct YtTranscribeCli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Submit a bulk-transcription job for a video, playlist, or channel URL.
    Submit {
        /// The YouTube video, playlist, or channel URL to transcribe
        source_url: String,
        /// Which acquisition path is permitted: captions-only, groq, or openai
        #[arg(long, default_value = "captions-only")]
        method: String,
        /// Output format: txt, srt, vtt, or json
        #[arg(long, default_value = "txt")]
        format: String,
        /// Immediately drive the job to completion after submitting it
        #[arg(long)]
        run: bool,
    },

    /// Drive an already-submitted job to completion.
    Process {
        /// The job's id, as printed by `submit`
        job_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing_subscriber()?;

    let services = Services::new(Config::from_env()?).await?;
    let cli = YtTranscribeCli::parse();

    match cli.command {
        Commands::Submit { source_url, method, format, run } => {
            let job = submit_job(
                &services,
                Principal::Guest("dev-cli".to_string()),
                &source_url,
                parse_method(&method)?,
                parse_format(&format)?,
                None,
                TierName::Free,
            )
            .await?;

            tracing::info!(job_id = %job.id, total_videos = job.total_videos, "job submitted");

            if run {
                process_job(&services, job.id).await?;
                tracing::info!(job_id = %job.id, "job processed");
            }
        }

        Commands::Process { job_id } => {
            process_job(&services, job_id).await?;
            tracing::info!(%job_id, "job processed");
        }
    }

    Ok(())
}

fn parse_method(raw: &str) -> anyhow::Result<TranscriptMethod> {
    match raw {
        "captions-only" => Ok(TranscriptMethod::CaptionsOnly),
        "groq" => Ok(TranscriptMethod::Groq),
        "openai" => Ok(TranscriptMethod::Openai),
        other => Err(anyhow::anyhow!("unrecognised method: {other}")),
    }
}

fn parse_format(raw: &str) -> anyhow::Result<OutputFormat> {
    match raw {
        "txt" => Ok(OutputFormat::Txt),
        "srt" => Ok(OutputFormat::Srt),
        "vtt" => Ok(OutputFormat::Vtt),
        "json" => Ok(OutputFormat::Json),
        other => Err(anyhow::anyhow!("unrecognised format: {other}")),
    }
}
