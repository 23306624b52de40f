//! Job/task state machine (§4.9): extracts videos from a source URL, enforces
//! quota before creating a job, then drives each task through captions-first
//! acquisition with an optional audio/AI fallback, packages completed
//! transcripts into a zip, and fires the completion webhook.
//!
//! `Services` is the single composition root — every module in this crate
//! gets wired together here instead of through module-level singletons, so a
//! worker process and a test harness build the same graph from one
//! `Config`.

use std::collections::HashMap;
use std::sync::Arc;

use openai_dive::v1::api::Client as OpenAiClient;
use transcript_store::{
    JobRow, JobStatus, JobStore, NewJob, NewTask, OutputFormat as StoredFormat, Principal,
    QuotaLedger, SourceKind as StoredSourceKind, TaskError, TaskStatus, TranscriptMethod,
    VideoTaskRow,
};
use transcript_store::{Metric, Period};
use uuid::Uuid;
use ytdlp_bindings::YtDlp;

use crate::audio_fetcher::AudioFetcher;
use crate::caption_fetcher::{CaptionFetcher, ProxyConfig};
use crate::chunk_planner::{Model, Provider};
use crate::config::Config;
use crate::error::OrchestratorError;
use crate::formatter::{self, OutputFormat as CoreFormat};
use crate::http_caller::HttpCaller;
use crate::quota_tier::{self, TierName};
use crate::rate_gate::{DedupTracker, RateGate, RateGateConfig};
use crate::transcription_engine::{TranscriptionEngine, TranscriptionRequest};
use crate::url::{parse_source, SourceKind};
use crate::webhook::{self, JobCompletionPayload};
use crate::zip_packager::{self, PackagedEntry};

const MAX_TASK_RETRIES: i32 = 3;
const DEFAULT_LANGUAGE: &str = "auto";

/// Everything a worker needs to create and drive jobs, built once at
/// startup from a single [`Config`].
#[derive(Clone)]
pub struct Services {
    pub jobs: JobStore,
    pub quotas: QuotaLedger,
    http: Arc<HttpCaller>,
    ytdlp: YtDlp,
    engine: TranscriptionEngine,
    webhook_client: reqwest::Client,
    config: Config,
}

impl Services {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let jobs = JobStore::init(&config.database_url, config.max_db_connections).await?;
        let quotas = QuotaLedger::new(jobs.pool().clone());

        let ytdlp = match &config.cookie_file {
            Some(path) => YtDlp::new_with_cookies(Some(path.clone()))?,
            None => YtDlp::new()?,
        };

        let mut openai_clients: HashMap<Provider, Arc<OpenAiClient>> = HashMap::new();
        if config.openai_api_key.is_some() {
            openai_clients.insert(Provider::Openai, Arc::new(OpenAiClient::new_from_env()));
        }
        if let Some(groq_key) = &config.groq_api_key {
            openai_clients.insert(
                Provider::Groq,
                Arc::new(OpenAiClient::new_with_base("https://api.groq.com/openai/v1", groq_key)),
            );
        }

        let rate_gates: HashMap<Model, Arc<RateGate>> = [
            Model::OpenaiWhisper,
            Model::GroqTurbo,
            Model::GroqStandard,
            Model::GroqDistilled,
        ]
        .into_iter()
        .map(|model| (model, Arc::new(RateGate::new(RateGateConfig::for_model(model)))))
        .collect();

        std::fs::create_dir_all(&config.temp_dir)?;

        let engine = TranscriptionEngine::new(
            ytdlp.clone(),
            Arc::new(openai_clients),
            Arc::new(rate_gates),
            Arc::new(DedupTracker::new()),
            config.temp_dir.clone(),
        );

        Ok(Services {
            jobs,
            quotas,
            http: Arc::new(HttpCaller::new()),
            ytdlp,
            engine,
            webhook_client: reqwest::Client::new(),
            config,
        })
    }

    fn proxy_config(&self) -> Option<ProxyConfig> {
        self.config.proxy.clone()
    }

    fn caption_fetcher(&self) -> CaptionFetcher<'_> {
        CaptionFetcher::new(&self.http, &self.ytdlp, self.proxy_config(), self.config.temp_dir.clone())
    }

    /// Exposes the shared HTTP client pool so a binary can drive
    /// `HttpCaller::run_health_loop` alongside the worker loop.
    pub fn http_caller(&self) -> Arc<HttpCaller> {
        self.http.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Extracts a source URL into a job, enforcing the §4.10 quota checks before
/// a single row is written. `tier` should already reflect the caller's
/// billing tier (or be derived from `owner` being a guest).
#[tracing::instrument(skip(services))]
pub async fn submit_job(
    services: &Services,
    owner: Principal,
    source_url: &str,
    method: TranscriptMethod,
    format: StoredFormat,
    webhook_url: Option<String>,
    tier: TierName,
) -> Result<JobRow, OrchestratorError> {
    let parsed = parse_source(source_url)
        .ok_or_else(|| OrchestratorError::Other(anyhow::anyhow!("could not classify source url")))?;

    let entries = services
        .ytdlp
        .list_playlist_entries(source_url)
        .map_err(|e| OrchestratorError::Other(anyhow::anyhow!(e)))?;

    if entries.is_empty() {
        return Err(OrchestratorError::NoVideosExtracted);
    }

    enforce_submission_quotas(services, &owner, tier).await?;

    let entries = clamp_to_per_job_cap(entries, &owner, tier);

    let job_id = Uuid::new_v4();
    let tasks = entries
        .into_iter()
        .enumerate()
        .map(|(index, (video_id, title, duration_seconds))| NewTask {
            id: Uuid::new_v4(),
            job_id,
            url: format!("https://www.youtube.com/watch?v={video_id}"),
            video_id,
            title,
            duration_seconds: duration_seconds.map(|d| d as i32),
            order_index: index as i32,
        })
        .collect::<Vec<_>>();

    let new_job = NewJob {
        id: job_id,
        owner,
        source_url: source_url.to_string(),
        source_kind: source_kind_of(parsed.kind),
        method,
        format,
        total_videos: tasks.len() as i32,
        webhook_url,
        metadata: serde_json::json!({ "tier": tier.as_str() }),
    };

    Ok(services.jobs.create_job(new_job, tasks).await?)
}

fn source_kind_of(kind: SourceKind) -> StoredSourceKind {
    match kind {
        SourceKind::Video => StoredSourceKind::Video,
        SourceKind::Playlist => StoredSourceKind::Playlist,
        SourceKind::Channel => StoredSourceKind::Channel,
    }
}

/// Checks the submission-time gates that deny a job outright: a concurrent-
/// jobs ceiling for authenticated principals, and a one-job-per-day cap for
/// guests. `bulk_videos_total_limit` is *not* checked here — it is a
/// per-job truncation cap, applied by `clamp_to_per_job_cap` after this
/// passes, not a cumulative daily meter (see that function's doc comment).
async fn enforce_submission_quotas(
    services: &Services,
    owner: &Principal,
    tier: TierName,
) -> Result<(), OrchestratorError> {
    match owner {
        Principal::Authenticated(_) => {
            let resolved = quota_tier::resolve(tier);
            let key = owner.storage_key();

            let concurrent = services.jobs.count_processing_jobs(&key).await?;
            if concurrent >= resolved.max_concurrent_jobs {
                return Err(OrchestratorError::QuotaExceeded);
            }
        }
        Principal::Guest(session_id) => {
            let jobs_today = services.jobs.count_guest_jobs_today(session_id).await?;
            if jobs_today >= quota_tier::GUEST_JOBS_PER_DAY_LIMIT {
                return Err(OrchestratorError::QuotaExceeded);
            }
        }
    }
    Ok(())
}

/// Truncates a freshly extracted video list to the caller's per-job video
/// cap (§4.10, §8.3 scenario 3: a 10-video playlist on the free tier,
/// `bulk_videos_total_limit = 5`, becomes a job with exactly 5 tasks, not a
/// rejected submission). This is a pure clamp, not a ledger check — it has
/// nothing to do with how many videos the principal has already processed
/// today, which is tracked separately by the per-method daily counters
/// (`Metric::CaptionsMethodCount` / `Metric::AiMethodCount`).
fn clamp_to_per_job_cap<T>(entries: Vec<T>, owner: &Principal, tier: TierName) -> Vec<T> {
    let limit = match owner {
        Principal::Authenticated(_) => quota_tier::resolve(tier).bulk_videos_total_limit,
        Principal::Guest(_) => quota_tier::GUEST_BULK_VIDEOS_TOTAL_LIMIT,
    };

    if entries.len() as i64 > limit {
        tracing::warn!(requested = entries.len(), limit, "truncating job to the per-job video cap");
        entries.into_iter().take(limit as usize).collect()
    } else {
        entries
    }
}

/// Drives a single job from `pending` to a terminal status (§4.9). Returns
/// `Ok(())` without doing anything if the job was not `pending` (another
/// worker already claimed it, or it was already finished/cancelled).
#[tracing::instrument(skip(services))]
pub async fn process_job(services: &Services, job_id: Uuid) -> Result<(), OrchestratorError> {
    if !services.jobs.start_job(job_id).await? {
        return Ok(());
    }

    let job = services.jobs.get_job(job_id).await?;
    let tier = quota_tier::resolve(tier_of(&job));

    run_pass(services, &job, tier).await?;
    retry_failed_once(services, &job, tier).await?;

    let totals = services.jobs.recompute_totals(job_id).await?;
    let final_job = services.jobs.get_job(job_id).await?;

    if final_job.status == JobStatus::Cancelled {
        return Ok(());
    }

    let artifact_path = if totals.completed > 0 {
        match package_artifact(services, &final_job).await {
            Ok(path) => Some(path),
            Err(OrchestratorError::EmptyArchive) => None,
            Err(err) => return Err(err),
        }
    } else {
        None
    };

    let status = if totals.completed > 0 { JobStatus::Completed } else { JobStatus::Failed };
    services.jobs.finalize_job(job_id, status, artifact_path.as_deref()).await?;

    if let Some(webhook_url) = &final_job.webhook_url {
        notify(services, &final_job, webhook_url, status, &totals, artifact_path.is_some()).await;
    }

    Ok(())
}

fn tier_of(job: &JobRow) -> TierName {
    job.metadata
        .get("tier")
        .and_then(|v| v.as_str())
        .map(TierName::from_str_or_free)
        .unwrap_or(TierName::Free)
}

/// One sweep over every non-terminal task in `order_index` order, pausing
/// `tier.rate_limit_delay_secs` between tasks and bailing out as soon as the
/// job is observed cancelled (§4.9 step 9).
async fn run_pass(
    services: &Services,
    job: &JobRow,
    tier: crate::quota_tier::Tier,
) -> Result<(), OrchestratorError> {
    let tasks = services.jobs.tasks_for_job(job.id).await?;

    for task in tasks {
        if task.status.is_terminal() {
            continue;
        }

        if services.jobs.get_job(job.id).await?.status == JobStatus::Cancelled {
            break;
        }

        run_task(services, job, &task, tier).await?;
        services.jobs.recompute_totals(job.id).await?;

        tokio::time::sleep(std::time::Duration::from_secs_f64(tier.rate_limit_delay_secs)).await;
    }

    Ok(())
}

/// Promotes failed, non-quota-exceeded tasks to `retry_pending` once, then
/// reprocesses them (§4.9 step 8).
async fn retry_failed_once(
    services: &Services,
    job: &JobRow,
    tier: crate::quota_tier::Tier,
) -> Result<(), OrchestratorError> {
    let tasks = services.jobs.tasks_for_job(job.id).await?;
    let mut promoted = Vec::new();

    for task in tasks {
        if task.status != TaskStatus::Failed {
            continue;
        }
        let category = task.error().map(|e| e.category);
        if matches!(category.as_deref(), Some("quota_exceeded") | Some("cancelled")) {
            continue;
        }
        if services.jobs.promote_for_retry(task.id, MAX_TASK_RETRIES).await? {
            promoted.push(task.id);
        }
    }

    if promoted.is_empty() {
        return Ok(());
    }

    run_pass(services, job, tier).await
}

async fn run_task(
    services: &Services,
    job: &JobRow,
    task: &VideoTaskRow,
    tier: crate::quota_tier::Tier,
) -> Result<(), OrchestratorError> {
    services.jobs.mark_task_processing(task.id).await?;

    match acquire_transcript(services, job, task, tier).await {
        Ok((method_used, text)) => {
            let core_format = to_core_format(job.format);
            let content = formatter::format(&text, core_format);
            services.jobs.mark_task_completed(task.id, &method_used, Some(&content), None).await?;
        }
        Err(error) => {
            services.jobs.mark_task_failed(task.id, error).await?;
        }
    }

    Ok(())
}

/// Captions-first acquisition with an audio/AI fallback, per §4.9 steps
/// 3-5. Returns the method name stored on the task plus the formatted
/// segment list (still typed, not yet rendered to the job's output format).
async fn acquire_transcript(
    services: &Services,
    job: &JobRow,
    task: &VideoTaskRow,
    tier: crate::quota_tier::Tier,
) -> Result<(String, Vec<crate::segment::Segment>), TaskError> {
    let owner_key = job.owner().storage_key();
    let is_guest = job.owner().is_guest();

    if !check_and_count(services, &owner_key, is_guest, Metric::CaptionsMethodCount, tier).await? {
        return Err(quota_error());
    }

    let caption_fetcher = services.caption_fetcher();
    match caption_fetcher.fetch(&task.video_id).await {
        Ok(result) => return Ok(("captions".to_string(), result.segments)),
        Err(err) => {
            tracing::info!(video_id = %task.video_id, %err, "caption ladder exhausted");
        }
    }

    if !job.method.allows_audio_fallback() {
        return Err(TaskError {
            category: "no_transcript_available".to_string(),
            message: "no captions available and method does not allow audio fallback".to_string(),
        });
    }

    if let Some(duration) = task.duration_seconds {
        if f64::from(duration) > services.config.audio_fallback_max_duration_seconds {
            return Err(TaskError {
                category: "audio_too_long".to_string(),
                message: format!(
                    "video duration {duration}s exceeds the {}s audio-fallback cap",
                    services.config.audio_fallback_max_duration_seconds
                ),
            });
        }
    }

    if !check_and_count(services, &owner_key, is_guest, Metric::AiMethodCount, tier).await? {
        return Err(quota_error());
    }

    let provider = match job.method {
        TranscriptMethod::Groq => Provider::Groq,
        TranscriptMethod::Openai => Provider::Openai,
        TranscriptMethod::CaptionsOnly => unreachable!("checked allows_audio_fallback above"),
    };

    let video_id = task.video_id.clone();
    let cookie_file = services.config.cookie_file.clone();
    let temp_dir = services.config.temp_dir.clone();
    let ytdlp = services.ytdlp.clone();

    let audio_path = tokio::task::spawn_blocking(move || {
        let fetcher = AudioFetcher::new(&ytdlp, cookie_file.as_deref(), temp_dir);
        fetcher.fetch(&video_id)
    })
    .await
    .map_err(|e| internal_error(&e))?
    .map_err(|e| TaskError { category: "download_failed".to_string(), message: e.to_string() })?;

    let outcome = services
        .engine
        .transcribe(TranscriptionRequest {
            audio_path: audio_path.clone(),
            provider,
            language: DEFAULT_LANGUAGE.to_string(),
            fastest_requested: false,
            speed_multiplier: 1.0,
        })
        .await;

    let _ = std::fs::remove_file(&audio_path);

    let outcome = outcome.map_err(|e| TaskError { category: e.kind().as_str().to_string(), message: e.to_string() })?;
    let method_used = format!("{:?}", outcome.model).to_lowercase();
    Ok((method_used, outcome.segments))
}

async fn check_and_count(
    services: &Services,
    owner_key: &str,
    is_guest: bool,
    metric: Metric,
    tier: crate::quota_tier::Tier,
) -> Result<bool, TaskError> {
    if is_guest {
        let usage_type = metric.as_str();
        let limit = match metric {
            Metric::CaptionsMethodCount => quota_tier::GUEST_CAPTIONS_METHOD_DAILY_LIMIT,
            Metric::AiMethodCount => quota_tier::GUEST_AI_METHOD_DAILY_LIMIT,
            _ => i64::MAX,
        };
        let decision = services
            .quotas
            .check_guest_usage(owner_key, usage_type, limit)
            .await
            .map_err(store_error)?;
        if !decision.allowed {
            return Ok(false);
        }
        services.quotas.increment_guest_usage(owner_key, usage_type, 1).await.map_err(store_error)?;
        Ok(true)
    } else {
        let limit = tier.limit_for(metric);
        let decision = services
            .quotas
            .check_and_increment(owner_key, Period::Day, metric, 1, limit)
            .await
            .map_err(store_error)?;
        Ok(decision.allowed)
    }
}

fn quota_error() -> TaskError {
    TaskError { category: "quota_exceeded".to_string(), message: "daily quota for this method exhausted".to_string() }
}

fn store_error(err: transcript_store::StoreError) -> TaskError {
    TaskError { category: "internal_error".to_string(), message: err.to_string() }
}

fn internal_error(err: &tokio::task::JoinError) -> TaskError {
    TaskError { category: "internal_error".to_string(), message: err.to_string() }
}

fn to_core_format(format: StoredFormat) -> CoreFormat {
    match format {
        StoredFormat::Txt => CoreFormat::Txt,
        StoredFormat::Srt => CoreFormat::Srt,
        StoredFormat::Vtt => CoreFormat::Vtt,
        StoredFormat::Json => CoreFormat::Json,
    }
}

/// Packages every completed task's transcript into a zip on disk, per §4.9
/// step 10, returning the archive's path for `finalize_job`.
async fn package_artifact(services: &Services, job: &JobRow) -> Result<String, OrchestratorError> {
    let tasks = services.jobs.tasks_for_job(job.id).await?;
    let entries: Vec<PackagedEntry> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .map(|t| PackagedEntry {
            title: t.title.clone(),
            video_id: t.video_id.clone(),
            content: t.transcript_text.clone().unwrap_or_default(),
        })
        .collect();

    let bytes = zip_packager::build_zip(&entries, to_core_format(job.format))?;
    let filename = zip_packager::archive_filename(&job.id);
    let path = services.config.temp_dir.join(&filename);
    tokio::fs::write(&path, bytes).await.map_err(|e| OrchestratorError::Other(anyhow::anyhow!(e)))?;

    Ok(path.display().to_string())
}

async fn notify(
    services: &Services,
    job: &JobRow,
    webhook_url: &str,
    status: JobStatus,
    totals: &transcript_store::JobTotals,
    zip_available: bool,
) {
    let finished = totals.completed + totals.failed;
    let success_rate = if finished > 0 { f64::from(totals.completed) / f64::from(finished) } else { 0.0 };

    let payload = JobCompletionPayload {
        job_id: job.id,
        owner: job.owner().storage_key(),
        status: format!("{status:?}").to_lowercase(),
        total_videos: job.total_videos as i64,
        completed_videos: totals.completed as i64,
        failed_videos: totals.failed as i64,
        success_rate,
        zip_available,
        completed_at: chrono::Utc::now(),
    };

    webhook::notify_completion(&services.webhook_client, webhook_url, &payload).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_of_maps_each_variant() {
        assert_eq!(source_kind_of(SourceKind::Video), StoredSourceKind::Video);
        assert_eq!(source_kind_of(SourceKind::Playlist), StoredSourceKind::Playlist);
        assert_eq!(source_kind_of(SourceKind::Channel), StoredSourceKind::Channel);
    }

    #[test]
    fn to_core_format_maps_each_variant() {
        assert_eq!(to_core_format(StoredFormat::Txt), CoreFormat::Txt);
        assert_eq!(to_core_format(StoredFormat::Srt), CoreFormat::Srt);
        assert_eq!(to_core_format(StoredFormat::Vtt), CoreFormat::Vtt);
        assert_eq!(to_core_format(StoredFormat::Json), CoreFormat::Json);
    }

    #[test]
    fn tier_of_falls_back_to_free_when_metadata_missing_or_unrecognised() {
        let mut job = sample_job();
        job.metadata = serde_json::json!({});
        assert_eq!(tier_of(&job), TierName::Free);

        job.metadata = serde_json::json!({ "tier": "pro" });
        assert_eq!(tier_of(&job), TierName::Pro);

        job.metadata = serde_json::json!({ "tier": "not-a-real-tier" });
        assert_eq!(tier_of(&job), TierName::Free);
    }

    #[test]
    fn quota_error_carries_the_quota_exceeded_category() {
        let err = quota_error();
        assert_eq!(err.category, "quota_exceeded");
    }

    #[test]
    fn clamp_to_per_job_cap_truncates_an_over_cap_playlist_instead_of_rejecting() {
        // §8.3 scenario 3: a 10-video playlist on the free tier (cap 5)
        // becomes a job with exactly 5 tasks, not a denied submission.
        let entries: Vec<i32> = (0..10).collect();
        let owner = Principal::Authenticated(Uuid::nil());
        let clamped = clamp_to_per_job_cap(entries, &owner, TierName::Free);
        assert_eq!(clamped.len(), 5);
        assert_eq!(clamped, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn clamp_to_per_job_cap_leaves_an_under_cap_playlist_untouched() {
        let entries: Vec<i32> = (0..3).collect();
        let owner = Principal::Authenticated(Uuid::nil());
        let clamped = clamp_to_per_job_cap(entries.clone(), &owner, TierName::Free);
        assert_eq!(clamped, entries);
    }

    #[test]
    fn clamp_to_per_job_cap_applies_the_guest_limit() {
        let entries: Vec<i32> = (0..10).collect();
        let owner = Principal::Guest("session-a".to_string());
        let clamped = clamp_to_per_job_cap(entries, &owner, TierName::Free);
        assert_eq!(clamped.len(), quota_tier::GUEST_BULK_VIDEOS_TOTAL_LIMIT as usize);
    }

    fn sample_job() -> JobRow {
        JobRow {
            id: Uuid::nil(),
            owner_user_id: None,
            owner_guest_session_id: Some("session-a".to_string()),
            source_url: "https://www.youtube.com/watch?v=abc".to_string(),
            source_kind: StoredSourceKind::Video,
            method: TranscriptMethod::CaptionsOnly,
            format: StoredFormat::Txt,
            status: JobStatus::Pending,
            total_videos: 1,
            pending_count: 1,
            processing_count: 0,
            completed_count: 0,
            failed_count: 0,
            retry_count: 0,
            webhook_url: None,
            artifact_path: None,
            metadata: serde_json::json!({}),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            completed_at: None,
        }
    }
}
