//! Chunked transcription dispatch (§4.7): normalise, probe duration, pick a
//! model, plan chunks, fan the chunks out across a bounded worker pool with
//! a `RateGate` lease per upload, then reassemble in chunk-index order with
//! a second, single-worker retry pass over whatever failed the first time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use openai_dive::v1::api::Client as OpenAiClient;
use openai_dive::v1::resources::audio::{AudioOutputFormat, AudioTranscriptionParametersBuilder};
use openai_dive::v1::resources::shared::FileUpload;
use tokio::sync::Semaphore;
use ytdlp_bindings::YtDlp;

use crate::audio_preprocessor;
use crate::chunk_planner::{plan_chunks, select_model, ChunkPlan, Model, Provider};
use crate::error::TranscriptionError;
use crate::rate_gate::{retry_delay, DedupTracker, RateGate};
use crate::segment::{sort_by_start, Segment};

const MAX_FALLBACK_DURATION_SECONDS: f64 = 6.0 * 60.0 * 60.0;
const MAX_CHUNK_SIZE_MB: f64 = 24.0;
const SECOND_PASS_COOLDOWN_SECONDS: u64 = 60;
const SECOND_PASS_MAX_RETRIES: u32 = 3;
const FIRST_PASS_MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_SECS: f64 = 1.0;
// Only `rate_limited`/`upstream_unavailable` chunk failures are retried
// (§7); both are the service-class, so the retry cap is always the 120s one.
const SERVICE_CLASS_RETRY_CAP_SECS: f64 = 120.0;

pub struct TranscriptionRequest {
    pub audio_path: PathBuf,
    pub provider: Provider,
    pub language: String,
    pub fastest_requested: bool,
    pub speed_multiplier: f64,
}

pub struct TranscriptionOutcome {
    pub segments: Vec<Segment>,
    pub model: Model,
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
}

/// Owns everything a chunk upload needs: the provider's client, one
/// `RateGate` per model (a model is only known after duration is probed,
/// so the gate can't be picked until `transcribe` runs), the in-flight
/// dedup tracker, and a scratch directory for normalised/cut files.
#[derive(Clone)]
pub struct TranscriptionEngine {
    ytdlp: YtDlp,
    openai_clients: Arc<HashMap<Provider, Arc<OpenAiClient>>>,
    rate_gates: Arc<HashMap<Model, Arc<RateGate>>>,
    dedup: Arc<DedupTracker>,
    work_dir: PathBuf,
}

impl TranscriptionEngine {
    pub fn new(
        ytdlp: YtDlp,
        openai_clients: Arc<HashMap<Provider, Arc<OpenAiClient>>>,
        rate_gates: Arc<HashMap<Model, Arc<RateGate>>>,
        dedup: Arc<DedupTracker>,
        work_dir: PathBuf,
    ) -> Self {
        TranscriptionEngine { ytdlp, openai_clients, rate_gates, dedup, work_dir }
    }

    #[tracing::instrument(skip(self, request))]
    pub async fn transcribe(&self, request: TranscriptionRequest) -> Result<TranscriptionOutcome, TranscriptionError> {
        let normalized_path = self.work_dir.join(format!("{}.norm.flac", uuid::Uuid::new_v4()));
        audio_preprocessor::normalize(&self.ytdlp, &request.audio_path, &normalized_path, request.speed_multiplier)?;

        let duration = audio_preprocessor::probe_duration_seconds(&self.ytdlp, &normalized_path);
        let duration = match duration {
            Ok(d) => d,
            Err(err) => {
                let _ = std::fs::remove_file(&normalized_path);
                return Err(err);
            }
        };

        if duration > MAX_FALLBACK_DURATION_SECONDS {
            let _ = std::fs::remove_file(&normalized_path);
            return Err(TranscriptionError::AudioTooLong);
        }

        let model = select_model(request.provider, duration, &request.language, request.fastest_requested);
        let estimated_mb = std::fs::metadata(&normalized_path).map(|m| m.len() as f64 / (1024.0 * 1024.0)).unwrap_or(0.0);
        let plan = plan_chunks(duration, model, estimated_mb, MAX_CHUNK_SIZE_MB);

        let outcome = self.dispatch(&normalized_path, &plan, &request.language).await;
        let _ = std::fs::remove_file(&normalized_path);
        outcome
    }

    async fn dispatch(
        &self,
        normalized_path: &Path,
        plan: &ChunkPlan,
        language: &str,
    ) -> Result<TranscriptionOutcome, TranscriptionError> {
        let semaphore = Arc::new(Semaphore::new(plan.workers.max(1)));
        let mut handles = Vec::with_capacity(plan.chunks.len());

        for (index, &(start, duration)) in plan.chunks.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let engine = self.clone();
            let normalized_path = normalized_path.to_path_buf();
            let language = language.to_string();
            let model = plan.model;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                let result = engine
                    .transcribe_chunk_with_retry(&normalized_path, index, start, duration, model, &language, FIRST_PASS_MAX_ATTEMPTS)
                    .await;
                (index, start, result)
            }));
        }

        let mut succeeded: Vec<(usize, f64, String)> = Vec::new();
        let mut failed: Vec<usize> = Vec::new();

        for handle in handles {
            let Ok((index, start, outcome)) = handle.await else {
                continue;
            };
            match outcome {
                Ok(text) => succeeded.push((index, start, text)),
                Err(err) => {
                    tracing::warn!(index, %err, "chunk transcription failed on first pass after exhausting retries");
                    failed.push(index);
                }
            }
        }

        if !failed.is_empty() {
            tokio::time::sleep(std::time::Duration::from_secs(SECOND_PASS_COOLDOWN_SECONDS)).await;
            for index in failed {
                let (start, duration) = plan.chunks[index];
                match self
                    .transcribe_chunk_with_retry(normalized_path, index, start, duration, plan.model, language, SECOND_PASS_MAX_RETRIES)
                    .await
                {
                    Ok(text) => succeeded.push((index, start, text)),
                    Err(err) => {
                        tracing::error!(index, %err, "chunk permanently failed after second pass");
                    }
                }
            }
        }

        if succeeded.is_empty() {
            return Err(TranscriptionError::AllChunksFailed);
        }

        succeeded.sort_by_key(|(index, _, _)| *index);
        let segments = sort_by_start(
            succeeded
                .iter()
                .map(|(index, start, text)| {
                    let (_, duration) = plan.chunks[*index];
                    Segment::new(text.trim().to_string(), *start, duration)
                })
                .collect(),
        );

        Ok(TranscriptionOutcome {
            segments,
            model: plan.model,
            chunks_total: plan.chunks.len(),
            chunks_succeeded: succeeded.len(),
        })
    }

    /// Retries a chunk upload per §4.7 step (d) / §7's policy: a retryable
    /// (service-class: rate-limited or upstream-unavailable) failure sleeps
    /// `retry_delay` before the next attempt, capped at 120s; any other
    /// failure, or an exhausted attempt budget, returns immediately.
    #[allow(clippy::too_many_arguments)]
    async fn transcribe_chunk_with_retry(
        &self,
        normalized_path: &Path,
        index: usize,
        start: f64,
        duration: f64,
        model: Model,
        language: &str,
        max_attempts: u32,
    ) -> Result<String, TranscriptionError> {
        let mut attempt = 0;
        loop {
            match self.transcribe_chunk(normalized_path, index, start, duration, model, language).await {
                Ok(text) => return Ok(text),
                Err(err) if err.kind().is_service_class() && attempt + 1 < max_attempts => {
                    let delay = retry_delay(attempt, RETRY_BASE_SECS, SERVICE_CLASS_RETRY_CAP_SECS);
                    tracing::warn!(index, attempt, %err, delay_secs = delay.as_secs_f64(), "chunk transcription failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Cuts, uploads, and classifies a single chunk, recording the outcome
    /// against the shared `RateGate` lease per §4.7 steps (a)-(d). A single
    /// attempt; retries are the caller's concern (`transcribe_chunk_with_retry`).
    async fn transcribe_chunk(
        &self,
        normalized_path: &Path,
        index: usize,
        start: f64,
        duration: f64,
        model: Model,
        language: &str,
    ) -> Result<String, TranscriptionError> {
        let chunk_path = self.work_dir.join(format!("chunk-{index}-{}.flac", uuid::Uuid::new_v4()));
        audio_preprocessor::cut(&self.ytdlp, normalized_path, &chunk_path, start, duration, MAX_CHUNK_SIZE_MB)?;

        let dedup_key = DedupTracker::key(&chunk_path.display().to_string(), model.wire_name(), language);
        if !self.dedup.try_begin(&dedup_key) {
            let _ = std::fs::remove_file(&chunk_path);
            return Err(TranscriptionError::Duplicate);
        }

        let rate_gate = self.rate_gates.get(&model).cloned();
        let Some(rate_gate) = rate_gate else {
            self.dedup.end(&dedup_key);
            let _ = std::fs::remove_file(&chunk_path);
            return Err(TranscriptionError::UpstreamUnavailable(format!("no rate gate configured for {model:?}")));
        };
        let openai = self.openai_clients.get(&model.provider()).cloned();
        let Some(openai) = openai else {
            self.dedup.end(&dedup_key);
            let _ = std::fs::remove_file(&chunk_path);
            return Err(TranscriptionError::UpstreamUnavailable(format!("no client configured for {:?}", model.provider())));
        };

        let lease = rate_gate.acquire().await;

        let params = AudioTranscriptionParametersBuilder::default()
            .file(FileUpload::File(format!("{}", chunk_path.display())))
            .model(model.wire_name().to_string())
            .response_format(AudioOutputFormat::Text)
            .language(language.to_string())
            .temperature(0.0)
            .build()
            .map_err(|e| TranscriptionError::UpstreamUnavailable(e.to_string()));

        let result = match params {
            Ok(params) => openai.audio().create_transcription(params).await,
            Err(err) => {
                self.dedup.end(&dedup_key);
                let _ = std::fs::remove_file(&chunk_path);
                return Err(err);
            }
        };

        self.dedup.end(&dedup_key);
        let _ = std::fs::remove_file(&chunk_path);

        match result {
            Ok(text) => {
                rate_gate.record_success(lease);
                Ok(text)
            }
            Err(err) => {
                let classified = TranscriptionError::classify(None, &err.to_string());
                rate_gate.record_failure(lease, classified.kind().is_service_class());
                Err(classified)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_cap_matches_six_hours() {
        assert_eq!(MAX_FALLBACK_DURATION_SECONDS, 21_600.0);
    }
}
