//! Error taxonomy shared across the acquisition pipeline, the transcription
//! engine, and the orchestrator (SPEC §7). Each component family gets its own
//! `thiserror` enum; `kind()` projects every variant onto the flat taxonomy
//! that the orchestrator stores on a task row.

use serde::{Deserialize, Serialize};

/// The flat category stored on a failed task (`TaskError.category`) and used
/// to decide retryability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidUrl,
    NoTranscriptAvailable,
    DownloadFailed,
    AudioTooLong,
    RateLimited,
    UpstreamUnavailable,
    TranscriptionFailed,
    QuotaExceeded,
    Cancelled,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::NoTranscriptAvailable => "no_transcript_available",
            ErrorKind::DownloadFailed => "download_failed",
            ErrorKind::AudioTooLong => "audio_too_long",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::TranscriptionFailed => "transcription_failed",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InternalError => "internal_error",
        }
    }

    /// Whether this kind is classified as belonging to the "service
    /// temporarily degraded" class, per §4.2's circuit-breaker rule and §7's
    /// retry-cap split (rate-limit/503 classes get a 120s cap, others 10s).
    pub fn is_service_class(self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::UpstreamUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors surfaced by `CaptionFetcher` and `AudioFetcher`, the two rungs of
/// the acquisition pipeline (§4.5, §4.6). The ladder tries methods in order
/// and only the last method's error is surfaced, matching the "exception
/// cascade" rewritten as an explicit result sum type (§9).
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("no caption track available: {0}")]
    NoCaptions(String),
    #[error("all audio download strategies exhausted: {0}")]
    DownloadFailed(String),
    #[error("invalid source url")]
    InvalidUrl,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    YtDlp(#[from] ytdlp_bindings::YtDlpError),
}

impl AcquisitionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AcquisitionError::NoCaptions(_) => ErrorKind::NoTranscriptAvailable,
            AcquisitionError::DownloadFailed(_) => ErrorKind::DownloadFailed,
            AcquisitionError::InvalidUrl => ErrorKind::InvalidUrl,
            _ => ErrorKind::InternalError,
        }
    }
}

/// Errors surfaced by `TranscriptionEngine` (§4.7).
#[derive(Debug, thiserror::Error)]
pub enum TranscriptionError {
    #[error("audio duration exceeds the fallback cap")]
    AudioTooLong,
    #[error("no chunk produced a transcript")]
    AllChunksFailed,
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("request refused: duplicate in flight")]
    Duplicate,
    #[error("circuit breaker open for {0}")]
    CircuitOpen(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    YtDlp(#[from] ytdlp_bindings::YtDlpError),
}

impl TranscriptionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranscriptionError::AudioTooLong => ErrorKind::AudioTooLong,
            TranscriptionError::AllChunksFailed => ErrorKind::TranscriptionFailed,
            TranscriptionError::RateLimited(_) => ErrorKind::RateLimited,
            TranscriptionError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            TranscriptionError::CircuitOpen(_) => ErrorKind::UpstreamUnavailable,
            _ => ErrorKind::InternalError,
        }
    }

    /// Classifies a raw HTTP status/body pair into the §7 retry taxonomy.
    pub fn classify(status: Option<u16>, body: &str) -> TranscriptionError {
        let lowered = body.to_ascii_lowercase();
        if status == Some(429) || lowered.contains("rate limit") {
            TranscriptionError::RateLimited(body.to_string())
        } else if status == Some(503) || lowered.contains("service unavailable") {
            TranscriptionError::UpstreamUnavailable(body.to_string())
        } else {
            TranscriptionError::UpstreamUnavailable(body.to_string())
        }
    }
}

/// Orchestrator-level errors: these fail the *job*, not an individual task
/// (§4.9, §7).
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("source url yielded zero videos")]
    NoVideosExtracted,
    #[error("archive contains no valid transcripts")]
    EmptyArchive,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error(transparent)]
    Store(#[from] transcript_store::StoreError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
