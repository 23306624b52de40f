use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Principal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum SourceKind {
    Video,
    Playlist,
    Channel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TranscriptMethod {
    CaptionsOnly,
    Groq,
    Openai,
}

impl TranscriptMethod {
    /// Whether this method is permitted to fall back to audio download and
    /// AI transcription once captions are unavailable.
    pub fn allows_audio_fallback(self) -> bool {
        !matches!(self, TranscriptMethod::CaptionsOnly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum OutputFormat {
    Txt,
    Srt,
    Vtt,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobTotals {
    pub pending: i32,
    pub processing: i32,
    pub completed: i32,
    pub failed: i32,
    pub retry: i32,
}

impl JobTotals {
    pub fn sum(&self) -> i32 {
        self.pending + self.processing + self.completed + self.failed + self.retry
    }
}

/// A bulk transcription job: one source URL, N video tasks.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub owner_user_id: Option<Uuid>,
    pub owner_guest_session_id: Option<String>,
    pub source_url: String,
    pub source_kind: SourceKind,
    pub method: TranscriptMethod,
    pub format: OutputFormat,
    pub status: JobStatus,
    pub total_videos: i32,
    pub pending_count: i32,
    pub processing_count: i32,
    pub completed_count: i32,
    pub failed_count: i32,
    pub retry_count: i32,
    pub webhook_url: Option<String>,
    pub artifact_path: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRow {
    pub fn owner(&self) -> Principal {
        match (&self.owner_user_id, &self.owner_guest_session_id) {
            (Some(user_id), None) => Principal::Authenticated(*user_id),
            (None, Some(session_id)) => Principal::Guest(session_id.clone()),
            _ => unreachable!("bulk_jobs_owner_exclusive constraint guarantees exactly one"),
        }
    }

    pub fn totals(&self) -> JobTotals {
        JobTotals {
            pending: self.pending_count,
            processing: self.processing_count,
            completed: self.completed_count,
            failed: self.failed_count,
            retry: self.retry_count,
        }
    }
}

/// Fields needed to create a new job; totals start at `{pending: total_videos, ..0}`.
pub struct NewJob {
    pub id: Uuid,
    pub owner: Principal,
    pub source_url: String,
    pub source_kind: SourceKind,
    pub method: TranscriptMethod,
    pub format: OutputFormat,
    pub total_videos: i32,
    pub webhook_url: Option<String>,
    pub metadata: serde_json::Value,
}
