use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    RetryPending,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Category + human-readable message for a failed task, per the §7 error taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub category: String,
    pub message: String,
}

/// One video within a bulk job, processed in `order_index` order.
#[derive(Debug, Clone, FromRow)]
pub struct VideoTaskRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub video_id: String,
    pub title: String,
    pub url: String,
    pub duration_seconds: Option<i32>,
    pub order_index: i32,
    pub status: TaskStatus,
    pub retry_count: i32,
    pub transcript_method_used: Option<String>,
    pub transcript_text: Option<String>,
    pub transcript_storage_url: Option<String>,
    pub error_category: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl VideoTaskRow {
    pub fn error(&self) -> Option<TaskError> {
        match (&self.error_category, &self.error_message) {
            (Some(category), Some(message)) => Some(TaskError {
                category: category.clone(),
                message: message.clone(),
            }),
            _ => None,
        }
    }

    /// Transcript content, preferring the inline copy over the storage-url
    /// reference, per §6's "reads inline if present, else downloads" rule.
    pub fn has_content(&self) -> bool {
        self.transcript_text.is_some() || self.transcript_storage_url.is_some()
    }
}

/// Fields needed to create a task row at job-creation time.
pub struct NewTask {
    pub id: Uuid,
    pub job_id: Uuid,
    pub video_id: String,
    pub title: String,
    pub url: String,
    pub duration_seconds: Option<i32>,
    pub order_index: i32,
}
