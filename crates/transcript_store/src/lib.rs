//! Persistence boundary for the transcription service: job/task rows,
//! quota counters, and guest-usage tracking. Idempotent writes for jobs
//! and tasks; atomic counter operations for quotas (§4.9, §4.10, §6).

pub mod domain;
mod store;

pub use domain::{
    GuestUsageRow, JobRow, JobStatus, JobTotals, Metric, NewJob, NewTask, OutputFormat, Period,
    Principal, QuotaCounterRow, QuotaDecision, SourceKind, TaskError, TaskStatus,
    TranscriptMethod, VideoTaskRow,
};
pub use store::{JobStore, QuotaLedger, StoreError};
