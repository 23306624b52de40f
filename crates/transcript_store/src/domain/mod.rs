mod job;
mod principal;
mod quota;
mod task;

pub use job::{
    JobRow, JobStatus, JobTotals, NewJob, OutputFormat, SourceKind, TranscriptMethod,
};
pub use principal::Principal;
pub use quota::{GuestUsageRow, Metric, Period, QuotaCounterRow, QuotaDecision};
pub use task::{NewTask, TaskError, TaskStatus, VideoTaskRow};
