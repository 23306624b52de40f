use anyhow::Context;
use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::domain::{JobRow, JobStatus, JobTotals, NewJob, NewTask, TaskError, TaskStatus, VideoTaskRow};

static MIGRATOR: Migrator = sqlx::migrate!();

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    JobNotFound(Uuid),
    #[error("task {0} not found")]
    TaskNotFound(Uuid),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// The persistence boundary for `bulk_jobs` and `video_tasks`.
///
/// Writes are idempotent where it matters: `start_job` returns
/// `false` instead of erroring on a non-pending job, and `insert_tasks` is
/// a single transaction per job so a partial crash never leaves a job with
/// some but not all of its tasks.
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub async fn init(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .inspect_err(|e| tracing::error!(error = ?e, "failed to connect to database"))
            .context("failed to connect to database")?;

        MIGRATOR
            .run(&pool)
            .await
            .inspect_err(|e| tracing::error!(error = ?e, "failed to run database migrations"))
            .context("failed to run database migrations")?;

        Ok(JobStore { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates a job and its N task rows in a single transaction. `tasks`
    /// must already carry dense, unique `order_index` values in `[0, N)`.
    #[tracing::instrument(skip(self, job, tasks))]
    pub async fn create_job(&self, job: NewJob, tasks: Vec<NewTask>) -> Result<JobRow, StoreError> {
        let (owner_user_id, owner_guest_session_id) = match &job.owner {
            crate::domain::Principal::Authenticated(id) => (Some(*id), None),
            crate::domain::Principal::Guest(session_id) => (None, Some(session_id.clone())),
        };

        let mut tx = self.pool.begin().await?;

        let row: JobRow = sqlx::query_as(
            r#"
            INSERT INTO bulk_jobs (
                id, owner_user_id, owner_guest_session_id, source_url, source_kind,
                method, format, status, total_videos, pending_count, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $8, $9)
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(owner_user_id)
        .bind(owner_guest_session_id)
        .bind(&job.source_url)
        .bind(job.source_kind)
        .bind(job.method)
        .bind(job.format)
        .bind(job.total_videos)
        .bind(&job.metadata)
        .fetch_one(&mut *tx)
        .await?;

        for task in &tasks {
            sqlx::query(
                r#"
                INSERT INTO video_tasks (
                    id, job_id, video_id, title, url, duration_seconds, order_index, status
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
                "#,
            )
            .bind(task.id)
            .bind(task.job_id)
            .bind(&task.video_id)
            .bind(&task.title)
            .bind(&task.url)
            .bind(task.duration_seconds)
            .bind(task.order_index)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(row)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<JobRow, StoreError> {
        sqlx::query_as("SELECT * FROM bulk_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::JobNotFound(job_id))
    }

    pub async fn tasks_for_job(&self, job_id: Uuid) -> Result<Vec<VideoTaskRow>, StoreError> {
        let rows = sqlx::query_as(
            "SELECT * FROM video_tasks WHERE job_id = $1 ORDER BY order_index ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Idempotent: returns `false` without mutating anything if the job is
    /// not currently `pending`.
    #[tracing::instrument(skip(self))]
    pub async fn start_job(&self, job_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE bulk_jobs SET status = 'processing', updated_at = now() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Valid from `pending` or `processing` only (§4.9). Returns `false` if
    /// the job was already terminal.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE bulk_jobs SET status = 'cancelled', updated_at = now() \
             WHERE id = $1 AND status IN ('pending', 'processing', 'paused')",
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 1 {
            sqlx::query(
                "UPDATE video_tasks SET status = 'failed', error_category = 'cancelled', \
                 error_message = 'cancelled by user', completed_at = now() \
                 WHERE job_id = $1 AND status = 'pending'",
            )
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_task_processing(&self, task_id: Uuid) -> Result<(), StoreError> {
        self.transition_task(task_id, TaskStatus::Processing, None, None, true, false)
            .await
    }

    pub async fn mark_task_completed(
        &self,
        task_id: Uuid,
        method_used: &str,
        transcript_text: Option<&str>,
        transcript_storage_url: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE video_tasks SET status = 'completed', transcript_method_used = $2, \
             transcript_text = $3, transcript_storage_url = $4, completed_at = now() \
             WHERE id = $1",
        )
        .bind(task_id)
        .bind(method_used)
        .bind(transcript_text)
        .bind(transcript_storage_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_task_failed(&self, task_id: Uuid, error: TaskError) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE video_tasks SET status = 'failed', error_category = $2, error_message = $3, \
             completed_at = now() WHERE id = $1",
        )
        .bind(task_id)
        .bind(&error.category)
        .bind(&error.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Promotes a failed task to `retry_pending` and bumps its retry count,
    /// per §4.9 step 8. Returns `false` if the task is not `failed` or has
    /// already exhausted `max_retries`.
    pub async fn promote_for_retry(&self, task_id: Uuid, max_retries: i32) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE video_tasks SET status = 'retry_pending', retry_count = retry_count + 1 \
             WHERE id = $1 AND status = 'failed' AND retry_count < $2",
        )
        .bind(task_id)
        .bind(max_retries)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[allow(clippy::too_many_arguments)]
    async fn transition_task(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        category: Option<&str>,
        message: Option<&str>,
        set_started: bool,
        set_completed: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE video_tasks SET status = $2, error_category = $3, error_message = $4, \
             started_at = CASE WHEN $5 THEN now() ELSE started_at END, \
             completed_at = CASE WHEN $6 THEN now() ELSE completed_at END \
             WHERE id = $1",
        )
        .bind(task_id)
        .bind(status)
        .bind(category)
        .bind(message)
        .bind(set_started)
        .bind(set_completed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Recomputes a job's totals from its tasks and writes them atomically.
    /// Called after every task transition (§4.9 step 6, invariant in §3).
    #[tracing::instrument(skip(self))]
    pub async fn recompute_totals(&self, job_id: Uuid) -> Result<JobTotals, StoreError> {
        let totals: (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'processing'),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed'),
                COUNT(*) FILTER (WHERE status = 'retry_pending')
            FROM video_tasks WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        let (pending, processing, completed, failed, retry) = totals;
        sqlx::query(
            "UPDATE bulk_jobs SET pending_count = $2, processing_count = $3, \
             completed_count = $4, failed_count = $5, retry_count = $6, updated_at = now() \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(pending as i32)
        .bind(processing as i32)
        .bind(completed as i32)
        .bind(failed as i32)
        .bind(retry as i32)
        .execute(&self.pool)
        .await?;

        Ok(JobTotals {
            pending: pending as i32,
            processing: processing as i32,
            completed: completed as i32,
            failed: failed as i32,
            retry: retry as i32,
        })
    }

    /// Marks a job terminal once every task has a terminal status (§4.9).
    /// `status` must be `Completed` or `Failed`.
    pub async fn finalize_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        artifact_path: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE bulk_jobs SET status = $2, artifact_path = COALESCE($3, artifact_path), \
             completed_at = now(), updated_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .bind(status)
        .bind(artifact_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Counts jobs in `processing` state for a principal, for the per-tier
    /// concurrent-jobs cap (§5).
    pub async fn count_processing_jobs(&self, owner_key: &str) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM bulk_jobs \
             WHERE status = 'processing' \
             AND (owner_user_id::text = $1 OR owner_guest_session_id = $1)",
        )
        .bind(owner_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Counts jobs created by a guest session today, for the one-job-per-day
    /// cap enforced by the orchestrator at job creation (§4.10).
    pub async fn count_guest_jobs_today(&self, session_id: &str) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM bulk_jobs \
             WHERE owner_guest_session_id = $1 AND created_at::date = now()::date",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Jobs left `processing` past a staleness threshold, for the
    /// stale-job-sweep maintenance cron (§10.6).
    pub async fn stale_processing_jobs(
        &self,
        older_than_minutes: i64,
    ) -> Result<Vec<JobRow>, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::minutes(older_than_minutes);
        let rows = sqlx::query_as("SELECT * FROM bulk_jobs WHERE status = 'processing' AND updated_at < $1")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Picks the oldest `pending` job id for a worker to try next. This is a
    /// peek, not a claim: `process_job`'s own `start_job` call is the atomic
    /// transition, so two workers racing on the same id just means one of
    /// them finds it already `processing` and returns immediately.
    pub async fn next_pending_job_id(&self) -> Result<Option<Uuid>, StoreError> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM bulk_jobs WHERE status = 'pending' ORDER BY created_at ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Returns a job orphaned mid-`processing` back to `pending` so the next
    /// worker poll picks it up again (§10.6's stale-job sweep).
    /// Tasks already `completed`/`failed` are left alone; `process_job`
    /// skips terminal tasks on its next pass.
    pub async fn requeue_job(&self, job_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE bulk_jobs SET status = 'pending', updated_at = now() \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Global count of jobs in a given status, for the `/status` HTTP surface
    /// and the maintenance cron's sweep report (§10.6/§10.7).
    pub async fn count_jobs_by_status(&self, status: JobStatus) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bulk_jobs WHERE status = $1")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use sqlx::PgPool;

    use super::*;
    use crate::domain::Principal;

    fn new_job(total_videos: i32) -> NewJob {
        NewJob {
            id: Uuid::new_v4(),
            owner: Principal::Authenticated(Uuid::new_v4()),
            source_url: "https://www.youtube.com/playlist?list=PLtest".to_string(),
            source_kind: crate::domain::SourceKind::Playlist,
            method: crate::domain::TranscriptMethod::CaptionsOnly,
            format: crate::domain::OutputFormat::Txt,
            total_videos,
            webhook_url: None,
            metadata: serde_json::json!({}),
        }
    }

    fn new_tasks(job_id: Uuid, n: i32) -> Vec<NewTask> {
        (0..n)
            .map(|i| NewTask {
                id: Uuid::new_v4(),
                job_id,
                video_id: format!("vid{i}"),
                title: format!("Video {i}"),
                url: format!("https://www.youtube.com/watch?v=vid{i}"),
                duration_seconds: Some(60),
                order_index: i,
            })
            .collect()
    }

    #[sqlx::test(migrator = "MIGRATOR")]
    async fn create_job_inserts_job_and_dense_tasks(pool: PgPool) {
        let store = JobStore { pool };
        let job = new_job(3);
        let job_id = job.id;
        let row = store
            .create_job(job, new_tasks(job_id, 3))
            .await
            .expect("create_job");

        assert_eq!(row.status, JobStatus::Pending);
        assert_eq!(row.pending_count, 3);
        assert_eq!(row.totals().sum(), 3);

        let tasks = store.tasks_for_job(job_id).await.expect("tasks_for_job");
        assert_eq!(tasks.len(), 3);
        for (i, task) in tasks.iter().enumerate() {
            assert_eq!(task.order_index, i as i32);
            assert_eq!(task.status, TaskStatus::Pending);
        }
    }

    #[sqlx::test(migrator = "MIGRATOR")]
    async fn start_job_is_idempotent(pool: PgPool) {
        let store = JobStore { pool };
        let job = new_job(1);
        let job_id = job.id;
        store.create_job(job, new_tasks(job_id, 1)).await.unwrap();

        assert!(store.start_job(job_id).await.unwrap());
        assert!(!store.start_job(job_id).await.unwrap());

        let row = store.get_job(job_id).await.unwrap();
        assert_eq!(row.status, JobStatus::Processing);
    }

    #[sqlx::test(migrator = "MIGRATOR")]
    async fn cancel_job_fails_pending_tasks(pool: PgPool) {
        let store = JobStore { pool };
        let job = new_job(2);
        let job_id = job.id;
        store.create_job(job, new_tasks(job_id, 2)).await.unwrap();
        store.start_job(job_id).await.unwrap();

        assert!(store.cancel_job(job_id).await.unwrap());
        assert!(!store.cancel_job(job_id).await.unwrap());

        let tasks = store.tasks_for_job(job_id).await.unwrap();
        for task in &tasks {
            assert_eq!(task.status, TaskStatus::Failed);
            let error = task.error().unwrap();
            assert_eq!(error.message, "cancelled by user");
        }
    }

    #[sqlx::test(migrator = "MIGRATOR")]
    async fn recompute_totals_matches_task_statuses(pool: PgPool) {
        let store = JobStore { pool };
        let job = new_job(2);
        let job_id = job.id;
        store.create_job(job, new_tasks(job_id, 2)).await.unwrap();
        let tasks = store.tasks_for_job(job_id).await.unwrap();

        store
            .mark_task_completed(tasks[0].id, "manual/en", Some("hello"), None)
            .await
            .unwrap();
        store
            .mark_task_failed(
                tasks[1].id,
                TaskError {
                    category: "download_failed".to_string(),
                    message: "no strategy succeeded".to_string(),
                },
            )
            .await
            .unwrap();

        let totals = store.recompute_totals(job_id).await.unwrap();
        assert_eq!(totals.completed, 1);
        assert_eq!(totals.failed, 1);
        assert_eq!(totals.sum(), 2);
    }

    #[sqlx::test(migrator = "MIGRATOR")]
    async fn promote_for_retry_respects_max_retries(pool: PgPool) {
        let store = JobStore { pool };
        let job = new_job(1);
        let job_id = job.id;
        store.create_job(job, new_tasks(job_id, 1)).await.unwrap();
        let task_id = store.tasks_for_job(job_id).await.unwrap()[0].id;

        store
            .mark_task_failed(
                task_id,
                TaskError {
                    category: "internal_error".to_string(),
                    message: "boom".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(store.promote_for_retry(task_id, 3).await.unwrap());
        // now retry_pending, not failed, so a second promotion is refused
        assert!(!store.promote_for_retry(task_id, 3).await.unwrap());
    }
}
