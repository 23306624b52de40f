//! Job-completion webhook (§6): one best-effort POST per finished job. A
//! non-200 response or a transport error is logged, not retried — the job
//! itself is already durably recorded, and the caller can always poll.

use serde::Serialize;
use uuid::Uuid;

const WEBHOOK_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct JobCompletionPayload {
    pub job_id: Uuid,
    pub owner: String,
    pub status: String,
    pub total_videos: i64,
    pub completed_videos: i64,
    pub failed_videos: i64,
    pub success_rate: f64,
    pub zip_available: bool,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

#[tracing::instrument(skip(client, payload), fields(job_id = %payload.job_id))]
pub async fn notify_completion(client: &reqwest::Client, url: &str, payload: &JobCompletionPayload) {
    let result = client
        .post(url)
        .timeout(std::time::Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
        .json(payload)
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {
            tracing::info!(status = %response.status(), "webhook delivered");
        }
        Ok(response) => {
            tracing::warn!(status = %response.status(), "webhook rejected, not retrying");
        }
        Err(err) => {
            tracing::warn!(%err, "webhook delivery failed, not retrying");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serialises_success_rate_as_float() {
        let payload = JobCompletionPayload {
            job_id: Uuid::nil(),
            owner: "user:00000000-0000-0000-0000-000000000000".to_string(),
            status: "completed".to_string(),
            total_videos: 10,
            completed_videos: 9,
            failed_videos: 1,
            success_rate: 0.9,
            zip_available: true,
            completed_at: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["success_rate"], 0.9);
        assert_eq!(json["zip_available"], true);
    }
}
