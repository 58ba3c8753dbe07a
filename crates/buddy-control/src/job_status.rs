use buddy_db::entities::generation_jobs;
use buddy_jobs::{JobId, JobState, JobStatus, Progress};

use crate::queue::{JobQueue, QueueError};

/// Client-facing view of a job. Unknown or malformed ids read as pending.
pub async fn status(queue: &JobQueue, raw_id: &str) -> Result<JobStatus, QueueError> {
    let Some(id) = JobId::parse(raw_id) else {
        return Ok(JobStatus::pending());
    };
    Ok(queue
        .find(id)
        .await?
        .map(|row| status_from_row(&row))
        .unwrap_or_else(JobStatus::pending))
}

pub fn status_from_row(row: &generation_jobs::Model) -> JobStatus {
    let state = match row.state.parse::<JobState>() {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(job_id = %row.id, %err, "job row has unknown state");
            return JobStatus::pending();
        }
    };

    match state {
        JobState::Pending => JobStatus::pending(),
        JobState::Progress => {
            let total = row.progress_total.unwrap_or(0).max(0) as u32;
            let current = (row.progress_current.unwrap_or(0).max(0) as u32).min(total);
            JobStatus {
                progress: Some(Progress { current, total }),
                ..JobStatus::pending()
            }
        }
        JobState::Success => JobStatus {
            ready: true,
            successful: true,
            value: Some(
                row.result_json
                    .as_deref()
                    .map(|raw| {
                        serde_json::from_str(raw)
                            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
                    })
                    .unwrap_or(serde_json::Value::Null),
            ),
            progress: None,
        },
        JobState::Failure => JobStatus {
            ready: true,
            successful: false,
            value: Some(serde_json::json!({
                "error": row.error.as_deref().unwrap_or("job failed"),
            })),
            progress: None,
        },
    }
}
