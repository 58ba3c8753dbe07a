use std::sync::Arc;
use std::time::Duration;

use buddy_db::entities::generation_jobs;
use buddy_jobs::{CreateQuizJob, JobId, JobResult, JobState, Progress};
use sea_orm::prelude::{DateTimeWithTimeZone, Expr};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tokio::sync::Notify;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job store error: {0}")]
    Db(#[from] DbErr),
    #[error("failed to encode job payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One delivery of a job. Writes made under a lease only land while
/// `attempt_count` still matches, so a superseded delivery cannot touch the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub id: JobId,
    pub attempt: i32,
}

/// A job handed to exactly one worker execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub id: JobId,
    pub args: CreateQuizJob,
    pub attempt: i32,
}

impl ClaimedJob {
    pub fn lease(&self) -> Lease {
        Lease {
            id: self.id,
            attempt: self.attempt,
        }
    }
}

#[derive(Debug, Default)]
pub struct StaleSweep {
    pub requeued: u64,
    /// Jobs failed for exceeding the attempt limit; their files still need cleanup.
    pub abandoned: Vec<ClaimedJob>,
}

const ACTIVE_STATES: [&str; 2] = ["PENDING", "PROGRESS"];

fn now() -> DateTimeWithTimeZone {
    chrono::Utc::now().into()
}

/// Durable job queue on the `generation_jobs` table.
///
/// A job is claimed by stamping `started_at` and bumping `attempt_count`; the
/// pair (id, attempt) is the delivery's [`Lease`]. Terminal transitions are
/// conditional on the row still being active and leased, so each job reaches
/// SUCCESS or FAILURE exactly once.
#[derive(Clone)]
pub struct JobQueue {
    db: Arc<DatabaseConnection>,
    wake: Arc<Notify>,
}

impl JobQueue {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Records a PENDING job and returns immediately.
    pub async fn submit(&self, args: &CreateQuizJob) -> Result<JobId, QueueError> {
        let id = JobId::new();
        let created = now();

        generation_jobs::Entity::insert(generation_jobs::ActiveModel {
            id: Set(id.0),
            user_id: Set(args.user_id),
            subject_id: Set(args.subject_id),
            params_json: Set(serde_json::to_string(args)?),
            state: Set(JobState::Pending.as_str().to_string()),
            progress_current: Set(None),
            progress_total: Set(None),
            result_json: Set(None),
            error: Set(None),
            attempt_count: Set(0),
            created_at: Set(created),
            updated_at: Set(created),
            started_at: Set(None),
            finished_at: Set(None),
        })
        .exec(&*self.db)
        .await?;

        tracing::info!(job_id = %id, subject_id = args.subject_id, "generation job queued");
        self.wake.notify_one();
        Ok(id)
    }

    pub async fn find(&self, id: JobId) -> Result<Option<generation_jobs::Model>, QueueError> {
        Ok(generation_jobs::Entity::find_by_id(id.0).one(&*self.db).await?)
    }

    /// Claims the oldest unclaimed active job, if any.
    pub async fn claim_next(&self) -> Result<Option<ClaimedJob>, QueueError> {
        loop {
            let Some(row) = generation_jobs::Entity::find()
                .filter(generation_jobs::Column::State.is_in(ACTIVE_STATES))
                .filter(generation_jobs::Column::StartedAt.is_null())
                .order_by_asc(generation_jobs::Column::CreatedAt)
                .one(&*self.db)
                .await?
            else {
                return Ok(None);
            };

            let claimed_at = now();
            let attempt = row.attempt_count + 1;
            let res = generation_jobs::Entity::update_many()
                .col_expr(generation_jobs::Column::StartedAt, Expr::value(claimed_at))
                .col_expr(generation_jobs::Column::UpdatedAt, Expr::value(claimed_at))
                .col_expr(generation_jobs::Column::AttemptCount, Expr::value(attempt))
                .filter(generation_jobs::Column::Id.eq(row.id))
                .filter(generation_jobs::Column::AttemptCount.eq(row.attempt_count))
                .filter(generation_jobs::Column::State.is_in(ACTIVE_STATES))
                .filter(generation_jobs::Column::StartedAt.is_null())
                .exec(&*self.db)
                .await?;
            if res.rows_affected != 1 {
                // Another worker won the race.
                continue;
            }

            let id = JobId(row.id);
            match serde_json::from_str::<CreateQuizJob>(&row.params_json) {
                Ok(args) => return Ok(Some(ClaimedJob { id, args, attempt })),
                Err(err) => {
                    tracing::warn!(job_id = %id, %err, "discarding job with unreadable payload");
                    self.fail(Lease { id, attempt }, &format!("unreadable job payload: {err}"))
                        .await?;
                }
            }
        }
    }

    fn leased(lease: Lease) -> Condition {
        Condition::all()
            .add(generation_jobs::Column::Id.eq(lease.id.0))
            .add(generation_jobs::Column::AttemptCount.eq(lease.attempt))
            .add(generation_jobs::Column::StartedAt.is_not_null())
            .add(generation_jobs::Column::State.is_in(ACTIVE_STATES))
    }

    /// Keeps a running delivery from looking stale. Returns false once the
    /// delivery no longer owns the job.
    pub async fn heartbeat(&self, lease: Lease) -> Result<bool, QueueError> {
        let res = generation_jobs::Entity::update_many()
            .col_expr(generation_jobs::Column::UpdatedAt, Expr::value(now()))
            .filter(Self::leased(lease))
            .exec(&*self.db)
            .await?;
        Ok(res.rows_affected == 1)
    }

    /// Moves the job to PROGRESS. Reported progress never moves backwards, also
    /// across redeliveries: a new delivery shows up once it passes the old count.
    pub async fn record_progress(
        &self,
        lease: Lease,
        progress: Progress,
    ) -> Result<bool, QueueError> {
        let current = progress.current as i32;
        let res = generation_jobs::Entity::update_many()
            .col_expr(
                generation_jobs::Column::State,
                Expr::value(JobState::Progress.as_str()),
            )
            .col_expr(generation_jobs::Column::ProgressCurrent, Expr::value(current))
            .col_expr(
                generation_jobs::Column::ProgressTotal,
                Expr::value(progress.total as i32),
            )
            .col_expr(generation_jobs::Column::UpdatedAt, Expr::value(now()))
            .filter(Self::leased(lease))
            .filter(
                Condition::any()
                    .add(generation_jobs::Column::ProgressCurrent.is_null())
                    .add(generation_jobs::Column::ProgressCurrent.lte(current)),
            )
            .exec(&*self.db)
            .await?;
        Ok(res.rows_affected == 1)
    }

    /// Terminal SUCCESS. Returns false if the job was already terminal or the
    /// lease was superseded.
    pub async fn complete(&self, lease: Lease, result: &JobResult) -> Result<bool, QueueError> {
        let result_json = serde_json::to_string(result)?;
        self.finish(lease, JobState::Success, Some(result_json), None, None)
            .await
    }

    /// Terminal FAILURE. Returns false if the job was already terminal or the
    /// lease was superseded.
    pub async fn fail(&self, lease: Lease, message: &str) -> Result<bool, QueueError> {
        self.finish(lease, JobState::Failure, None, Some(message.to_string()), None)
            .await
    }

    async fn finish(
        &self,
        lease: Lease,
        state: JobState,
        result_json: Option<String>,
        error: Option<String>,
        unchanged_since: Option<DateTimeWithTimeZone>,
    ) -> Result<bool, QueueError> {
        let at = now();
        let mut update = generation_jobs::Entity::update_many()
            .col_expr(generation_jobs::Column::State, Expr::value(state.as_str()))
            .col_expr(generation_jobs::Column::ResultJson, Expr::value(result_json))
            .col_expr(generation_jobs::Column::Error, Expr::value(error))
            .col_expr(generation_jobs::Column::FinishedAt, Expr::value(at))
            .col_expr(generation_jobs::Column::UpdatedAt, Expr::value(at))
            .filter(Self::leased(lease));
        if let Some(seen) = unchanged_since {
            update = update.filter(generation_jobs::Column::UpdatedAt.eq(seen));
        }
        let res = update.exec(&*self.db).await?;

        let transitioned = res.rows_affected == 1;
        if !transitioned {
            tracing::warn!(job_id = %lease.id, attempt = lease.attempt, %state, "job no longer held by this delivery; ignoring transition");
        }
        Ok(transitioned)
    }

    /// Releases claimed jobs that stopped reporting for longer than `stale_after`
    /// so another worker can pick them up. Jobs that used up `max_attempts` are
    /// failed instead. State and progress are left as they were, so a poller
    /// keeps seeing the last reported progress.
    pub async fn requeue_stale(
        &self,
        stale_after: Duration,
        max_attempts: i32,
    ) -> Result<StaleSweep, QueueError> {
        let stale_after =
            chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::days(1));
        let cutoff: DateTimeWithTimeZone = (chrono::Utc::now() - stale_after).into();

        let rows = generation_jobs::Entity::find()
            .filter(generation_jobs::Column::State.is_in(ACTIVE_STATES))
            .filter(generation_jobs::Column::StartedAt.is_not_null())
            .filter(generation_jobs::Column::UpdatedAt.lt(cutoff))
            .all(&*self.db)
            .await?;

        let mut sweep = StaleSweep::default();
        for row in rows {
            let lease = Lease {
                id: JobId(row.id),
                attempt: row.attempt_count,
            };
            if row.attempt_count >= max_attempts {
                let message = format!("job abandoned after {} attempts", row.attempt_count);
                if self
                    .finish(lease, JobState::Failure, None, Some(message), Some(row.updated_at))
                    .await?
                {
                    tracing::warn!(job_id = %lease.id, attempts = row.attempt_count, "generation job abandoned");
                    if let Ok(args) = serde_json::from_str::<CreateQuizJob>(&row.params_json) {
                        sweep.abandoned.push(ClaimedJob {
                            id: lease.id,
                            args,
                            attempt: row.attempt_count,
                        });
                    }
                }
                continue;
            }

            let res = generation_jobs::Entity::update_many()
                .col_expr(
                    generation_jobs::Column::StartedAt,
                    Expr::value(Option::<DateTimeWithTimeZone>::None),
                )
                .col_expr(generation_jobs::Column::UpdatedAt, Expr::value(now()))
                .filter(Self::leased(lease))
                .filter(generation_jobs::Column::UpdatedAt.eq(row.updated_at))
                .exec(&*self.db)
                .await?;
            if res.rows_affected == 1 {
                tracing::info!(job_id = %lease.id, attempts = row.attempt_count, "stale generation job requeued");
                sweep.requeued += 1;
            }
        }

        if sweep.requeued > 0 {
            self.wake.notify_one();
        }
        Ok(sweep)
    }

    /// Parks the caller until a submission arrives or `timeout` elapses.
    pub async fn wait_for_work(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.wake.notified()).await;
    }
}
