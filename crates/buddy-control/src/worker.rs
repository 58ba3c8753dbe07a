use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use buddy_db::entities::subjects;
use buddy_jobs::{JobId, JobResult, Progress};
use sea_orm::{DatabaseConnection, DbErr, EntityTrait};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::config::WorkerConfig;
use crate::documents::DocumentStore;
use crate::generation::{GenerationError, QuestionGenerator};
use crate::materializer::{self, JobFence, MaterializeError, QuizDraft, QuizHeader};
use crate::queue::{ClaimedJob, JobQueue, Lease, QueueError};

/// Collaborators shared by every job execution, built once at process start.
pub struct PipelineContext {
    pub db: Arc<DatabaseConnection>,
    pub documents: DocumentStore,
    pub generator: Arc<dyn QuestionGenerator>,
}

/// Why a job ended in queue-level FAILURE.
#[derive(Debug, thiserror::Error)]
pub enum JobFault {
    #[error("invalid subject id {0}")]
    SubjectNotFound(i32),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error("job store error: {0}")]
    Store(#[from] DbErr),
}

/// How a job that did not fault ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Created {
        quiz_id: i32,
        response_code: i32,
        response_message: String,
    },
    /// The service answered but produced no usable questions.
    Empty {
        response_code: i32,
        response_message: String,
    },
}

impl From<JobOutcome> for JobResult {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Created {
                quiz_id,
                response_code,
                response_message,
            } => JobResult::created(quiz_id, response_code, response_message),
            JobOutcome::Empty {
                response_code,
                response_message,
            } => JobResult::empty(response_code, response_message),
        }
    }
}

#[derive(Clone)]
pub struct Worker {
    ctx: Arc<PipelineContext>,
    queue: JobQueue,
    settings: WorkerConfig,
}

impl Worker {
    pub fn new(ctx: Arc<PipelineContext>, queue: JobQueue, settings: WorkerConfig) -> Self {
        Self {
            ctx,
            queue,
            settings,
        }
    }

    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        (0..self.settings.concurrency)
            .map(|slot| {
                let worker = self.clone();
                tokio::spawn(async move { worker.run_loop(slot).await })
            })
            .collect()
    }

    async fn run_loop(self, slot: usize) {
        tracing::info!(slot, "generation worker started");
        // Slot 0 also plays the broker's visibility timeout.
        let sweep_every = self.settings.stale_after / 4;
        let mut last_sweep: Option<Instant> = None;

        loop {
            if slot == 0 && last_sweep.is_none_or(|t| t.elapsed() >= sweep_every) {
                self.sweep().await;
                last_sweep = Some(Instant::now());
            }

            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => self.queue.wait_for_work(self.settings.poll_interval).await,
                Err(err) => {
                    tracing::warn!(slot, %err, "failed to poll generation queue");
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
            }
        }
    }

    /// Requeues stale jobs and cleans up after the ones given up on.
    pub async fn sweep(&self) {
        match self
            .queue
            .requeue_stale(self.settings.stale_after, self.settings.max_attempts)
            .await
        {
            Ok(sweep) => {
                for job in sweep.abandoned {
                    self.ctx.documents.delete(&job.args.file_paths).await;
                }
            }
            Err(err) => tracing::warn!(%err, "stale job sweep failed"),
        }
    }

    /// Claims and runs at most one job.
    pub async fn run_once(&self) -> Result<Option<JobId>, QueueError> {
        let Some(job) = self.queue.claim_next().await? else {
            return Ok(None);
        };
        let id = job.id;
        self.run_job(job).await?;
        Ok(Some(id))
    }

    /// Runs one claimed job to a terminal state. Uploaded files are removed on
    /// every exit path before the terminal state is recorded.
    ///
    /// A delivery that lost its lease while running leaves both to the sweep or
    /// to the delivery that replaced it.
    pub async fn run_job(&self, job: ClaimedJob) -> Result<(), QueueError> {
        let span = tracing::info_span!("generation_job", job_id = %job.id, attempt = job.attempt);
        async move {
            let started = Instant::now();
            let lease = job.lease();
            let outcome = self.with_heartbeat(lease, self.execute(&job)).await;

            let superseded = matches!(
                outcome,
                Err(JobFault::Materialize(MaterializeError::Superseded(_)))
            );
            if superseded || !self.queue.heartbeat(lease).await? {
                tracing::warn!("job was taken over by another delivery; dropping this one");
                return Ok(());
            }

            self.ctx.documents.delete(&job.args.file_paths).await;

            match outcome {
                Ok(outcome) => {
                    match &outcome {
                        JobOutcome::Created { quiz_id, .. } => {
                            tracing::info!(quiz_id, elapsed_ms = started.elapsed().as_millis() as u64, "quiz generated");
                        }
                        JobOutcome::Empty {
                            response_code,
                            response_message,
                        } => {
                            tracing::warn!(response_code, %response_message, "generation produced no questions");
                        }
                    }
                    self.queue.complete(lease, &JobResult::from(outcome)).await?;
                }
                Err(fault) => {
                    tracing::warn!(%fault, "generation job failed");
                    self.queue.fail(lease, &fault.to_string()).await?;
                }
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Drives `work` while refreshing the lease often enough that a sweep with
    /// the configured `stale_after` never sees the job as stale.
    async fn with_heartbeat<F: Future>(&self, lease: Lease, work: F) -> F::Output {
        let every = (self.settings.stale_after / 4).max(Duration::from_millis(10));
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the claim just stamped the row.
        ticker.tick().await;

        tokio::pin!(work);
        let mut held = true;
        loop {
            tokio::select! {
                out = &mut work => return out,
                _ = ticker.tick() => match self.queue.heartbeat(lease).await {
                    Ok(true) => {}
                    Ok(false) => {
                        if held {
                            tracing::warn!("job lease lost while running");
                        }
                        held = false;
                    }
                    Err(err) => tracing::warn!(%err, "failed to refresh job heartbeat"),
                },
            }
        }
    }

    async fn execute(&self, job: &ClaimedJob) -> Result<JobOutcome, JobFault> {
        let db = &*self.ctx.db;
        let args = &job.args;

        if subjects::Entity::find_by_id(args.subject_id)
            .one(db)
            .await?
            .is_none()
        {
            return Err(JobFault::SubjectNotFound(args.subject_id));
        }

        // A redelivery after a crash past commit must not generate a second quiz.
        if let Some(quiz_id) = materializer::find_quiz_for_job(db, job.id.0).await? {
            return Ok(JobOutcome::Created {
                quiz_id,
                response_code: 200,
                response_message: "quiz already created by an earlier attempt".to_string(),
            });
        }

        let generation = self
            .ctx
            .generator
            .generate(&args.file_paths, args.number_of_questions)
            .await?;

        if generation.questions.is_empty() {
            return Ok(JobOutcome::Empty {
                response_code: generation.status_code,
                response_message: generation.status_message,
            });
        }

        let total = generation.questions.len() as u32;
        let mut draft = QuizDraft::new(QuizHeader {
            title: args.title.clone(),
            subject_id: args.subject_id,
            owner_id: args.user_id,
            success_percentage: args.success_percentage,
            duration: args.duration,
            description: args.description.clone(),
        });
        let lease = job.lease();
        for question in generation.questions {
            let current = draft.push(question) as u32;
            if let Err(err) = self
                .queue
                .record_progress(lease, Progress { current, total })
                .await
            {
                tracing::warn!(%err, current, total, "failed to record job progress");
            }
        }

        let fence = JobFence {
            job_id: job.id.0,
            attempt: job.attempt,
        };
        let quiz_id = draft.commit(db, Some(fence)).await?;
        Ok(JobOutcome::Created {
            quiz_id,
            response_code: generation.status_code,
            response_message: generation.status_message,
        })
    }
}
