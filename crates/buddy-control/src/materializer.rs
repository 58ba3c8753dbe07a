use buddy_db::entities::{answers, generation_jobs, questions, quizzes};
use buddy_jobs::JobState;
use sea_orm::prelude::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use uuid::Uuid;

use crate::generation::GeneratedQuestion;

#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("storage failure: {0}")]
    Storage(#[from] DbErr),
    #[error("job {0} was taken over by a newer delivery")]
    Superseded(Uuid),
}

/// The delivery a quiz is written for. The commit only goes through while that
/// delivery still owns the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobFence {
    pub job_id: Uuid,
    pub attempt: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizHeader {
    pub title: String,
    pub subject_id: i32,
    pub owner_id: i32,
    pub success_percentage: i32,
    pub duration: i32,
    pub description: Option<String>,
}

/// A quiz assembled in memory, one question at a time, before anything is written.
#[derive(Debug, Clone)]
pub struct QuizDraft {
    header: QuizHeader,
    questions: Vec<GeneratedQuestion>,
}

impl QuizDraft {
    pub fn new(header: QuizHeader) -> Self {
        Self {
            header,
            questions: Vec::new(),
        }
    }

    /// Appends a question and returns how many the draft now holds.
    pub fn push(&mut self, question: GeneratedQuestion) -> usize {
        self.questions.push(question);
        self.questions.len()
    }

    /// Writes the whole draft in one transaction and returns the quiz id.
    ///
    /// With a `fence`, the job row is locked for the transaction and checked to
    /// still belong to that delivery, and a quiz already committed for the job is
    /// returned instead of inserting a second one.
    pub async fn commit(
        self,
        db: &DatabaseConnection,
        fence: Option<JobFence>,
    ) -> Result<i32, MaterializeError> {
        let txn = db.begin().await?;
        match self.write(&txn, fence).await {
            Ok(quiz_id) => {
                txn.commit().await?;
                Ok(quiz_id)
            }
            Err(err) => {
                if let Err(rollback) = txn.rollback().await {
                    tracing::warn!(%rollback, "quiz transaction rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn write(
        self,
        txn: &DatabaseTransaction,
        fence: Option<JobFence>,
    ) -> Result<i32, MaterializeError> {
        if let Some(fence) = fence {
            hold_fence(txn, fence).await?;
            if let Some(existing) = quiz_for_job(txn, fence.job_id).await? {
                tracing::info!(job_id = %fence.job_id, quiz_id = existing, "quiz already materialized for job");
                return Ok(existing);
            }
        }
        let job_id = fence.map(|f| f.job_id);

        let quiz = quizzes::ActiveModel {
            title: Set(self.header.title),
            success_percentage: Set(self.header.success_percentage),
            description: Set(self.header.description),
            duration: Set(self.header.duration),
            created_by_id: Set(self.header.owner_id),
            subject_id: Set(self.header.subject_id),
            generation_job_id: Set(job_id),
            created_at: Set(chrono::Utc::now().into()),
            ..Default::default()
        }
        .insert(txn)
        .await?;

        for (position, q) in self.questions.into_iter().enumerate() {
            let question = questions::ActiveModel {
                title: Set(q.title),
                quiz_id: Set(quiz.id),
                position: Set(position as i32),
                ..Default::default()
            }
            .insert(txn)
            .await?;

            let rows: Vec<answers::ActiveModel> = q
                .answers
                .into_iter()
                .enumerate()
                .map(|(position, a)| answers::ActiveModel {
                    title: Set(a.title),
                    is_correct: Set(a.is_correct),
                    question_id: Set(question.id),
                    position: Set(position as i32),
                    ..Default::default()
                })
                .collect();
            if !rows.is_empty() {
                answers::Entity::insert_many(rows).exec(txn).await?;
            }
        }

        Ok(quiz.id)
    }
}

/// Persists a quiz with all of its generated questions atomically.
pub async fn materialize(
    db: &DatabaseConnection,
    header: QuizHeader,
    generated: Vec<GeneratedQuestion>,
    fence: Option<JobFence>,
) -> Result<i32, MaterializeError> {
    let mut draft = QuizDraft::new(header);
    for q in generated {
        draft.push(q);
    }
    draft.commit(db, fence).await
}

// Touching the row takes its write lock until the transaction ends, so a stale
// sweep cannot release or fail the job between this check and the commit.
async fn hold_fence(txn: &DatabaseTransaction, fence: JobFence) -> Result<(), MaterializeError> {
    let res = generation_jobs::Entity::update_many()
        .col_expr(
            generation_jobs::Column::UpdatedAt,
            Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(chrono::Utc::now())),
        )
        .filter(generation_jobs::Column::Id.eq(fence.job_id))
        .filter(generation_jobs::Column::AttemptCount.eq(fence.attempt))
        .filter(generation_jobs::Column::StartedAt.is_not_null())
        .filter(
            generation_jobs::Column::State
                .is_in([JobState::Pending.as_str(), JobState::Progress.as_str()]),
        )
        .exec(txn)
        .await?;
    if res.rows_affected == 1 {
        Ok(())
    } else {
        Err(MaterializeError::Superseded(fence.job_id))
    }
}

async fn quiz_for_job<C: ConnectionTrait>(conn: &C, job_id: Uuid) -> Result<Option<i32>, DbErr> {
    Ok(quizzes::Entity::find()
        .filter(quizzes::Column::GenerationJobId.eq(job_id))
        .one(conn)
        .await?
        .map(|q| q.id))
}

pub async fn find_quiz_for_job(db: &DatabaseConnection, job_id: Uuid) -> Result<Option<i32>, DbErr> {
    quiz_for_job(db, job_id).await
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerView {
    pub id: i32,
    pub title: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionView {
    pub id: i32,
    pub title: String,
    pub answers: Vec<AnswerView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuizView {
    pub id: i32,
    pub subject_id: i32,
    pub title: String,
    pub success_percentage: i32,
    pub description: Option<String>,
    pub duration: i32,
    #[serde(skip)]
    pub created_by_id: i32,
    pub questions: Vec<QuestionView>,
}

/// Reads a quiz back with questions and answers in generation order.
pub async fn load_quiz(db: &DatabaseConnection, quiz_id: i32) -> Result<Option<QuizView>, DbErr> {
    let Some(quiz) = quizzes::Entity::find_by_id(quiz_id).one(db).await? else {
        return Ok(None);
    };

    let rows = questions::Entity::find()
        .filter(questions::Column::QuizId.eq(quiz.id))
        .order_by_asc(questions::Column::Position)
        .order_by_asc(questions::Column::Id)
        .find_with_related(answers::Entity)
        .order_by_asc(answers::Column::Position)
        .order_by_asc(answers::Column::Id)
        .all(db)
        .await?;

    let questions = rows
        .into_iter()
        .map(|(q, answers)| QuestionView {
            id: q.id,
            title: q.title,
            answers: answers
                .into_iter()
                .map(|a| AnswerView {
                    id: a.id,
                    title: a.title,
                    is_correct: a.is_correct,
                })
                .collect(),
        })
        .collect();

    Ok(Some(QuizView {
        id: quiz.id,
        subject_id: quiz.subject_id,
        title: quiz.title,
        success_percentage: quiz.success_percentage,
        description: quiz.description,
        duration: quiz.duration,
        created_by_id: quiz.created_by_id,
        questions,
    }))
}
