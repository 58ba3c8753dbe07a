use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use buddy_db::entities::subjects;
use buddy_jobs::{CreateQuizJob, JobId};
use futures_util::Stream;
use sea_orm::{DatabaseConnection, DbErr, EntityTrait};

use crate::documents::{DocumentError, DocumentStore};
use crate::queue::{JobQueue, QueueError};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("invalid quiz request")]
    Invalid(BTreeMap<String, String>),
    #[error("Invalid subject id")]
    UnknownSubject(i32),
    #[error("No files part in the request")]
    NoFiles,
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("db error: {0}")]
    Db(#[from] DbErr),
}

/// Documents written for one submission so far. Whoever gives up on the
/// submission calls [`StagedDocuments::discard`].
pub struct StagedDocuments<'a> {
    documents: &'a DocumentStore,
    paths: Vec<PathBuf>,
}

impl<'a> StagedDocuments<'a> {
    pub fn new(documents: &'a DocumentStore) -> Self {
        Self {
            documents,
            paths: Vec::new(),
        }
    }

    pub async fn stage<S, B, E>(&mut self, chunks: S, original_name: &str) -> Result<(), SubmitError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let path = self.documents.store(chunks, original_name).await?;
        self.paths.push(path);
        Ok(())
    }

    pub async fn discard(self) {
        self.documents.delete(&self.paths).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateQuizRequest {
    pub subject_id: i32,
    pub title: String,
    pub success_percentage: i32,
    pub description: Option<String>,
    pub duration: i32,
    pub number_of_questions: u32,
}

impl CreateQuizRequest {
    /// Validates the text fields of the quiz form, collecting one message per bad field.
    pub fn from_form(
        form: &HashMap<String, String>,
        max_questions: u32,
    ) -> Result<Self, BTreeMap<String, String>> {
        let mut errors = BTreeMap::new();
        let field = |name: &str| form.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

        let subject_id = match field("subject_id").map(str::parse::<i32>) {
            Some(Ok(v)) => Some(v),
            Some(Err(_)) => {
                errors.insert("subject_id".to_string(), "must be an integer".to_string());
                None
            }
            None => {
                errors.insert("subject_id".to_string(), "is required".to_string());
                None
            }
        };

        let title = field("title").map(str::to_string);
        if title.is_none() {
            errors.insert("title".to_string(), "is required".to_string());
        }

        let success_percentage = match field("success_percentage").map(str::parse::<i32>) {
            Some(Ok(v)) if (0..=100).contains(&v) => Some(v),
            Some(_) => {
                errors.insert(
                    "success_percentage".to_string(),
                    "must be between 0 and 100".to_string(),
                );
                None
            }
            None => {
                errors.insert("success_percentage".to_string(), "is required".to_string());
                None
            }
        };

        let duration = match field("duration").map(str::parse::<i32>) {
            Some(Ok(v)) if v > 0 => Some(v),
            Some(_) => {
                errors.insert("duration".to_string(), "must be a positive integer".to_string());
                None
            }
            None => {
                errors.insert("duration".to_string(), "is required".to_string());
                None
            }
        };

        let number_of_questions = match field("number_of_questions").map(str::parse::<u32>) {
            Some(Ok(v)) if (1..=max_questions).contains(&v) => Some(v),
            Some(_) => {
                errors.insert(
                    "number_of_questions".to_string(),
                    format!("must be between 1 and {max_questions}"),
                );
                None
            }
            None => {
                errors.insert("number_of_questions".to_string(), "is required".to_string());
                None
            }
        };

        match (subject_id, title, success_percentage, duration, number_of_questions) {
            (
                Some(subject_id),
                Some(title),
                Some(success_percentage),
                Some(duration),
                Some(number_of_questions),
            ) if errors.is_empty() => Ok(Self {
                subject_id,
                title,
                success_percentage,
                description: field("description").map(str::to_string),
                duration,
                number_of_questions,
            }),
            _ => Err(errors),
        }
    }
}

/// Synchronous half of quiz creation: check the subject, then enqueue the staged
/// documents. Nothing is queued on rejection and the staged documents are
/// removed again.
pub async fn submit_quiz(
    db: &DatabaseConnection,
    queue: &JobQueue,
    user_id: i32,
    request: CreateQuizRequest,
    staged: StagedDocuments<'_>,
) -> Result<JobId, SubmitError> {
    let subject = match subjects::Entity::find_by_id(request.subject_id).one(db).await {
        Ok(subject) => subject,
        Err(err) => {
            staged.discard().await;
            return Err(err.into());
        }
    };
    if subject.is_none() {
        staged.discard().await;
        return Err(SubmitError::UnknownSubject(request.subject_id));
    }
    if staged.paths.is_empty() {
        return Err(SubmitError::NoFiles);
    }

    let job = CreateQuizJob {
        user_id,
        subject_id: request.subject_id,
        title: request.title,
        success_percentage: request.success_percentage,
        description: request.description,
        duration: request.duration,
        number_of_questions: request.number_of_questions,
        file_paths: staged.paths.clone(),
    };

    match queue.submit(&job).await {
        Ok(id) => Ok(id),
        Err(err) => {
            staged.discard().await;
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn complete_form_parses() {
        let req = CreateQuizRequest::from_form(
            &form(&[
                ("subject_id", "3"),
                ("title", " Cells "),
                ("success_percentage", "60"),
                ("duration", "15"),
                ("number_of_questions", "5"),
            ]),
            50,
        )
        .unwrap();
        assert_eq!(req.subject_id, 3);
        assert_eq!(req.title, "Cells");
        assert_eq!(req.description, None);
        assert_eq!(req.number_of_questions, 5);
    }

    #[test]
    fn every_bad_field_is_reported() {
        let errors = CreateQuizRequest::from_form(
            &form(&[
                ("subject_id", "abc"),
                ("success_percentage", "101"),
                ("duration", "0"),
                ("number_of_questions", "51"),
            ]),
            50,
        )
        .unwrap_err();
        assert_eq!(
            errors.keys().map(String::as_str).collect::<Vec<_>>(),
            vec![
                "duration",
                "number_of_questions",
                "subject_id",
                "success_percentage",
                "title"
            ]
        );
    }
}
