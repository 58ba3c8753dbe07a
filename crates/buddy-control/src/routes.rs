use std::collections::HashMap;

use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use buddy_jobs::JobStatus;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::documents::DocumentError;
use crate::error::ApiError;
use crate::job_status;
use crate::materializer::{self, QuizView};
use crate::security::{self, RequestMeta};
use crate::state::AppState;
use crate::submission::{self, CreateQuizRequest, StagedDocuments, SubmitError};

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/result/:id", get(job_result))
        .route("/api/quizzing/quizzes", post(create_quiz))
        .route("/api/quizzing/quizzes/:id", get(get_quiz))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(middleware::from_fn(security::request_id))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
    version: &'static str,
}

async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
pub struct TaskAccepted {
    pub task_id: String,
}

fn submit_error(err: SubmitError, request_id: &str) -> ApiError {
    let api = match err {
        SubmitError::Invalid(fields) => {
            ApiError::bad_request("invalid_param", "invalid quiz request").with_fields(fields)
        }
        SubmitError::UnknownSubject(_) => ApiError::bad_request("invalid_subject", "Invalid subject id"),
        SubmitError::NoFiles => ApiError::bad_request("no_files", "No files part in the request")
            .with_hint("attach at least one document as a `file` field"),
        SubmitError::Document(DocumentError::MissingName) => {
            ApiError::bad_request("no_selected_file", "No selected file")
        }
        SubmitError::Document(err @ DocumentError::InvalidExtension { .. }) => {
            ApiError::bad_request("invalid_extension", err.to_string())
        }
        SubmitError::Document(err @ DocumentError::Interrupted(_)) => {
            ApiError::bad_request("invalid_body", err.to_string())
        }
        SubmitError::Document(err @ DocumentError::Io(_)) => ApiError::internal(err.to_string()),
        SubmitError::Queue(err) => ApiError::internal(err.to_string()),
        SubmitError::Db(err) => ApiError::internal(format!("db error: {err}")),
    };
    api.with_request_id(request_id)
}

/// Reads the multipart body, streaming every `file` field to disk as it arrives.
async fn read_quiz_form(
    multipart: &mut Multipart,
    staged: &mut StagedDocuments<'_>,
    request_id: &str,
) -> Result<HashMap<String, String>, ApiError> {
    let bad_body = |e: axum::extract::multipart::MultipartError| {
        ApiError::new(e.status(), "invalid_body", e.body_text()).with_request_id(request_id)
    };

    let mut fields = HashMap::new();
    while let Some(field) = multipart.next_field().await.map_err(bad_body)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            staged
                .stage(field, &file_name)
                .await
                .map_err(|e| submit_error(e, request_id))?;
        } else {
            let value = field.text().await.map_err(bad_body)?;
            fields.insert(name, value);
        }
    }
    Ok(fields)
}

async fn create_quiz(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<TaskAccepted>), ApiError> {
    let mut staged = StagedDocuments::new(&state.documents);
    let fields = match read_quiz_form(&mut multipart, &mut staged, &meta.request_id).await {
        Ok(fields) => fields,
        Err(err) => {
            staged.discard().await;
            return Err(err);
        }
    };

    let request = match CreateQuizRequest::from_form(&fields, state.max_questions) {
        Ok(request) => request,
        Err(errors) => {
            staged.discard().await;
            return Err(submit_error(SubmitError::Invalid(errors), &meta.request_id));
        }
    };

    let job_id = submission::submit_quiz(&state.db, &state.queue, user.user_id, request, staged)
        .await
        .map_err(|e| submit_error(e, &meta.request_id))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAccepted {
            task_id: job_id.to_string(),
        }),
    ))
}

async fn job_result(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    job_status::status(&state.queue, &id)
        .await
        .map(Json)
        .map_err(|e| ApiError::internal(e.to_string()).with_request_id(&meta.request_id))
}

async fn get_quiz(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    user: AuthUser,
    Path(quiz_id): Path<i32>,
) -> Result<Json<QuizView>, ApiError> {
    let quiz = materializer::load_quiz(&state.db, quiz_id)
        .await
        .map_err(|e| ApiError::internal(format!("db error: {e}")).with_request_id(&meta.request_id))?
        .ok_or_else(|| {
            ApiError::new(StatusCode::NOT_FOUND, "not_found", "quiz not found")
                .with_request_id(&meta.request_id)
        })?;

    if quiz.created_by_id != user.user_id {
        return Err(
            ApiError::new(StatusCode::FORBIDDEN, "forbidden", "Unauthorized")
                .with_request_id(&meta.request_id),
        );
    }
    Ok(Json(quiz))
}
