use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::text_extract::{self, ExtractError};

const MAX_ERROR_BODY_CHARS: usize = 2_000;
const STATUS_OK: i32 = 200;
const STATUS_NO_TEXT: i32 = 422;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    pub title: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub title: String,
    pub answers: Vec<GeneratedAnswer>,
}

/// What the external service handed back. An empty `questions` list is a valid
/// answer (the service declined), not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub questions: Vec<GeneratedQuestion>,
    pub status_code: i32,
    pub status_message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation API credential is not configured")]
    MissingCredential,
    #[error(transparent)]
    Document(#[from] ExtractError),
    #[error("generation request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("generation service rate limited the request (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },
    #[error("generation service returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("generation service returned an unusable response: {0}")]
    MalformedResponse(String),
}

/// Boundary to the question-generating service.
#[async_trait::async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate(
        &self,
        file_paths: &[PathBuf],
        num_questions: u32,
    ) -> Result<Generation, GenerationError>;
}

/// OpenAI-compatible chat-completions client.
pub struct OpenAiGenerator {
    http: reqwest::Client,
    config: GenerationConfig,
}

impl OpenAiGenerator {
    pub fn new(config: GenerationConfig) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("exam-buddy/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    async fn complete(&self, system: &str, user: String) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.config.api_base);
        let body = ChatRequest {
            model: &self.config.model,
            temperature: 0.2,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: vec![
                ChatRequestMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatRequestMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(GenerationError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Upstream {
                status: status.as_u16(),
                body: text_extract::truncate_chars(&body, MAX_ERROR_BODY_CHARS),
            });
        }

        let raw = resp.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&raw)
            .map_err(|e| GenerationError::MalformedResponse(format!("envelope: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| GenerationError::MalformedResponse("empty completion".to_string()))
    }
}

#[async_trait::async_trait]
impl QuestionGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        file_paths: &[PathBuf],
        num_questions: u32,
    ) -> Result<Generation, GenerationError> {
        if self.config.api_key.trim().is_empty() {
            return Err(GenerationError::MissingCredential);
        }

        let text = text_extract::extract_all(file_paths, self.config.max_document_chars).await?;
        if text.trim().is_empty() {
            return Ok(Generation {
                questions: Vec::new(),
                status_code: STATUS_NO_TEXT,
                status_message: "the uploaded documents contain no extractable text".to_string(),
            });
        }

        tracing::debug!(
            model = %self.config.model,
            chars = text.chars().count(),
            num_questions,
            "requesting quiz questions"
        );

        let content = self
            .complete(SYSTEM_PROMPT, user_prompt(&text, num_questions))
            .await?;
        parse_generation(&content)
    }
}

const SYSTEM_PROMPT: &str = "You write multiple-choice quiz questions strictly from the \
provided study material. Reply with a single JSON object of the form \
{\"code\": <int>, \"message\": <string>, \"questions\": [{\"title\": <string>, \
\"answers\": [{\"title\": <string>, \"is_correct\": <bool>}]}]}. Use code 200 when \
questions were produced. When the material is unsuitable, use code 400, explain why \
in message and return an empty questions array.";

fn user_prompt(text: &str, num_questions: u32) -> String {
    format!(
        "Write {num_questions} questions. Each question has four answers and exactly one \
         correct answer.\n\nStudy material:\n{text}"
    )
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<ChatRequestMessage>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequestMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerationPayload {
    code: Option<i32>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    questions: Vec<RawQuestion>,
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(default)]
    title: String,
    #[serde(default)]
    answers: Vec<RawAnswer>,
}

#[derive(Debug, Deserialize)]
struct RawAnswer {
    #[serde(default)]
    title: String,
    #[serde(default)]
    is_correct: bool,
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parses the model's JSON reply. Blank questions and answers are dropped, as are
/// questions left without answers; correctness of the answer set is not enforced.
pub(crate) fn parse_generation(content: &str) -> Result<Generation, GenerationError> {
    let payload: GenerationPayload = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| GenerationError::MalformedResponse(format!("payload: {e}")))?;

    let questions: Vec<GeneratedQuestion> = payload
        .questions
        .into_iter()
        .filter_map(|q| {
            let title = q.title.trim().to_string();
            let answers: Vec<GeneratedAnswer> = q
                .answers
                .into_iter()
                .filter(|a| !a.title.trim().is_empty())
                .map(|a| GeneratedAnswer {
                    title: a.title.trim().to_string(),
                    is_correct: a.is_correct,
                })
                .collect();
            (!title.is_empty() && !answers.is_empty()).then_some(GeneratedQuestion { title, answers })
        })
        .collect();

    let status_message = if payload.message.trim().is_empty() {
        if questions.is_empty() {
            "no questions could be generated from the provided documents".to_string()
        } else {
            "ok".to_string()
        }
    } else {
        payload.message.trim().to_string()
    };

    Ok(Generation {
        status_code: payload.code.unwrap_or(STATUS_OK),
        status_message,
        questions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(api_base: String) -> GenerationConfig {
        GenerationConfig {
            api_key: "sk-test".to_string(),
            api_base,
            model: "test-model".to_string(),
            timeout: Duration::from_secs(5),
            max_document_chars: 10_000,
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
    }

    fn source_doc(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "Photosynthesis turns light into chemical energy.").unwrap();
        path
    }

    #[test]
    fn parse_drops_unusable_entries() {
        let g = parse_generation(
            r#"```json
            {"code": 200, "message": "done", "questions": [
                {"title": "What is 2+2?", "answers": [
                    {"title": "4", "is_correct": true}, {"title": " ", "is_correct": false}]},
                {"title": "", "answers": [{"title": "x", "is_correct": true}]},
                {"title": "No answers", "answers": []}
            ]}
            ```"#,
        )
        .unwrap();

        assert_eq!(g.status_code, 200);
        assert_eq!(g.status_message, "done");
        assert_eq!(g.questions.len(), 1);
        assert_eq!(g.questions[0].answers.len(), 1);
    }

    #[test]
    fn parse_keeps_questions_without_a_correct_answer() {
        let g = parse_generation(
            r#"{"questions": [{"title": "Q", "answers": [{"title": "a", "is_correct": false}]}]}"#,
        )
        .unwrap();
        assert_eq!(g.questions.len(), 1);
        assert!(!g.questions[0].answers[0].is_correct);
    }

    #[test]
    fn parse_empty_list_is_not_an_error() {
        let g = parse_generation(r#"{"code": 400, "message": "too short", "questions": []}"#)
            .unwrap();
        assert!(g.questions.is_empty());
        assert_eq!(g.status_code, 400);
        assert_eq!(g.status_message, "too short");
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(matches!(
            parse_generation("Sure! Here are your questions:"),
            Err(GenerationError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn generate_calls_chat_completions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                r#"{"code": 200, "message": "ok", "questions": [
                    {"title": "What does photosynthesis produce?", "answers": [
                        {"title": "Chemical energy", "is_correct": true},
                        {"title": "Sound", "is_correct": false}]}]}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let generator = OpenAiGenerator::new(config(server.uri())).unwrap();
        let g = generator.generate(&[source_doc(&dir)], 1).await.unwrap();

        assert_eq!(g.questions.len(), 1);
        assert_eq!(g.questions[0].answers[0].title, "Chemical energy");
    }

    #[tokio::test]
    async fn rate_limit_is_a_distinct_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let generator = OpenAiGenerator::new(config(server.uri())).unwrap();
        let err = generator.generate(&[source_doc(&dir)], 3).await.unwrap_err();
        assert!(matches!(err, GenerationError::RateLimited { retry_after: Some(7) }));
    }

    #[tokio::test]
    async fn server_error_is_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let generator = OpenAiGenerator::new(config(server.uri())).unwrap();
        match generator.generate(&[source_doc(&dir)], 3).await.unwrap_err() {
            GenerationError::Upstream { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn garbage_completion_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("not json at all")))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let generator = OpenAiGenerator::new(config(server.uri())).unwrap();
        assert!(matches!(
            generator.generate(&[source_doc(&dir)], 3).await.unwrap_err(),
            GenerationError::MalformedResponse(_)
        ));
    }

    #[tokio::test]
    async fn unreachable_service_is_transport_failure() {
        let dir = tempfile::tempdir().unwrap();
        let generator = OpenAiGenerator::new(config("http://127.0.0.1:9".to_string())).unwrap();
        assert!(matches!(
            generator.generate(&[source_doc(&dir)], 3).await.unwrap_err(),
            GenerationError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn blank_documents_skip_the_service() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let blank = dir.path().join("blank.txt");
        std::fs::write(&blank, "   \n\n").unwrap();

        let generator = OpenAiGenerator::new(config(server.uri())).unwrap();
        let g = generator.generate(&[blank], 3).await.unwrap();
        assert!(g.questions.is_empty());
        assert_eq!(g.status_code, STATUS_NO_TEXT);
    }
}
