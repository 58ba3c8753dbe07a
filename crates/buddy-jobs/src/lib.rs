use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Opaque, globally unique identifier of one quiz-generation job.
///
/// NOTE: Clients only ever see the string form; the store keys rows by the uuid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct JobId(pub uuid::Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Lenient parse used by status lookups: anything that is not a uuid is simply unknown.
    pub fn parse(raw: &str) -> Option<Self> {
        uuid::Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Progress,
    Success,
    Failure,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Progress => "PROGRESS",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownJobState(pub String);

impl fmt::Display for UnknownJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown job state: {}", self.0)
    }
}

impl std::error::Error for UnknownJobState {}

impl FromStr for JobState {
    type Err = UnknownJobState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "PENDING" => Ok(JobState::Pending),
            "PROGRESS" => Ok(JobState::Progress),
            "SUCCESS" => Ok(JobState::Success),
            "FAILURE" => Ok(JobState::Failure),
            other => Err(UnknownJobState(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
}

/// Arguments of a quiz-generation job, captured at submission time.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CreateQuizJob {
    pub user_id: i32,
    pub subject_id: i32,
    pub title: String,
    pub success_percentage: i32,
    pub description: Option<String>,
    pub duration: i32,
    pub number_of_questions: u32,
    pub file_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResultDetails {
    pub response_message: String,
    pub response_code: i32,
}

/// Result payload stored on a job that finished at the queue level.
///
/// `quiz_id == None` is the business failure: the job ran, but nothing usable came back.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct JobResult {
    pub message: String,
    pub quiz_id: Option<i32>,
    pub details: ResultDetails,
}

impl JobResult {
    pub fn created(quiz_id: i32, response_code: i32, response_message: impl Into<String>) -> Self {
        Self {
            message: "Quiz created successfully.".to_string(),
            quiz_id: Some(quiz_id),
            details: ResultDetails {
                response_message: response_message.into(),
                response_code,
            },
        }
    }

    pub fn empty(response_code: i32, response_message: impl Into<String>) -> Self {
        Self {
            message: "Error during quiz creation".to_string(),
            quiz_id: None,
            details: ResultDetails {
                response_message: response_message.into(),
                response_code,
            },
        }
    }
}

/// Client-facing status payload.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct JobStatus {
    pub ready: bool,
    pub successful: bool,
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

impl JobStatus {
    pub fn pending() -> Self {
        Self {
            ready: false,
            successful: false,
            value: None,
            progress: None,
        }
    }
}
