use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::text_extract::SUPPORTED_EXTENSIONS;

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_UPLOAD_DIR: &str = "/uploads";
const DEFAULT_ALLOWED_EXTENSIONS: &str = "pdf";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
/// Slack between the generation timeout and the stale threshold, covering
/// extraction and the quiz write that run outside the upstream call.
const STALE_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
    pub max_document_chars: usize,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub stale_after: Duration,
    pub max_attempts: i32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub http_addr: SocketAddr,
    pub upload_dir: PathBuf,
    pub allowed_extensions: BTreeSet<String>,
    pub max_upload_bytes: usize,
    pub max_questions: u32,
    pub jwt_secret: String,
    pub generation: GenerationConfig,
    pub worker: WorkerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let api_key = get("OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;

        let http_addr = get("BUDDY_HTTP_ADDR")
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                name: "BUDDY_HTTP_ADDR",
                reason: e.to_string(),
            })?;

        let allowed_extensions = parse_extensions(
            &get("BUDDY_ALLOWED_EXTENSIONS")
                .unwrap_or_else(|| DEFAULT_ALLOWED_EXTENSIONS.to_string()),
        );
        if allowed_extensions.is_empty() {
            return Err(ConfigError::Invalid {
                name: "BUDDY_ALLOWED_EXTENSIONS",
                reason: "at least one extension is required".to_string(),
            });
        }
        if let Some(ext) = allowed_extensions
            .iter()
            .find(|e| !SUPPORTED_EXTENSIONS.contains(&e.as_str()))
        {
            return Err(ConfigError::Invalid {
                name: "BUDDY_ALLOWED_EXTENSIONS",
                reason: format!(
                    "no text extractor for .{ext} (supported: {})",
                    SUPPORTED_EXTENSIONS.join(", ")
                ),
            });
        }

        let generation_timeout = Duration::from_secs(
            parse_num(&get, "BUDDY_GENERATION_TIMEOUT_SECS", 120u64)?.clamp(5, 3600),
        );
        let stale_after = Duration::from_secs(
            parse_num(&get, "BUDDY_JOB_STALE_SECS", 900u64)?.clamp(30, 86_400),
        );
        if stale_after <= generation_timeout + STALE_MARGIN {
            return Err(ConfigError::Invalid {
                name: "BUDDY_JOB_STALE_SECS",
                reason: format!(
                    "must exceed the generation timeout ({}s) by more than {}s",
                    generation_timeout.as_secs(),
                    STALE_MARGIN.as_secs()
                ),
            });
        }

        Ok(Self {
            database_url,
            http_addr,
            upload_dir: PathBuf::from(
                get("BUDDY_UPLOAD_DIR").unwrap_or_else(|| DEFAULT_UPLOAD_DIR.to_string()),
            ),
            allowed_extensions,
            max_upload_bytes: parse_num(&get, "BUDDY_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?
                .clamp(1024, 1024 * 1024 * 1024),
            max_questions: parse_num(&get, "BUDDY_MAX_QUESTIONS", 50u32)?.clamp(1, 500),
            jwt_secret: get("BUDDY_JWT_SECRET")
                .unwrap_or_else(|| "dev-insecure-change-me".to_string()),
            generation: GenerationConfig {
                api_key,
                api_base: get("OPENAI_API_BASE")
                    .unwrap_or_else(|| DEFAULT_OPENAI_API_BASE.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                timeout: generation_timeout,
                max_document_chars: parse_num(&get, "BUDDY_MAX_DOCUMENT_CHARS", 60_000usize)?
                    .clamp(1_000, 2_000_000),
            },
            worker: WorkerConfig {
                concurrency: parse_num(&get, "BUDDY_WORKER_CONCURRENCY", 2usize)?.min(64),
                poll_interval: Duration::from_millis(
                    parse_num(&get, "BUDDY_WORKER_POLL_MS", 1000u64)?.clamp(50, 60_000),
                ),
                stale_after,
                max_attempts: parse_num(&get, "BUDDY_JOB_MAX_ATTEMPTS", 3i32)?.clamp(1, 100),
            },
        })
    }
}

fn parse_num<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

pub fn parse_extensions(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
