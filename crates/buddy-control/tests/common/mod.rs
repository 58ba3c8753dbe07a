#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use buddy_control::config::{WorkerConfig, parse_extensions};
use buddy_control::documents::DocumentStore;
use buddy_control::generation::{
    GeneratedAnswer, GeneratedQuestion, Generation, GenerationError, QuestionGenerator,
};
use buddy_control::queue::JobQueue;
use buddy_control::worker::{PipelineContext, Worker};
use buddy_db::entities::{answers, questions, quizzes, subjects, users};
use buddy_jobs::CreateQuizJob;
use futures_util::Stream;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, PaginatorTrait, Set};
use sea_orm_migration::MigratorTrait;

pub struct TestEnv {
    pub dir: tempfile::TempDir,
    pub db: Arc<DatabaseConnection>,
    pub documents: DocumentStore,
    pub queue: JobQueue,
    pub user_id: i32,
    pub subject_id: i32,
}

pub async fn setup() -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("buddy.db").display());
    let db = buddy_db::connect(&url).await.unwrap();
    buddy_migration::Migrator::up(&db, None).await.unwrap();
    let db = Arc::new(db);

    let uploads = dir.path().join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();
    let documents = DocumentStore::new(uploads, parse_extensions("pdf,txt"));

    let now: sea_orm::prelude::DateTimeWithTimeZone = chrono::Utc::now().into();
    let user = users::ActiveModel {
        username: Set("ada".to_string()),
        email: Set("ada@example.com".to_string()),
        password_hash: Set("not-a-real-hash".to_string()),
        created_at: Set(now),
        modified_at: Set(now),
        ..Default::default()
    }
    .insert(&*db)
    .await
    .unwrap();

    let subject = subjects::ActiveModel {
        title: Set("Biology".to_string()),
        created_by_id: Set(user.id),
        ..Default::default()
    }
    .insert(&*db)
    .await
    .unwrap();

    let queue = JobQueue::new(db.clone());
    TestEnv {
        dir,
        db,
        documents,
        queue,
        user_id: user.id,
        subject_id: subject.id,
    }
}

impl TestEnv {
    pub fn worker(&self, generator: Arc<dyn QuestionGenerator>) -> Worker {
        self.worker_with(generator, worker_config())
    }

    pub fn worker_with(
        &self,
        generator: Arc<dyn QuestionGenerator>,
        settings: WorkerConfig,
    ) -> Worker {
        let ctx = Arc::new(PipelineContext {
            db: self.db.clone(),
            documents: self.documents.clone(),
            generator,
        });
        Worker::new(ctx, self.queue.clone(), settings)
    }

    /// Writes an upload into the document store the way submission does.
    pub async fn upload(&self, name: &str, body: &str) -> PathBuf {
        self.documents
            .store(chunks(body.as_bytes()), name)
            .await
            .unwrap()
    }

    pub async fn job_args(&self, number_of_questions: u32) -> CreateQuizJob {
        let file = self
            .upload("chapter.txt", "Cells are the basic unit of life.")
            .await;
        CreateQuizJob {
            user_id: self.user_id,
            subject_id: self.subject_id,
            title: "Cell biology".to_string(),
            success_percentage: 60,
            description: Some("Generated from chapter 1".to_string()),
            duration: 20,
            number_of_questions,
            file_paths: vec![file],
        }
    }

    pub async fn quiz_count(&self) -> u64 {
        quizzes::Entity::find().count(&*self.db).await.unwrap()
    }

    pub async fn question_count(&self) -> u64 {
        questions::Entity::find().count(&*self.db).await.unwrap()
    }

    pub async fn answer_count(&self) -> u64 {
        answers::Entity::find().count(&*self.db).await.unwrap()
    }
}

pub fn worker_config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 1,
        poll_interval: Duration::from_millis(50),
        stale_after: Duration::from_secs(900),
        max_attempts: 3,
    }
}

/// An upload body as the multipart layer hands it over, in small chunks.
pub fn chunks(body: &[u8]) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + use<> {
    let parts: Vec<_> = body.chunks(8).map(|c| Ok(c.to_vec())).collect();
    futures_util::stream::iter(parts)
}

pub fn question(n: usize) -> GeneratedQuestion {
    GeneratedQuestion {
        title: format!("Question {n}?"),
        answers: vec![
            GeneratedAnswer {
                title: format!("Right {n}"),
                is_correct: true,
            },
            GeneratedAnswer {
                title: format!("Wrong {n}a"),
                is_correct: false,
            },
            GeneratedAnswer {
                title: format!("Wrong {n}b"),
                is_correct: false,
            },
        ],
    }
}

pub enum Script {
    Questions(Vec<GeneratedQuestion>),
    Empty { code: i32, message: String },
    Unreachable,
}

/// Scripted stand-in for the external generation service.
pub struct FakeGenerator {
    script: Script,
    delay: Duration,
    pub calls: AtomicUsize,
    pub seen_paths: Mutex<Vec<PathBuf>>,
}

impl FakeGenerator {
    pub fn new(script: Script) -> Arc<Self> {
        Self::with_delay(script, Duration::ZERO)
    }

    pub fn with_delay(script: Script, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script,
            delay,
            calls: AtomicUsize::new(0),
            seen_paths: Mutex::new(Vec::new()),
        })
    }

    pub fn returning(n: usize) -> Arc<Self> {
        Self::new(Script::Questions((1..=n).map(question).collect()))
    }

    /// Like [`FakeGenerator::returning`], but each call takes `delay`.
    pub fn slow(n: usize, delay: Duration) -> Arc<Self> {
        Self::with_delay(Script::Questions((1..=n).map(question).collect()), delay)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl QuestionGenerator for FakeGenerator {
    async fn generate(
        &self,
        file_paths: &[PathBuf],
        _num_questions: u32,
    ) -> Result<Generation, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_paths
            .lock()
            .unwrap()
            .extend(file_paths.iter().cloned());

        for path in file_paths {
            assert!(path.exists(), "generator called after {} was removed", path.display());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.script {
            Script::Questions(questions) => Ok(Generation {
                questions: questions.clone(),
                status_code: 200,
                status_message: "ok".to_string(),
            }),
            Script::Empty { code, message } => Ok(Generation {
                questions: Vec::new(),
                status_code: *code,
                status_message: message.clone(),
            }),
            Script::Unreachable => Err(GenerationError::Upstream {
                status: 502,
                body: "bad gateway".to_string(),
            }),
        }
    }
}
