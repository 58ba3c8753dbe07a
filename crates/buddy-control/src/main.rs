use std::sync::Arc;

use buddy_control::config::Config;
use buddy_control::documents::DocumentStore;
use buddy_control::generation::OpenAiGenerator;
use buddy_control::queue::JobQueue;
use buddy_control::routes;
use buddy_control::state::AppState;
use buddy_control::worker::{PipelineContext, Worker};
use sea_orm_migration::MigratorTrait;

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let db = buddy_db::connect(&config.database_url).await?;
    // Apply migrations on boot (idempotent).
    buddy_migration::Migrator::up(&db, None).await?;
    let db = Arc::new(db);

    let documents = DocumentStore::new(&config.upload_dir, config.allowed_extensions.clone());
    documents.ensure_root().await.map_err(|e| {
        anyhow::anyhow!(
            "failed to prepare upload dir {}: {e}",
            config.upload_dir.display()
        )
    })?;

    let queue = JobQueue::new(db.clone());

    if config.worker.concurrency > 0 {
        let ctx = Arc::new(PipelineContext {
            db: db.clone(),
            documents: documents.clone(),
            generator: Arc::new(OpenAiGenerator::new(config.generation.clone())?),
        });
        let handles = Worker::new(ctx, queue.clone(), config.worker.clone()).spawn();
        tracing::info!(workers = handles.len(), "generation workers running");
    } else {
        tracing::info!("in-process workers disabled; serving HTTP only");
    }

    let state = AppState {
        db,
        documents,
        queue,
        jwt_secret: Arc::from(config.jwt_secret.as_str()),
        max_questions: config.max_questions,
    };
    let app = routes::router(state, config.max_upload_bytes);

    let addr = config.http_addr;
    tracing::info!(%addr, "exam-buddy HTTP listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
