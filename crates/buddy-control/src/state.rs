use std::sync::Arc;

use buddy_db::sea_orm::DatabaseConnection;

use crate::documents::DocumentStore;
use crate::queue::JobQueue;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub documents: DocumentStore,
    pub queue: JobQueue,
    pub jwt_secret: Arc<str>,
    pub max_questions: u32,
}
