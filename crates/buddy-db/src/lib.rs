pub use sea_orm;

use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

pub mod entities;

/// Opens the pool for Postgres in production or a sqlite file in tests.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(database_url);
    options
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        // Per-statement logs drown the job traces.
        .sqlx_logging(false);
    Database::connect(options).await
}
