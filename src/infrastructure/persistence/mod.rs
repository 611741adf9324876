//! SQLite persistence

mod character_repository;
mod job_repository;
mod pipeline_repository;

pub use character_repository::SqliteCharacterRepository;
pub use job_repository::SqliteJobRepository;
pub use pipeline_repository::SqlitePipelineRepository;

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Open the application database
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .with_context(|| format!("connecting to {database_url}"))
}

/// In-memory database for tests. A single connection keeps every query on
/// the same memory database.
#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite")
}
