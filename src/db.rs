//! SQLite pool setup and the embedded schema migration.

use anyhow::Result;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

const INIT_MIGRATION: &str = include_str!("../migrations/0001_init.sql");

/// Open a pool against `url`. In-memory databases must use a single
/// connection, each connection gets its own database otherwise.
pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool> {
    let mut options = SqlitePoolOptions::new().max_connections(max_connections);
    if url.contains(":memory:") {
        // Dropping the last connection drops the database.
        options = options.idle_timeout(None).max_lifetime(None);
    }
    let pool = options.connect(url).await?;
    Ok(pool)
}

/// Apply the schema statement by statement. Statements are idempotent.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = INIT_MIGRATION
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}
