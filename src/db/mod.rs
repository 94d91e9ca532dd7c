mod models;

pub use models::*;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::time::Duration;
use tracing::info;

use crate::config::Config;

pub type DbPool = SqlitePool;

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        // Strip SQL comment lines (lines starting with --)
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

/// Open the pool described by the configuration and bring the schema up to date.
///
/// The pool is created once at startup and handed to every request through
/// `AppState`; nothing below this layer caches a connection of its own.
pub async fn init(config: &Config) -> Result<DbPool> {
    let db_url = config.database_url();

    info!("Initializing database at {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.server.max_db_connections)
        .acquire_timeout(Duration::from_secs(config.server.db_acquire_timeout_secs))
        .connect(&db_url)
        .await?;

    // Enable WAL mode for better concurrency
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: tenants, users, sessions, invites
    execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;

    // Migration 002: zones, devices and reading tables
    let has_zones_table: Option<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='zones'",
    )
    .fetch_optional(pool)
    .await?;
    if has_zones_table.is_none() {
        execute_sql(pool, include_str!("../../migrations/002_fields.sql")).await?;
    }

    Ok(())
}

/// Canonical text form for stored timestamps.
///
/// Fixed precision and a `Z` suffix keep the column lexically ordered, which
/// the reading range queries rely on.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now() -> String {
    timestamp(Utc::now())
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Single-connection in-memory database with the production schema.
#[cfg(test)]
pub async fn test_pool() -> DbPool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    run_migrations(&pool).await.expect("migrations");
    pool
}
