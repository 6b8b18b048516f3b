//! SQLite connection pool and schema bootstrap.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS metric_snapshots (
        site_id   TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        metrics   TEXT NOT NULL,
        source    TEXT NOT NULL,
        tags      TEXT NOT NULL DEFAULT '[]',
        PRIMARY KEY (site_id, timestamp)
    )",
    "CREATE TABLE IF NOT EXISTS competitors (
        site_id      TEXT NOT NULL,
        url          TEXT NOT NULL,
        name         TEXT NOT NULL,
        added_at     TEXT NOT NULL,
        last_updated TEXT,
        metrics      TEXT,
        tags         TEXT NOT NULL DEFAULT '[]',
        notes        TEXT NOT NULL DEFAULT '',
        version      INTEGER NOT NULL,
        PRIMARY KEY (site_id, url)
    )",
];

/// Open a pool for `database_url` and make sure the schema exists.
///
/// In-memory databases live only as long as their connection, so they
/// get a single connection that is never recycled.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let in_memory = database_url.contains(":memory:");

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };
    let pool = pool_options.connect_with(options).await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await?;
    }

    tracing::debug!(in_memory, "SQLite schema ready");
    Ok(pool)
}
