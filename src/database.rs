// Database layer for the engagement store

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub type DbPool = Pool<Sqlite>;

/// How long a writer waits for the store's write lock before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database;

impl Database {
    /// Initialize database connection pool
    pub async fn init(database_url: &str, max_connections: u32) -> Result<DbPool> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        // Run migrations
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(pool)
    }

    /// Cheap liveness check
    pub async fn ping(pool: &DbPool) -> bool {
        sqlx::query("SELECT 1").fetch_one(pool).await.is_ok()
    }
}

/// True when the error is a UNIQUE constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// True when the error is a FOREIGN KEY constraint violation.
pub fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}
