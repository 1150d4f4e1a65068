use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use pulse_core::AppError;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tokio::sync::Mutex;

use crate::config::DatabaseConfig;
use crate::repository::PostRepository;

/// Central database facade: owns the connection pool, runs migrations,
/// and vends repository instances.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl Database {
    /// Open (creating if needed) the SQLite database described by `config`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let (options, max_connections) = if config.is_in_memory() {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| AppError::DatabaseError(format!("Invalid database options: {e}")))?;
            // Every in-memory connection is its own database.
            (options, 1)
        } else {
            if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::DatabaseError(format!(
                        "Failed to create {}: {e}",
                        parent.display()
                    ))
                })?;
            }
            let options = SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .busy_timeout(Duration::from_secs(5));
            (options, config.max_connections)
        };

        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
        if config.is_in_memory() {
            // The database lives and dies with its only connection: never reap it.
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::debug!(path = %config.path.display(), max_connections, "Database connected");
        Ok(Self::from_pool(pool))
    }

    /// Connect and bring the schema up to date.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, AppError> {
        let db = Self::connect(config).await?;
        db.migrate().await?;
        Ok(db)
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get a [`PostRepository`] backed by this pool.
    ///
    /// Repositories vended by the same `Database` share one write lock.
    pub fn post_repo(&self) -> PostRepository {
        PostRepository::with_write_lock(self.pool.clone(), Arc::clone(&self.write_lock))
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
