use std::sync::Arc;
use std::time::Duration;

use scheduler_core::{DatabaseConfig, SchedulerError, SchedulerResult};
use scheduler_domain::repositories::{
    ImportJobRepository, ImportMismatchRepository, ImportedIssueRepository,
    LinearConnectionRepository, LockManager, ScheduledEventRepository,
    WorkspaceDirectoryRepository,
};
use tracing::info;

use super::postgres::{
    PostgresImportJobRepository, PostgresImportMismatchRepository,
    PostgresImportedIssueRepository, PostgresLinearConnectionRepository, PostgresLockManager,
    PostgresScheduledEventRepository, PostgresWorkspaceDirectoryRepository,
};
use super::sqlite::{
    SqliteImportJobRepository, SqliteImportMismatchRepository, SqliteImportedIssueRepository,
    SqliteLinearConnectionRepository, SqliteLockManager, SqliteScheduledEventRepository,
    SqliteWorkspaceDirectoryRepository,
};

/// Database type detection
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DatabaseType::PostgreSQL
        } else {
            DatabaseType::SQLite
        }
    }
}

/// Database connection pool enum
#[derive(Clone)]
pub enum DatabasePool {
    PostgreSQL(sqlx::PgPool),
    SQLite(sqlx::SqlitePool),
}

impl DatabasePool {
    /// Create pool from URL with automatic type detection
    pub async fn new(url: &str, max_connections: u32, acquire_timeout: Duration) -> SchedulerResult<Self> {
        match DatabaseType::from_url(url) {
            DatabaseType::PostgreSQL => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(url)
                    .await
                    .map_err(SchedulerError::Database)?;
                Ok(DatabasePool::PostgreSQL(pool))
            }
            DatabaseType::SQLite => {
                let options = sqlx::sqlite::SqlitePoolOptions::new().acquire_timeout(acquire_timeout);
                // 内存数据库每个连接都是独立的库, 只能保持单个常驻连接
                let options = if url.contains(":memory:") {
                    options
                        .max_connections(1)
                        .min_connections(1)
                        .idle_timeout(None)
                        .max_lifetime(None)
                } else {
                    options.max_connections(max_connections)
                };
                let pool = options.connect(url).await.map_err(SchedulerError::Database)?;
                Ok(DatabasePool::SQLite(pool))
            }
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabasePool::PostgreSQL(_) => DatabaseType::PostgreSQL,
            DatabasePool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        match self {
            DatabasePool::PostgreSQL(pool) => {
                sqlx::query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(SchedulerError::Database)?;
            }
            DatabasePool::SQLite(pool) => {
                sqlx::query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(SchedulerError::Database)?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        match self {
            DatabasePool::PostgreSQL(pool) => pool.close().await,
            DatabasePool::SQLite(pool) => pool.close().await,
        }
    }
}

/// Unified database manager
///
/// Owns the pool and hands out repository implementations for the
/// detected backend. Each manager is an independent store, so tests can
/// create as many in-memory instances as they need.
pub struct DatabaseManager {
    pool: DatabasePool,
}

impl DatabaseManager {
    /// Create new database manager with automatic type detection
    pub async fn new(url: &str, max_connections: u32) -> SchedulerResult<Self> {
        let pool = DatabasePool::new(url, max_connections, Duration::from_secs(30)).await?;
        Ok(Self { pool })
    }

    /// Connect using the application config and run migrations when enabled
    pub async fn from_config(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let pool = DatabasePool::new(
            &config.url,
            config.max_connections,
            Duration::from_secs(config.connection_timeout_seconds),
        )
        .await?;
        let manager = Self { pool };
        if config.run_migrations {
            manager.migrate().await?;
        }
        Ok(manager)
    }

    /// Migrated in-memory SQLite store
    pub async fn in_memory() -> SchedulerResult<Self> {
        let manager = Self::new("sqlite::memory:", 1).await?;
        manager.migrate().await?;
        Ok(manager)
    }

    pub async fn migrate(&self) -> SchedulerResult<()> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                sqlx::migrate!("../../migrations/postgres").run(pool).await?
            }
            DatabasePool::SQLite(pool) => sqlx::migrate!("../../migrations/sqlite").run(pool).await?,
        }
        info!("数据库迁移完成: {:?}", self.database_type());
        Ok(())
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub fn database_type(&self) -> DatabaseType {
        self.pool.database_type()
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        self.pool.health_check().await
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn lock_manager(&self) -> Arc<dyn LockManager> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresLockManager::new(pool.clone())),
            DatabasePool::SQLite(pool) => Arc::new(SqliteLockManager::new(pool.clone())),
        }
    }

    pub fn scheduled_event_repository(&self) -> Arc<dyn ScheduledEventRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresScheduledEventRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => Arc::new(SqliteScheduledEventRepository::new(pool.clone())),
        }
    }

    pub fn import_job_repository(&self) -> Arc<dyn ImportJobRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresImportJobRepository::new(pool.clone())),
            DatabasePool::SQLite(pool) => Arc::new(SqliteImportJobRepository::new(pool.clone())),
        }
    }

    pub fn import_mismatch_repository(&self) -> Arc<dyn ImportMismatchRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresImportMismatchRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => Arc::new(SqliteImportMismatchRepository::new(pool.clone())),
        }
    }

    pub fn linear_connection_repository(&self) -> Arc<dyn LinearConnectionRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresLinearConnectionRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => {
                Arc::new(SqliteLinearConnectionRepository::new(pool.clone()))
            }
        }
    }

    pub fn imported_issue_repository(&self) -> Arc<dyn ImportedIssueRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresImportedIssueRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => Arc::new(SqliteImportedIssueRepository::new(pool.clone())),
        }
    }

    pub fn workspace_directory_repository(&self) -> Arc<dyn WorkspaceDirectoryRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresWorkspaceDirectoryRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => {
                Arc::new(SqliteWorkspaceDirectoryRepository::new(pool.clone()))
            }
        }
    }
}
