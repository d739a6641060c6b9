pub mod postgres_import_job_repository;
pub mod postgres_import_mismatch_repository;
pub mod postgres_imported_issue_repository;
pub mod postgres_linear_connection_repository;
pub mod postgres_lock_manager;
pub mod postgres_scheduled_event_repository;
pub mod postgres_workspace_directory_repository;

pub use postgres_import_job_repository::PostgresImportJobRepository;
pub use postgres_import_mismatch_repository::PostgresImportMismatchRepository;
pub use postgres_imported_issue_repository::PostgresImportedIssueRepository;
pub use postgres_linear_connection_repository::PostgresLinearConnectionRepository;
pub use postgres_lock_manager::PostgresLockManager;
pub use postgres_scheduled_event_repository::PostgresScheduledEventRepository;
pub use postgres_workspace_directory_repository::PostgresWorkspaceDirectoryRepository;
