pub mod sqlite_import_job_repository;
pub mod sqlite_import_mismatch_repository;
pub mod sqlite_imported_issue_repository;
pub mod sqlite_linear_connection_repository;
pub mod sqlite_lock_manager;
pub mod sqlite_scheduled_event_repository;
pub mod sqlite_workspace_directory_repository;

pub use sqlite_import_job_repository::SqliteImportJobRepository;
pub use sqlite_import_mismatch_repository::SqliteImportMismatchRepository;
pub use sqlite_imported_issue_repository::SqliteImportedIssueRepository;
pub use sqlite_linear_connection_repository::SqliteLinearConnectionRepository;
pub use sqlite_lock_manager::SqliteLockManager;
pub use sqlite_scheduled_event_repository::SqliteScheduledEventRepository;
pub use sqlite_workspace_directory_repository::SqliteWorkspaceDirectoryRepository;
