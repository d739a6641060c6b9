pub mod app_config;
pub mod database;
pub mod dispatcher;
pub mod importer;
pub mod observability;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatcher::DispatcherConfig;
pub use importer::ImporterConfig;
pub use observability::ObservabilityConfig;
