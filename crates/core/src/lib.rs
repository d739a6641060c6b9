//! 调度引擎核心: 错误类型与配置模型

pub mod config;
pub mod errors;

pub use config::{AppConfig, DatabaseConfig, DispatcherConfig, ImporterConfig, ObservabilityConfig};
pub use errors::*;
