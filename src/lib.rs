//! 定时事件与Linear导入调度引擎
//!
//! `SchedulerContext` 组装数据库、分发器和导入运行器, 并提供生产者和观察者服务。

pub mod app;
pub mod services;
pub mod shutdown;

pub use app::{AppMode, SchedulerContext, SchedulerContextBuilder};
pub use services::{JobObserver, ProducerService};
pub use shutdown::ShutdownManager;
