//! 定时事件分发器
//!
//! 周期性选出到期事件, 通过行级租约领取后调用触发处理器。
//! 多个分发器实例可以同时运行, 每个事件只会被其中一个成功触发。

pub mod dispatcher;
pub mod handlers;

pub use dispatcher::{DispatchReport, DispatcherSettings, ScheduledEventDispatcher};
pub use handlers::{LoggingFireHandler, WebhookFireHandler};
