use async_trait::async_trait;
use serde_json::Value;

use scheduler_core::SchedulerResult;

/// 定时事件触发回调
///
/// 分发器在领取成功后以 `(user_id, payload)` 调用; 返回错误时事件保持未处理,
/// 在下一轮被重新领取。
#[async_trait]
pub trait FireHandler: Send + Sync {
    async fn fire(&self, user_id: i64, payload: &Value) -> SchedulerResult<()>;
}
