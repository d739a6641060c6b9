use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::FireHandler;

/// 只记录日志的触发处理器, 未配置Webhook时使用
#[derive(Debug, Default, Clone)]
pub struct LoggingFireHandler;

impl LoggingFireHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FireHandler for LoggingFireHandler {
    async fn fire(&self, user_id: i64, payload: &Value) -> SchedulerResult<()> {
        info!(user_id, payload = %payload, "定时事件已触发");
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    user_id: i64,
    payload: &'a Value,
}

/// 以HTTP POST方式投递触发事件
///
/// 请求体为 `{"user_id": .., "payload": ..}`, 非2xx响应和网络错误都视为触发失败,
/// 事件会在下一轮重新触发。
pub struct WebhookFireHandler {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookFireHandler {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FireHandler for WebhookFireHandler {
    async fn fire(&self, user_id: i64, payload: &Value) -> SchedulerResult<()> {
        debug!("投递定时事件: user_id={}, url={}", user_id, self.url);

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&WebhookBody { user_id, payload })
            .send()
            .await
            .map_err(|e| SchedulerError::FireHandler(format!("Webhook请求失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Webhook返回非成功状态: {} ({})", status, self.url);
            return Err(SchedulerError::FireHandler(format!(
                "Webhook请求失败，状态码: {}",
                status.as_u16()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_logging_handler_always_succeeds() {
        let handler = LoggingFireHandler::new();
        assert!(handler.fire(1, &json!({"msg": "hi"})).await.is_ok());
    }

    #[test]
    fn test_webhook_body_shape() {
        let payload = json!({"msg": "hi"});
        let body = serde_json::to_value(WebhookBody {
            user_id: 7,
            payload: &payload,
        })
        .unwrap();
        assert_eq!(body, json!({"user_id": 7, "payload": {"msg": "hi"}}));
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_a_fire_failure() {
        // 端口1上没有服务监听
        let handler = WebhookFireHandler::new("http://127.0.0.1:1/hook", Duration::from_secs(2));
        let result = handler.fire(1, &json!({})).await;
        assert!(matches!(result, Err(SchedulerError::FireHandler(_))));
    }
}
