use serde::{Deserialize, Serialize};

/// 定时事件分发器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub poll_interval_seconds: u64,
    /// 租约时长, 需覆盖触发处理器的预期耗时并留有余量
    pub lease_seconds: u64,
    pub batch_size: i64,
    pub max_concurrent_fires: usize,
    /// 未配置时使用日志处理器
    pub webhook_url: Option<String>,
    pub webhook_timeout_seconds: u64,
    /// 失败次数达到该值的事件按毒事件上报
    pub poison_retry_threshold: i32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: 10,
            lease_seconds: 300,
            batch_size: 50,
            max_concurrent_fires: 8,
            webhook_url: None,
            webhook_timeout_seconds: 30,
            poison_retry_threshold: 10,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.lease_seconds == 0 {
            return Err(anyhow::anyhow!("租约时长必须大于0"));
        }

        if self.batch_size <= 0 {
            return Err(anyhow::anyhow!("批处理大小必须大于0"));
        }

        if self.max_concurrent_fires == 0 {
            return Err(anyhow::anyhow!("最大并发触发数必须大于0"));
        }

        if let Some(url) = &self.webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(anyhow::anyhow!("Webhook地址必须是HTTP(S)格式: {}", url));
            }
            if self.webhook_timeout_seconds == 0 {
                return Err(anyhow::anyhow!("Webhook超时时间必须大于0"));
            }
            if self.webhook_timeout_seconds >= self.lease_seconds {
                return Err(anyhow::anyhow!("Webhook超时时间必须小于租约时长"));
            }
        }

        if self.poison_retry_threshold <= 0 {
            return Err(anyhow::anyhow!("毒事件阈值必须大于0"));
        }

        Ok(())
    }
}
