use serde::{Deserialize, Serialize};

/// Linear导入流水线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    pub enabled: bool,
    pub poll_interval_seconds: u64,
    /// 单步导入的租约时长
    pub lease_seconds: u64,
    pub batch_size: i64,
    /// 同一周期内对单个任务连续执行的最大步数
    pub steps_per_cycle: u32,
    pub page_size: u32,
    pub max_retries: i32,
    pub retry_base_seconds: u64,
    pub retry_max_seconds: u64,
    pub retry_multiplier: f64,
    pub retry_jitter_factor: f64,
    pub linear_api_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: 10,
            lease_seconds: 300,
            batch_size: 5,
            steps_per_cycle: 4,
            page_size: 50,
            max_retries: 5,
            retry_base_seconds: 60,
            retry_max_seconds: 3600,
            retry_multiplier: 2.0,
            retry_jitter_factor: 0.1,
            linear_api_url: "https://api.linear.app/graphql".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl ImporterConfig {
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

        if self.steps_per_cycle == 0 {
            return Err(anyhow::anyhow!("每周期步数必须大于0"));
        }

        if self.page_size == 0 || self.page_size > 250 {
            return Err(anyhow::anyhow!("分页大小必须在1到250之间"));
        }

        if self.max_retries < 0 {
            return Err(anyhow::anyhow!("最大重试次数不能为负数"));
        }

        if self.retry_base_seconds == 0 {
            return Err(anyhow::anyhow!("重试基础间隔必须大于0"));
        }

        if self.retry_max_seconds < self.retry_base_seconds {
            return Err(anyhow::anyhow!("最大重试间隔不能小于基础间隔"));
        }

        if self.retry_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1"));
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            return Err(anyhow::anyhow!("抖动因子必须在0到1之间"));
        }

        if !self.linear_api_url.starts_with("http://") && !self.linear_api_url.starts_with("https://") {
            return Err(anyhow::anyhow!("Linear API地址格式无效: {}", self.linear_api_url));
        }

        if self.request_timeout_seconds == 0 || self.request_timeout_seconds >= self.lease_seconds {
            return Err(anyhow::anyhow!("请求超时时间必须大于0且小于租约时长"));
        }

        Ok(())
    }
}
