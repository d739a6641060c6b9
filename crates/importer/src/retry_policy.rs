use std::time::Duration;

use chrono::{DateTime, Utc};

use scheduler_core::{ImporterConfig, SchedulerError};
use scheduler_domain::{to_chrono, JobFailure};

/// 导入任务重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数, 超过后任务永久失败
    pub max_retries: i32,
    /// 基础重试间隔（秒）
    pub base_interval_seconds: u64,
    /// 最大重试间隔（秒）
    pub max_interval_seconds: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_interval_seconds: 60,  // 1分钟
            max_interval_seconds: 3600, // 1小时
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl From<&ImporterConfig> for RetryPolicy {
    fn from(config: &ImporterConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_interval_seconds: config.retry_base_seconds,
            max_interval_seconds: config.retry_max_seconds,
            backoff_multiplier: config.retry_multiplier,
            jitter_factor: config.retry_jitter_factor,
        }
    }
}

impl RetryPolicy {
    /// 第 `retry_count` 次重试前的等待时间, 不含抖动
    pub fn base_backoff(&self, retry_count: i32) -> Duration {
        let exponent = (retry_count - 1).max(0);
        let base_interval = self.base_interval_seconds as f64;
        let max_interval = self.max_interval_seconds as f64;

        // 计算指数退避间隔并限制最大值
        let exponential = base_interval * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(exponential.min(max_interval).max(0.0))
    }

    /// 带随机抖动的等待时间
    ///
    /// 抖动只会增加等待时间, 叠加后仍不超过最大间隔。
    pub fn backoff(&self, retry_count: i32) -> Duration {
        let capped = self.base_backoff(retry_count).as_secs_f64();
        let jitter = capped * self.jitter_factor * rand::random::<f64>();
        let max_interval = self.max_interval_seconds as f64;
        Duration::from_secs_f64((capped + jitter).min(max_interval).max(capped))
    }

    /// 根据错误类型和当前重试次数决定任务的去向
    pub fn classify(
        &self,
        error: &SchedulerError,
        retry_count: i32,
        now: DateTime<Utc>,
    ) -> JobFailure {
        let message = error.to_string();

        if !error.is_transient() {
            return JobFailure::Fatal { error: message };
        }

        let next_retry_count = retry_count + 1;
        if next_retry_count > self.max_retries {
            return JobFailure::Exhausted {
                error: format!("已达到最大重试次数 {}: {}", self.max_retries, message),
            };
        }

        let retry_after = now
            .checked_add_signed(to_chrono(self.backoff(next_retry_count)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        JobFailure::Retry {
            error: message,
            retry_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_backoff(1), Duration::from_secs(60));
        assert_eq!(policy.base_backoff(2), Duration::from_secs(120));
        assert_eq!(policy.base_backoff(3), Duration::from_secs(240));
        assert_eq!(policy.base_backoff(10), Duration::from_secs(3600));
    }

    #[test]
    fn test_jitter_is_non_negative_and_bounded() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.backoff(1).as_secs_f64();
            assert!((60.0..=66.0).contains(&delay));

            let capped = policy.backoff(20).as_secs_f64();
            assert!((capped - 3600.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn test_transient_error_schedules_retry() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let failure = policy.classify(
            &SchedulerError::ExternalTransient("429 Too Many Requests".to_string()),
            0,
            now,
        );

        match failure {
            JobFailure::Retry { retry_after, error } => {
                assert!(retry_after >= now + chrono::Duration::seconds(60));
                assert!(retry_after <= now + chrono::Duration::seconds(66));
                assert!(error.contains("429"));
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn test_retry_budget_exhaustion() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..Default::default()
        };
        let error = SchedulerError::ExecutionTimeout;

        assert!(matches!(
            policy.classify(&error, 1, Utc::now()),
            JobFailure::Retry { .. }
        ));
        assert!(matches!(
            policy.classify(&error, 2, Utc::now()),
            JobFailure::Exhausted { .. }
        ));
    }

    #[test]
    fn test_non_transient_errors_are_fatal() {
        let policy = RetryPolicy::default();
        for error in [
            SchedulerError::ExternalRejected("401 Unauthorized".to_string()),
            SchedulerError::ConnectionNotFound { id: 1 },
            SchedulerError::InvalidImportParams("bad".to_string()),
            SchedulerError::InvalidCheckpoint("bad".to_string()),
        ] {
            assert!(matches!(
                policy.classify(&error, 0, Utc::now()),
                JobFailure::Fatal { .. }
            ));
        }
    }

    #[test]
    fn test_from_config() {
        let config = ImporterConfig {
            max_retries: 3,
            retry_base_seconds: 5,
            ..Default::default()
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_backoff(1), Duration::from_secs(5));
    }
}
