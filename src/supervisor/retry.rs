use std::time::Duration;

use rand::Rng;

/// 指数退避重试策略，带随机抖动与次数上限
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    // 包含第一次尝试在内的总次数
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次失败后的退避上限（从 1 开始计数）
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// 退避时间的一半固定，另一半随机
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff(attempt);
        let half = ceiling / 2;
        let jitter_ms = half.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        half + Duration::from_millis(jitter)
    }

    /// 已经失败 `failures` 次后是否还能再试
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}
