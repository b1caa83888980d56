//! Retry Policy - 指数退避 + 随机抖动
//!
//! 退避公式: min(max_delay, base * 2^attempt) * (1 + uniform(0.1, 0.3))
//! 限流类错误使用更长的最小延迟，避免立刻再次触发供应商限流。

use std::time::Duration;

use rand::Rng;

use crate::application::ports::{GenerationError, GenerationErrorKind};

/// 失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 可重试
    Transient,
    /// 可重试，但要给限流器留出恢复时间
    RateLimited,
    /// 立即上抛，不重试
    Permanent,
}

/// 重试策略配置
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次调用）
    pub max_attempts: u32,
    /// 基础延迟
    pub base_delay: Duration,
    /// 延迟上限
    pub max_delay: Duration,
    /// 限流错误的最小延迟
    pub rate_limit_min_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            rate_limit_min_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// 失败分类
    pub fn classify(error: &GenerationError) -> FailureClass {
        match error.kind() {
            GenerationErrorKind::RateLimited => FailureClass::RateLimited,
            kind if kind.is_transient() => FailureClass::Transient,
            _ => FailureClass::Permanent,
        }
    }

    /// 第 attempt 次失败后的退避时长（attempt 从 0 开始）
    pub fn delay_for(&self, attempt: u32, class: FailureClass) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);

        let jitter = 1.0 + rand::thread_rng().gen_range(0.1..0.3);
        let delay = exp.mul_f64(jitter);

        match class {
            FailureClass::RateLimited => delay.max(self.rate_limit_min_delay),
            _ => delay,
        }
    }

    /// 是否还有重试预算
    pub fn has_budget(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}
