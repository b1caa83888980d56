//! In-Memory Rate Limiter - 按用户的滚动窗口限流
//!
//! 每个 (user, kind) 维护窗口内的时间戳队列。
//! 超限返回建议等待时长，调用方延迟重排而不是失败。

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::application::ports::{AdmissionKind, RateLimitExceeded, RateLimiterPort};

/// 限流配置
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// 窗口时长
    pub window: Duration,
    /// 窗口内允许的大纲请求数
    pub architecture_limit: u32,
    /// 窗口内允许的全书生成数
    pub generation_limit: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3600),
            architecture_limit: 10,
            generation_limit: 3,
        }
    }
}

/// 内存限流器
pub struct InMemoryRateLimiter {
    config: RateLimiterConfig,
    /// (user_id, kind) -> 窗口内的请求时间戳
    windows: DashMap<(String, AdmissionKind), VecDeque<Instant>>,
}

impl InMemoryRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    fn limit_for(&self, kind: AdmissionKind) -> u32 {
        match kind {
            AdmissionKind::Architecture => self.config.architecture_limit,
            AdmissionKind::FullGeneration => self.config.generation_limit,
        }
    }
}

impl RateLimiterPort for InMemoryRateLimiter {
    fn try_acquire(&self, user_id: &str, kind: AdmissionKind) -> Result<(), RateLimitExceeded> {
        let limit = self.limit_for(kind) as usize;
        let now = Instant::now();

        let mut entry = self
            .windows
            .entry((user_id.to_string(), kind))
            .or_default();

        // 清理滚动窗口外的记录
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= self.config.window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() >= limit {
            // limit 为 0 时窗口内没有记录，按整窗等待
            let retry_after = entry
                .front()
                .map(|oldest| self.config.window - now.duration_since(*oldest))
                .unwrap_or(self.config.window);
            tracing::debug!(
                user_id = %user_id,
                kind = kind.as_str(),
                in_window = entry.len(),
                retry_after_secs = retry_after.as_secs(),
                "Admission deferred by rate limit"
            );
            return Err(RateLimitExceeded {
                kind: kind.as_str(),
                retry_after,
            });
        }

        entry.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(window_ms: u64, arch: u32, full: u32) -> InMemoryRateLimiter {
        InMemoryRateLimiter::new(RateLimiterConfig {
            window: Duration::from_millis(window_ms),
            architecture_limit: arch,
            generation_limit: full,
        })
    }

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = limiter(60_000, 3, 1);

        for _ in 0..3 {
            assert!(limiter
                .try_acquire("user-1", AdmissionKind::Architecture)
                .is_ok());
        }
        let err = limiter
            .try_acquire("user-1", AdmissionKind::Architecture)
            .unwrap_err();
        assert!(err.retry_after <= Duration::from_secs(60));
    }

    #[test]
    fn test_kinds_counted_separately() {
        let limiter = limiter(60_000, 1, 1);

        assert!(limiter
            .try_acquire("user-1", AdmissionKind::Architecture)
            .is_ok());
        // 大纲额度用完不影响全书生成额度
        assert!(limiter
            .try_acquire("user-1", AdmissionKind::FullGeneration)
            .is_ok());
        assert!(limiter
            .try_acquire("user-1", AdmissionKind::Architecture)
            .is_err());
    }

    #[test]
    fn test_users_isolated() {
        let limiter = limiter(60_000, 1, 1);

        assert!(limiter
            .try_acquire("user-1", AdmissionKind::Architecture)
            .is_ok());
        assert!(limiter
            .try_acquire("user-2", AdmissionKind::Architecture)
            .is_ok());
    }

    #[test]
    fn test_window_rolls_over() {
        let limiter = limiter(30, 1, 1);

        assert!(limiter
            .try_acquire("user-1", AdmissionKind::Architecture)
            .is_ok());
        assert!(limiter
            .try_acquire("user-1", AdmissionKind::Architecture)
            .is_err());

        std::thread::sleep(Duration::from_millis(40));

        assert!(limiter
            .try_acquire("user-1", AdmissionKind::Architecture)
            .is_ok());
    }
}
