//! Circuit Breaker - 按依赖的熔断器
//!
//! 进程内共享，每个外部依赖一个实例，显式注入到所有调用方。
//! 状态机是唯一的修改路径，互斥锁保护:
//!
//! closed --连续失败达到阈值--> open --冷却窗口结束--> half_open
//! half_open --探测成功--> closed（计数清零）
//! half_open --探测失败--> open（冷却时间翻倍，有上限）

use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// 熔断器配置
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次后熔断
    pub failure_threshold: u32,
    /// 基础冷却时长
    pub cooldown: Duration,
    /// 冷却时长的最大放大倍数（半开探测反复失败时）
    pub cooldown_max_factor: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(300),
            cooldown_max_factor: 4,
        }
    }
}

/// 熔断中，调用被快速拒绝
#[derive(Debug, Clone, Error)]
#[error("circuit breaker '{dependency}' is open, retry after {retry_after:?}")]
pub struct CircuitOpenError {
    pub dependency: String,
    pub retry_after: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// 当前冷却放大倍数
    cooldown_factor: u32,
    /// half_open 下是否已有探测调用在途
    probe_in_flight: bool,
}

/// 熔断器
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// 创建熔断器，初始状态 closed（冷启动总是复位）
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                cooldown_factor: 1,
                probe_in_flight: false,
            }),
        }
    }

    fn current_cooldown(&self, factor: u32) -> Duration {
        self.config.cooldown * factor.min(self.config.cooldown_max_factor)
    }

    /// 请求通行证
    ///
    /// - closed: 放行
    /// - open: 冷却未到则快速失败；到期转 half_open 并放行唯一一次探测
    /// - half_open: 探测在途时其余调用快速失败
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let cooldown = self.current_cooldown(inner.cooldown_factor);
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= cooldown {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::warn!(
                        dependency = %self.dependency,
                        "Circuit breaker half-open, allowing probe call"
                    );
                    Ok(())
                } else {
                    Err(CircuitOpenError {
                        dependency: self.dependency.clone(),
                        retry_after: cooldown - elapsed,
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CircuitOpenError {
                        dependency: self.dependency.clone(),
                        retry_after: self.current_cooldown(inner.cooldown_factor),
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// 上报调用成功
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != BreakerState::Closed {
            tracing::info!(
                dependency = %self.dependency,
                from = inner.state.as_str(),
                "Circuit breaker closed"
            );
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.cooldown_factor = 1;
        inner.probe_in_flight = false;
    }

    /// 上报调用失败（仅瞬态/基础设施类失败应计入）
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::error!(
                        dependency = %self.dependency,
                        failures = inner.consecutive_failures,
                        cooldown_secs = self.current_cooldown(inner.cooldown_factor).as_secs(),
                        "Circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                // 探测失败，回到 open，冷却时间增长
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                inner.cooldown_factor =
                    (inner.cooldown_factor * 2).min(self.config.cooldown_max_factor);
                tracing::error!(
                    dependency = %self.dependency,
                    cooldown_secs = self.current_cooldown(inner.cooldown_factor).as_secs(),
                    "Circuit breaker probe failed, reopened"
                );
            }
            BreakerState::Open => {
                inner.consecutive_failures += 1;
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().unwrap().consecutive_failures
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "generation-service",
            CircuitBreakerConfig {
                failure_threshold: 5,
                cooldown: Duration::from_millis(cooldown_ms),
                cooldown_max_factor: 4,
            },
        )
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let breaker = breaker(60_000);

        for _ in 0..4 {
            breaker.record_failure();
            assert_eq!(breaker.state(), BreakerState::Closed);
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        // 熔断中快速失败，不触网
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn test_success_resets_counter() {
        let breaker = breaker(60_000);

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);

        // 重新计数，4 次不够
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_then_close() {
        let breaker = breaker(20);

        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(breaker.try_acquire().is_err());

        tokio::time::sleep(Duration::from_millis(40)).await;

        // 冷却结束，放行一次探测
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        // 探测在途，其余调用仍被拒绝
        assert!(breaker.try_acquire().is_err());

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_probe_failure_reopens_with_longer_cooldown() {
        let breaker = breaker(20);

        for _ in 0..5 {
            breaker.record_failure();
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(breaker.try_acquire().is_ok());

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        // 冷却翻倍（20ms -> 40ms），原有时长不够
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(breaker.try_acquire().is_err());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_retry_after_reported() {
        let breaker = breaker(60_000);
        for _ in 0..5 {
            breaker.record_failure();
        }
        let err = breaker.try_acquire().unwrap_err();
        assert!(err.retry_after <= Duration::from_secs(60));
        assert!(err.retry_after > Duration::from_secs(50));
    }
}
