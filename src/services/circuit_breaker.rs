//! 熔断器 - 业务能力层
//!
//! 每种传输方式一个实例，进程内共享，不做序列化。
//! 只有 `can_proceed` / `record_success` / `record_failure` 会修改状态，
//! 修改在同一把锁内完成。

use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(name)
    }
}

/// 熔断阈值
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    /// CLOSED 状态下连续失败多少次后打开
    pub failure_threshold: u32,
    /// OPEN 状态持续多久后允许探测
    pub recovery_timeout: Duration,
    /// HALF_OPEN 状态下成功多少次后关闭
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

/// 状态快照（只读）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<Instant>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

/// 熔断器
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 是否允许本次调用
    ///
    /// OPEN 且已超过恢复时间时转为 HALF_OPEN 并放行
    pub fn can_proceed(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = inner
                    .last_failure_time
                    .map(|t| t.elapsed() >= self.settings.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    info!("🔌 熔断器 [{}] 进入半开状态，允许探测请求", self.name);
                }
                recovered
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.settings.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    info!("✓ 熔断器 [{}] 已恢复为关闭状态", self.name);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.settings.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_failure_time = Some(now);
                    warn!(
                        "⚠️ 熔断器 [{}] 连续失败 {} 次，已打开",
                        self.name, inner.failure_count
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                inner.last_failure_time = Some(now);
                warn!("⚠️ 熔断器 [{}] 探测失败，重新打开", self.name);
            }
            CircuitState::Open => {
                inner.last_failure_time = Some(now);
            }
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_time,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}
