//! 参考时钟
//!
//! 所有呈现时间统一使用 100ns tick（1 秒 = 10_000_000 ticks）
//! - `SystemClock`: 基于 `Instant` 的单调时钟，渲染器内置
//! - `ManualClock`: 手动推进的时钟，用于测试和离线渲染

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// 每秒 tick 数（100ns 单位）
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// 每毫秒 tick 数
pub const TICKS_PER_MILLISECOND: i64 = 10_000;

/// 时间源
///
/// 实现必须单调：同一时钟连续两次调用 `now()`，后者不小于前者
pub trait Clock: Send + Sync {
    /// 当前时间（ticks）
    fn now(&self) -> i64;
}

/// 单调系统时钟
///
/// 以创建时刻为原点
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> i64 {
        ticks_from_duration(self.origin.elapsed())
    }
}

/// 手动时钟
#[derive(Debug, Default)]
pub struct ManualClock {
    ticks: AtomicI64,
}

impl ManualClock {
    pub fn new(ticks: i64) -> Self {
        Self {
            ticks: AtomicI64::new(ticks),
        }
    }

    pub fn set(&self, ticks: i64) {
        self.ticks.store(ticks, Ordering::Release);
    }

    /// 推进时钟，返回推进后的时间
    pub fn advance(&self, ticks: i64) -> i64 {
        self.ticks.fetch_add(ticks, Ordering::AcqRel) + ticks
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> i64 {
        self.ticks.load(Ordering::Acquire)
    }
}

/// Duration → ticks（饱和到 i64::MAX）
#[inline]
pub fn ticks_from_duration(duration: Duration) -> i64 {
    let ticks = duration.as_nanos() / 100;
    i64::try_from(ticks).unwrap_or(i64::MAX)
}

/// ticks → Duration，负值视为 0
#[inline]
pub fn duration_from_ticks(ticks: i64) -> Duration {
    Duration::from_nanos(ticks.max(0) as u64 * 100)
}
