//! 渲染统计模块
//!
//! 在渲染路径中收集计数，全部使用 Relaxed 原子操作，
//! 不参与同步，只用于观测

use std::sync::atomic::{AtomicU64, Ordering};

/// 渲染统计收集器
#[derive(Debug, Default)]
pub struct RenderStats {
    samples_received: AtomicU64,
    preroll_samples: AtomicU64,
    bytes_written: AtomicU64,
    /// 迟到数据被丢弃的字节数
    bytes_skipped: AtomicU64,
    /// 提前数据留出的空隙字节数
    gap_bytes: AtomicU64,
    /// 播放后清零的字节数
    bytes_zeroed: AtomicU64,
    underrun_count: AtomicU64,
    blocked_waits: AtomicU64,
}

impl RenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_sample(&self, preroll: bool) {
        self.samples_received.fetch_add(1, Ordering::Relaxed);
        if preroll {
            self.preroll_samples.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_written(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_skipped(&self, bytes: usize) {
        self.bytes_skipped.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_gap(&self, bytes: usize) {
        self.gap_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_zeroed(&self, bytes: usize) {
        self.bytes_zeroed.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_underrun(&self) {
        self.underrun_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_blocked(&self) {
        self.blocked_waits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn underrun_count(&self) -> u64 {
        self.underrun_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bytes_skipped(&self) -> u64 {
        self.bytes_skipped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn blocked_waits(&self) -> u64 {
        self.blocked_waits.load(Ordering::Relaxed)
    }

    /// 生成报告
    ///
    /// `bytes_per_sec` 用于把字节数换算成时长，为 0 时不显示时长
    pub fn report(&self, bytes_per_sec: u32) -> StatsReport {
        StatsReport {
            samples_received: self.samples_received.load(Ordering::Relaxed),
            preroll_samples: self.preroll_samples.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_skipped: self.bytes_skipped.load(Ordering::Relaxed),
            gap_bytes: self.gap_bytes.load(Ordering::Relaxed),
            bytes_zeroed: self.bytes_zeroed.load(Ordering::Relaxed),
            underrun_count: self.underrun_count.load(Ordering::Relaxed),
            blocked_waits: self.blocked_waits.load(Ordering::Relaxed),
            bytes_per_sec,
        }
    }
}

/// 统计报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsReport {
    pub samples_received: u64,
    pub preroll_samples: u64,
    pub bytes_written: u64,
    pub bytes_skipped: u64,
    pub gap_bytes: u64,
    pub bytes_zeroed: u64,
    pub underrun_count: u64,
    pub blocked_waits: u64,
    pub bytes_per_sec: u32,
}

impl StatsReport {
    fn millis(&self, bytes: u64) -> Option<f64> {
        (self.bytes_per_sec > 0).then(|| bytes as f64 * 1000.0 / self.bytes_per_sec as f64)
    }
}

impl std::fmt::Display for StatsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Render Statistics")?;
        writeln!(f, "=================")?;
        writeln!(
            f,
            "Samples received: {} ({} preroll)",
            self.samples_received, self.preroll_samples
        )?;

        for (label, bytes) in [
            ("Written", self.bytes_written),
            ("Skipped (late)", self.bytes_skipped),
            ("Gap (early)", self.gap_bytes),
            ("Zeroed", self.bytes_zeroed),
        ] {
            match self.millis(bytes) {
                Some(ms) => writeln!(f, "{:<16} {} bytes ({:.1} ms)", label, bytes, ms)?,
                None => writeln!(f, "{:<16} {} bytes", label, bytes)?,
            }
        }
        writeln!(f)?;

        writeln!(f, "Underruns: {}", self.underrun_count)?;
        writeln!(f, "Blocked waits: {}", self.blocked_waits)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = RenderStats::new();
        stats.record_sample(false);
        stats.record_sample(true);
        stats.add_written(400);
        stats.add_skipped(40);
        stats.record_underrun();
        stats.record_blocked();
        stats.record_blocked();

        let report = stats.report(4000);
        assert_eq!(report.samples_received, 2);
        assert_eq!(report.preroll_samples, 1);
        assert_eq!(report.bytes_written, 400);
        assert_eq!(report.bytes_skipped, 40);
        assert_eq!(report.underrun_count, 1);
        assert_eq!(report.blocked_waits, 2);
    }

    #[test]
    fn test_report_display() {
        let stats = RenderStats::new();
        stats.add_written(2000);
        let text = stats.report(4000).to_string();
        assert!(text.contains("2000 bytes (500.0 ms)"), "{}", text);
        assert!(text.contains("Underruns: 0"));

        // 无格式时不换算时长
        let text = stats.report(0).to_string();
        assert!(text.contains("2000 bytes\n"), "{}", text);
    }
}
