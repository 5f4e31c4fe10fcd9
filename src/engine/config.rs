//! 渲染器配置

use std::time::Duration;

use super::error::RenderError;
use crate::audio::clock::ticks_from_duration;
use crate::audio::WaveFormat;

/// 渲染器配置
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// 已缓冲未播放的数据达到该时长即阻塞写入
    /// buffer 仍可被写满，但从这个水位开始等待
    pub max_fill: Duration,
    /// 稳态时允许的时间偏差，超出则跳过或留空隙
    pub max_lag: Duration,
    /// 阻塞时单次等待的上限
    pub wait_interval: Duration,
    /// 硬件 buffer 时长
    pub buffer_duration: Duration,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            max_fill: Duration::from_millis(150),
            max_lag: Duration::from_millis(50),
            wait_interval: Duration::from_millis(10),
            // 1 秒，即 avg_bytes_per_sec 字节
            buffer_duration: Duration::from_secs(1),
        }
    }
}

impl RendererConfig {
    /// 检查配置是否自洽
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.wait_interval.is_zero() {
            return Err(RenderError::InvalidConfig(
                "wait interval must be non-zero".into(),
            ));
        }
        if self.max_fill.is_zero() {
            return Err(RenderError::InvalidConfig("max fill must be non-zero".into()));
        }
        if self.max_fill >= self.buffer_duration {
            return Err(RenderError::InvalidConfig(format!(
                "max fill {:?} must be shorter than the buffer ({:?})",
                self.max_fill, self.buffer_duration
            )));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn max_fill_ticks(&self) -> i64 {
        ticks_from_duration(self.max_fill)
    }

    #[inline]
    pub(crate) fn max_lag_ticks(&self) -> i64 {
        ticks_from_duration(self.max_lag)
    }

    /// 给定格式下的 buffer 字节数（block 对齐）
    pub fn buffer_bytes(&self, format: &WaveFormat) -> usize {
        format.pos_from_time(ticks_from_duration(self.buffer_duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_fill_ticks(), 1_500_000);
        assert_eq!(config.max_lag_ticks(), 500_000);
    }

    #[test]
    fn test_default_buffer_is_one_second() {
        let config = RendererConfig::default();
        let format = WaveFormat::pcm(44100, 2, 16);
        assert_eq!(config.buffer_bytes(&format), 176_400);
    }

    #[test]
    fn test_validate_rejects_max_fill_beyond_buffer() {
        let config = RendererConfig {
            max_fill: Duration::from_secs(2),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RenderError::InvalidConfig(_))));

        let config = RendererConfig {
            wait_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
