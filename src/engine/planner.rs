//! 写入位置规划
//!
//! 同步核心：根据样本期望的呈现时间和 buffer 当前状态，
//! 决定下一块数据写到 ring buffer 的哪里。
//!
//! - 偏差在容差内：顺序写入
//! - 迟到：丢弃已过期的开头部分，或从最早可写位置后留出空隙
//! - 提前：在最早可写位置之后留出空隙；提前太多则阻塞
//! - 已缓冲数据达到上限：阻塞（反压）

use super::config::RendererConfig;
use super::tracker::{Positions, PositionTracker};
use crate::audio::ring_buffer::distance;
use crate::audio::{TransportError, WaveFormat};

/// 阻塞原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// 样本的呈现时间超出可提前填充的范围
    TooEarly,
    /// 已缓冲未播放的数据达到上限
    BufferFull,
}

/// 规划结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePlan {
    /// 从 `target` 开始写，最多 `free` 字节，先丢弃 `skip` 字节输入
    Ready {
        target: usize,
        free: usize,
        skip: usize,
        /// 为提前数据留出的空隙字节数
        gap: usize,
    },
    /// 暂时不能写，调用方等待后重试
    Blocked(BlockReason),
}

/// 规划时的时间参考
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// 流时间（时钟当前时间减去流起点）
    pub now: i64,
    /// 样本期望的呈现时间
    pub write_at: i64,
}

/// 写入位置规划器
#[derive(Debug, Clone, Copy)]
pub struct WritePlanner {
    max_fill: i64,
    max_lag: i64,
}

impl WritePlanner {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            max_fill: config.max_fill_ticks(),
            max_lag: config.max_lag_ticks(),
        }
    }

    /// 更新游标并规划下一次写入
    ///
    /// `timing` 为 None 时（无时钟或样本无时间戳）总是顺序写入。
    /// 返回值第二项是本次游标更新的结果，供调用方统计
    pub fn plan(
        &self,
        tracker: &mut PositionTracker,
        format: &WaveFormat,
        timing: Option<Timing>,
    ) -> Result<(WritePlan, Positions), TransportError> {
        let positions = tracker.update_positions()?;
        let plan = self.plan_with(
            positions,
            tracker.last_play_pos(),
            tracker.size(),
            format,
            timing,
        );
        Ok((plan, positions))
    }

    fn plan_with(
        &self,
        positions: Positions,
        play: usize,
        size: usize,
        format: &WaveFormat,
        timing: Option<Timing>,
    ) -> WritePlan {
        let Positions {
            sequential,
            minimum,
            ..
        } = positions;

        let Some(Timing { now, write_at }) = timing.filter(|t| t.write_at >= 0) else {
            return self.finish(sequential, 0, 0, play, size, format);
        };

        // buffer 尚未填充时不允许任何偏差
        let max_lag = if sequential == minimum { 0 } else { self.max_lag };

        // 某个偏移的数据将在何时播放
        let time_at = |pos: usize| now + format.time_from_pos(distance(play, pos, size));

        let delta = write_at - time_at(sequential);
        if (-max_lag..=max_lag).contains(&delta) {
            log::trace!("Continuing from old position {}", sequential);
            return self.finish(sequential, 0, 0, play, size, format);
        }

        if delta < 0 {
            log::warn!(
                "Delta too big {}/{} ticks, overwriting old data or even skipping",
                delta,
                max_lag
            );
            let past = time_at(minimum) - write_at;
            if past >= 0 {
                let skip = format.pos_from_time(past);
                log::warn!("Skipping {} bytes", skip);
                self.finish(minimum, skip, 0, play, size, format)
            } else {
                let ahead = format.pos_from_time(-past);
                log::warn!("Advancing {} bytes", ahead);
                self.finish((minimum + ahead) % size, 0, ahead, play, size, format)
            }
        } else {
            log::warn!("Delta too big {}/{} ticks, too far ahead", delta, max_lag);
            if delta >= self.max_fill {
                return WritePlan::Blocked(BlockReason::TooEarly);
            }
            let ahead = format.pos_from_time(delta);
            log::warn!("Advancing {} bytes", ahead);
            self.finish((minimum + ahead) % size, 0, ahead, play, size, format)
        }
    }

    fn finish(
        &self,
        target: usize,
        skip: usize,
        gap: usize,
        play: usize,
        size: usize,
        format: &WaveFormat,
    ) -> WritePlan {
        // 写到 play 游标为止，不覆盖未播放的数据
        let free = distance(target, play, size);
        let buffered = format.time_from_pos(size - free);
        if buffered >= self.max_fill {
            log::trace!("Blocked: too full {} / {} ticks", buffered, self.max_fill);
            return WritePlan::Blocked(BlockReason::BufferFull);
        }
        WritePlan::Ready {
            target,
            free,
            skip,
            gap,
        }
    }
}
