//! 样本写入循环
//!
//! 持有流锁运行；每次需要等待时先释放锁，在 flush 信号上等待
//! 至多一个 `wait_interval`，醒来后重新加锁并检查 flush / 停止。

use std::sync::MutexGuard;

use super::error::RenderError;
use super::planner::{Timing, WritePlan};
use super::state::StreamState;
use super::tracker::Positions;
use super::{Shared, Stream};

/// 一次可执行的写入
#[derive(Debug, Clone, Copy)]
struct Chunk {
    target: usize,
    free: usize,
    skip: usize,
}

/// 把 `data` 写入 ring buffer
///
/// 只有第一块使用 `start` 做时间对齐，之后顺序写入。
/// Paused 状态下不写入，持续等待直到开始播放、flush 或停止
pub(super) fn feed<'a>(
    shared: &'a Shared,
    mut stream: MutexGuard<'a, Stream>,
    start: Option<i64>,
    data: &[u8],
) -> Result<(), RenderError> {
    let mut write_at = start;
    let mut data = data;

    while !data.is_empty() && stream.state != StreamState::Stopped {
        let chunk = if stream.state.is_streaming() {
            plan_chunk(shared, &mut stream, write_at)?
        } else {
            None
        };

        let Some(Chunk { target, free, skip }) = chunk else {
            shared.stats.record_blocked();
            drop(stream);
            shared.flush_signal.wait_timeout(shared.config.wait_interval);
            stream = shared.lock_stream();

            if shared.is_flushing() || stream.state == StreamState::Stopped {
                log::debug!("Sample interrupted while {}", stream.state);
                return if stream.state == StreamState::Paused {
                    Ok(())
                } else {
                    Err(RenderError::WrongState)
                };
            }
            continue;
        };
        write_at = None;

        if skip > 0 {
            let dropped = skip.min(data.len());
            log::warn!("Sample dropped {} of {} bytes", dropped, data.len());
            shared.stats.add_skipped(dropped);
        }
        if skip >= data.len() {
            return Ok(());
        }
        data = &data[skip..];

        let len = free.min(data.len());
        let tracker = stream.tracker.as_mut().ok_or(RenderError::NotConnected)?;
        let segments = tracker.commit(target, &data[..len]).map_err(|e| {
            log::error!("Failed to lock sound buffer: {}", e);
            RenderError::from(e)
        })?;

        log::trace!(
            "Wrote {} bytes at {}, next at {:?} ({}/{})",
            segments.len(),
            target,
            tracker.write_pos(),
            free,
            data.len()
        );
        shared.stats.add_written(segments.len());
        data = &data[segments.len()..];
    }

    Ok(())
}

/// 更新游标并规划下一块；阻塞时返回 None
fn plan_chunk(
    shared: &Shared,
    stream: &mut Stream,
    write_at: Option<i64>,
) -> Result<Option<Chunk>, RenderError> {
    let timing = stream
        .stream_time()
        .zip(write_at)
        .map(|(now, write_at)| Timing { now, write_at });

    let Stream {
        tracker, format, ..
    } = stream;
    let (Some(tracker), Some(format)) = (tracker.as_mut(), format.as_ref()) else {
        return Err(RenderError::NotConnected);
    };

    let (plan, positions) = shared.planner.plan(tracker, format, timing)?;
    record_positions(shared, &positions);

    match plan {
        WritePlan::Ready {
            target,
            free,
            skip,
            gap,
        } => {
            shared.stats.add_gap(gap);
            Ok(Some(Chunk { target, free, skip }))
        }
        WritePlan::Blocked(reason) => {
            log::trace!("Write blocked: {:?}", reason);
            Ok(None)
        }
    }
}

/// 流结束后等待硬件播完已写入的数据
///
/// 返回 true 表示在 Running 状态下排空完成；
/// 被暂停、停止或 flush 打断时返回 false
pub(super) fn drain(shared: &Shared) -> Result<bool, RenderError> {
    loop {
        let mut stream = shared.lock_stream();
        if stream.state != StreamState::Running || shared.is_flushing() {
            return Ok(false);
        }
        let Some(tracker) = stream.tracker.as_mut() else {
            return Ok(false);
        };

        let positions = tracker.update_positions_draining()?;
        record_positions(shared, &positions);
        if positions.sequential == positions.minimum {
            log::debug!("End of stream drained");
            return Ok(true);
        }

        drop(stream);
        shared.flush_signal.wait_timeout(shared.config.wait_interval);
    }
}

fn record_positions(shared: &Shared, positions: &Positions) {
    shared.stats.add_zeroed(positions.zeroed);
    if positions.underrun {
        shared.stats.record_underrun();
    }
}
