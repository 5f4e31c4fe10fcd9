//! Ring buffer 游标跟踪
//!
//! 每次更新：
//! 1. 读取硬件 play/write 游标
//! 2. 把上次 play 游标到本次 play 游标之间已播放的区域清成静音，
//!    防止回绕后重放旧数据
//! 3. 判断软件写游标是否已被硬件追上（underrun）

use crate::audio::ring_buffer::{distance, RingBuffer, Segments};
use crate::audio::TransportError;

/// 一次游标更新的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Positions {
    /// 顺序写入的下一个偏移
    pub sequential: usize,
    /// 硬件允许写入的最早偏移（硬件 write 游标）
    pub minimum: usize,
    /// 本次更新是否检测到 underrun
    pub underrun: bool,
    /// 本次清零的字节数
    pub zeroed: usize,
}

/// 游标跟踪器
///
/// 独占 ring buffer；`write_pos` 为 None 表示未设置，下次写入跟随硬件
#[derive(Debug)]
pub struct PositionTracker {
    ring: RingBuffer,
    last_play_pos: usize,
    write_pos: Option<usize>,
}

impl PositionTracker {
    pub fn new(ring: RingBuffer) -> Self {
        Self {
            ring,
            last_play_pos: 0,
            write_pos: None,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.ring.size()
    }

    #[inline]
    pub fn last_play_pos(&self) -> usize {
        self.last_play_pos
    }

    #[inline]
    pub fn write_pos(&self) -> Option<usize> {
        self.write_pos
    }

    pub fn ring_mut(&mut self) -> &mut RingBuffer {
        &mut self.ring
    }

    /// 更新游标并清零已播放区域
    pub fn update_positions(&mut self) -> Result<Positions, TransportError> {
        self.refresh(false)
    }

    /// 流结束排空时的游标更新
    ///
    /// 数据已全部交给硬件，硬件 write 游标越过软件写游标是预期结果，
    /// 不算 underrun
    pub fn update_positions_draining(&mut self) -> Result<Positions, TransportError> {
        self.refresh(true)
    }

    fn refresh(&mut self, draining: bool) -> Result<Positions, TransportError> {
        let size = self.ring.size();
        let cursor = self.ring.cursor()?;
        let old_play = self.last_play_pos;

        let adv = distance(old_play, cursor.play, size);
        self.last_play_pos = cursor.play;
        if adv > 0 {
            log::trace!(
                "Moving from {} to {}: clearing {} bytes",
                old_play,
                cursor.play,
                adv
            );
            self.ring.fill_silence(old_play, adv)?;
        }

        let minimum = cursor.write;
        let mut underrun = false;
        let sequential = match self.write_pos {
            None => minimum,
            Some(write_pos) => {
                // 都以上次的 play 游标为起点比较；写游标与之重合算作领先整圈
                let mut software_lead = distance(old_play, write_pos, size);
                if software_lead == 0 {
                    software_lead = size;
                }
                let hardware_lead = distance(old_play, minimum, size);

                if draining && software_lead <= hardware_lead {
                    log::debug!("Hardware reached write position {}", write_pos);
                    self.write_pos = None;
                    minimum
                } else if software_lead < hardware_lead {
                    log::warn!(
                        "Underrun of data occurred: write position {} lapped by hardware at {}",
                        write_pos,
                        minimum
                    );
                    self.write_pos = None;
                    underrun = true;
                    minimum
                } else {
                    write_pos
                }
            }
        };

        Ok(Positions {
            sequential,
            minimum,
            underrun,
            zeroed: adv,
        })
    }

    /// 在 `offset` 写入数据并推进软件写游标
    pub fn commit(&mut self, offset: usize, data: &[u8]) -> Result<Segments, TransportError> {
        let segments = self.ring.write(offset, data)?;
        if !segments.is_empty() {
            self.write_pos = Some(segments.end(self.ring.size()));
        }
        Ok(segments)
    }

    /// 写游标复位为未设置
    pub fn reset_write_pos(&mut self) {
        self.write_pos = None;
    }

    /// 整个 buffer 清零并复位写游标
    pub fn clear(&mut self) -> Result<(), TransportError> {
        self.write_pos = None;
        self.ring.clear()
    }
}
