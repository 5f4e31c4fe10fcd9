//! 字节环形缓冲区
//!
//! 包装一个循环硬件 buffer，调用方只给出起始偏移和数据，
//! 回绕拆分成两段的细节全部在这里处理。
//!
//! 只有软件写字节；硬件只推进自己的 play 游标

use std::ops::Range;

use super::device::{Cursor, SoundBuffer, TransportError};

/// 一次写入覆盖的两段区域
///
/// 不回绕时 `second` 为空区间
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segments {
    pub first: Range<usize>,
    pub second: Range<usize>,
}

impl Segments {
    /// 覆盖的总字节数
    #[inline]
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 写入结束后的下一个偏移
    #[inline]
    pub fn end(&self, size: usize) -> usize {
        if self.second.is_empty() {
            self.first.end % size
        } else {
            self.second.end % size
        }
    }
}

/// 计算 `[offset, offset + len)` 在容量为 `size` 的环上的两段
///
/// `len` 超过 `size` 时截断到 `size`
#[inline]
pub fn split(offset: usize, len: usize, size: usize) -> Segments {
    if size == 0 {
        return Segments {
            first: 0..0,
            second: 0..0,
        };
    }
    let offset = offset % size;
    let len = len.min(size);
    let first_len = len.min(size - offset);

    Segments {
        first: offset..offset + first_len,
        second: 0..len - first_len,
    }
}

/// 从 `from` 顺时针走到 `to` 的距离
#[inline]
pub fn distance(from: usize, to: usize, size: usize) -> usize {
    (to + size - from) % size
}

/// 字节环形缓冲区
pub struct RingBuffer {
    buffer: Box<dyn SoundBuffer>,
    size: usize,
    silence: u8,
}

impl RingBuffer {
    /// 包装硬件 buffer
    ///
    /// `silence` 是清零使用的字节（8-bit PCM 为 0x80）
    pub fn new(buffer: Box<dyn SoundBuffer>, size: usize, silence: u8) -> Self {
        Self {
            buffer,
            size,
            silence,
        }
    }

    /// 容量（字节）
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// 硬件游标
    #[inline]
    pub fn cursor(&self) -> Result<Cursor, TransportError> {
        self.buffer.cursor()
    }

    /// 底层硬件 buffer（播放控制用）
    #[inline]
    pub fn transport(&mut self) -> &mut dyn SoundBuffer {
        self.buffer.as_mut()
    }

    /// 从 `offset` 开始写入 `data`，必要时回绕
    ///
    /// 最多写入 `size` 字节，返回实际覆盖的区域
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<Segments, TransportError> {
        let segments = split(offset, data.len(), self.size);
        if segments.is_empty() {
            return Ok(segments);
        }

        let data = &data[..segments.len()];
        let mut copied = 0;
        self.buffer
            .lock(segments.first.start, segments.len(), &mut |first, second| {
                let head = first.len().min(data.len());
                first[..head].copy_from_slice(&data[..head]);
                let tail = second.len().min(data.len() - head);
                second[..tail].copy_from_slice(&data[head..head + tail]);
                copied = head + tail;
            })?;

        if copied != segments.len() {
            return Err(TransportError::LockFailed {
                offset: segments.first.start,
                len: segments.len(),
            });
        }
        Ok(segments)
    }

    /// 用静音字节填充 `[offset, offset + len)`
    pub fn fill_silence(&mut self, offset: usize, len: usize) -> Result<Segments, TransportError> {
        let segments = split(offset, len, self.size);
        if segments.is_empty() {
            return Ok(segments);
        }

        let silence = self.silence;
        self.buffer
            .lock(segments.first.start, segments.len(), &mut |first, second| {
                first.fill(silence);
                second.fill(silence);
            })?;
        Ok(segments)
    }

    /// 整个 buffer 填充静音
    pub fn clear(&mut self) -> Result<(), TransportError> {
        self.fill_silence(0, self.size).map(|_| ())
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("size", &self.size)
            .field("silence", &self.silence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::WaveFormat;
    use crate::audio::virtual_device::VirtualDevice;
    use crate::audio::{AudioDevice, BufferDesc};

    fn ring(size: usize) -> (VirtualDevice, RingBuffer) {
        let device = VirtualDevice::manual();
        let desc = BufferDesc {
            size,
            format: WaveFormat::pcm(8000, 1, 8),
        };
        let buffer = device.create_buffer(&desc).unwrap();
        (device, RingBuffer::new(buffer, size, 0x80))
    }

    #[test]
    fn test_split_without_wrap() {
        let segments = split(2, 4, 16);
        assert_eq!(segments.first, 2..6);
        assert!(segments.second.is_empty());
        assert_eq!(segments.end(16), 6);
    }

    #[test]
    fn test_split_wraps() {
        let segments = split(12, 8, 16);
        assert_eq!(segments.first, 12..16);
        assert_eq!(segments.second, 0..4);
        assert_eq!(segments.len(), 8);
        assert_eq!(segments.end(16), 4);
    }

    #[test]
    fn test_split_clamps_to_capacity() {
        let segments = split(4, 100, 16);
        assert_eq!(segments.len(), 16);
        assert_eq!(segments.end(16), 4);

        // 恰好写到末尾
        let segments = split(8, 8, 16);
        assert_eq!(segments.first, 8..16);
        assert_eq!(segments.end(16), 0);
    }

    #[test]
    fn test_distance() {
        assert_eq!(distance(1000, 1500, 44100), 500);
        assert_eq!(distance(44000, 100, 44100), 200);
        assert_eq!(distance(7, 7, 16), 0);
    }

    #[test]
    fn test_ring_buffer_wrap() {
        let (device, mut ring) = ring(8);
        let segments = ring.write(6, &[1, 2, 3, 4]).unwrap();
        assert_eq!(segments.first, 6..8);
        assert_eq!(segments.second, 0..2);
        assert_eq!(device.contents().unwrap(), vec![3, 4, 0x80, 0x80, 0x80, 0x80, 1, 2]);
    }

    #[test]
    fn test_fill_silence_touches_only_range() {
        let (device, mut ring) = ring(8);
        ring.write(0, &[9; 8]).unwrap();
        ring.fill_silence(7, 3).unwrap();
        assert_eq!(
            device.contents().unwrap(),
            vec![0x80, 0x80, 9, 9, 9, 9, 9, 0x80]
        );

        ring.clear().unwrap();
        assert!(device.contents().unwrap().iter().all(|&b| b == 0x80));
    }
}
