//! 音频格式描述
//!
//! `WaveFormat` 描述 ring buffer 中字节流的布局，并负责
//! 字节偏移 ↔ 呈现时间（100ns tick）的换算。
//!
//! 样本打包：内部样本统一左对齐到 i32 的高位
//! - 8-bit: 无符号，取 bit[31:24] 后加 0x80 偏移
//! - 16-bit: 取 bit[31:16]
//! - 24-bit: 取 bit[31:8]
//! - 32-bit: 原样输出

use super::clock::TICKS_PER_SECOND;

/// 允许的最高采样率
pub const MAX_SAMPLE_RATE: u32 = 768_000;

/// 样本编码
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatTag {
    /// 整数 PCM（8-bit 无符号，其余有符号小端）
    Pcm,
    /// 32-bit IEEE float
    IeeeFloat,
}

/// 格式校验错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("channel count must be non-zero")]
    NoChannels,
    #[error("sample rate {0} Hz out of range")]
    SampleRate(u32),
    #[error("{0} bits per sample not supported")]
    BitDepth(u16),
    #[error("block alignment {actual} does not match {expected}")]
    BlockAlign { expected: u16, actual: u16 },
    #[error("average bytes per second {actual} does not match {expected}")]
    ByteRate { expected: u32, actual: u32 },
    #[error("{channels} channels of {bits} bits at {rate} Hz overflows the frame layout")]
    Overflow { channels: u16, bits: u16, rate: u32 },
}

/// 由声道数、位深和采样率推导 (block_align, avg_bytes_per_sec)，溢出时返回 None
fn frame_layout(channels: u16, bits_per_sample: u16, sample_rate: u32) -> Option<(u16, u32)> {
    let block_align = channels.checked_mul(bits_per_sample / 8)?;
    let byte_rate = sample_rate.checked_mul(u32::from(block_align))?;
    Some((block_align, byte_rate))
}

/// 音频格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaveFormat {
    pub format_tag: FormatTag,
    pub channels: u16,
    pub sample_rate: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    /// 附加格式数据长度
    pub extra_size: u16,
}

impl WaveFormat {
    /// 创建整数 PCM 格式，block_align / avg_bytes_per_sec 自动推导
    ///
    /// 溢出时两者饱和到最大值，`validate()` 会拒绝这样的格式
    pub fn pcm(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        let (block_align, avg_bytes_per_sec) = frame_layout(channels, bits_per_sample, sample_rate)
            .unwrap_or((u16::MAX, u32::MAX));
        Self {
            format_tag: FormatTag::Pcm,
            channels,
            sample_rate,
            avg_bytes_per_sec,
            block_align,
            bits_per_sample,
            extra_size: 0,
        }
    }

    /// 创建 32-bit float 格式
    pub fn float(sample_rate: u32, channels: u16) -> Self {
        Self {
            format_tag: FormatTag::IeeeFloat,
            ..Self::pcm(sample_rate, channels, 32)
        }
    }

    /// 校验各字段是否自洽
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.channels == 0 {
            return Err(FormatError::NoChannels);
        }
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(FormatError::SampleRate(self.sample_rate));
        }
        let depth_ok = match self.format_tag {
            FormatTag::Pcm => matches!(self.bits_per_sample, 8 | 16 | 24 | 32),
            FormatTag::IeeeFloat => self.bits_per_sample == 32,
        };
        if !depth_ok {
            return Err(FormatError::BitDepth(self.bits_per_sample));
        }

        let overflow = FormatError::Overflow {
            channels: self.channels,
            bits: self.bits_per_sample,
            rate: self.sample_rate,
        };
        let (expected_align, expected_rate) =
            frame_layout(self.channels, self.bits_per_sample, self.sample_rate).ok_or(overflow)?;
        if self.block_align != expected_align {
            return Err(FormatError::BlockAlign {
                expected: expected_align,
                actual: self.block_align,
            });
        }
        if self.avg_bytes_per_sec != expected_rate {
            return Err(FormatError::ByteRate {
                expected: expected_rate,
                actual: self.avg_bytes_per_sec,
            });
        }
        Ok(())
    }

    /// 是否可以在不重建 buffer 的前提下切换到 `other`
    ///
    /// 只允许采样率（及随之变化的字节率）不同
    pub fn is_renegotiable_to(&self, other: &WaveFormat) -> bool {
        self.format_tag == other.format_tag
            && self.channels == other.channels
            && self.block_align == other.block_align
            && self.bits_per_sample == other.bits_per_sample
            && self.extra_size == other.extra_size
    }

    /// 每帧的字节数
    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        self.block_align as usize
    }

    /// 每样本的字节数
    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    /// 静音字节：8-bit PCM 为中点 0x80，其余为 0
    #[inline]
    pub fn silence_byte(&self) -> u8 {
        if self.format_tag == FormatTag::Pcm && self.bits_per_sample == 8 {
            0x80
        } else {
            0
        }
    }

    /// 字节数 → 时长（ticks）
    ///
    /// 向上取整到下一个 tick，保证 `pos_from_time(time_from_pos(x)) == x`
    /// 对任意 block 对齐的 x 成立
    #[inline]
    pub fn time_from_pos(&self, pos: usize) -> i64 {
        let rate = self.avg_bytes_per_sec as i128;
        let ticks = (pos as i128 * TICKS_PER_SECOND as i128 + rate - 1) / rate;
        ticks as i64
    }

    /// 时长（ticks）→ 字节数，向下截断到 block 对齐，负值视为 0
    #[inline]
    pub fn pos_from_time(&self, time: i64) -> usize {
        if time <= 0 {
            return 0;
        }
        let bytes = time as i128 * self.avg_bytes_per_sec as i128 / TICKS_PER_SECOND as i128;
        let bytes = bytes as usize;
        bytes - bytes % self.bytes_per_frame().max(1)
    }

    /// 将 i32 样本（左对齐）打包为输出字节
    ///
    /// 返回写入的字节数
    pub fn samples_to_bytes(&self, samples: &[i32], output: &mut [u8]) -> usize {
        let width = self.bytes_per_sample();
        if width == 0 {
            return 0;
        }
        let count = samples.len().min(output.len() / width);

        for (sample, out) in samples[..count]
            .iter()
            .zip(output.chunks_exact_mut(width))
        {
            match self.bits_per_sample {
                8 => {
                    // 有符号 → 无符号偏移
                    out[0] = ((sample >> 24) as i8 as u8) ^ 0x80;
                }
                16 => {
                    // 右移 16 位取回 16-bit
                    let val = (sample >> 16) as i16;
                    out.copy_from_slice(&val.to_le_bytes());
                }
                24 => {
                    // 右移 8 位取回 24-bit（带符号）
                    let v = sample >> 8;
                    out[0] = (v & 0xFF) as u8;
                    out[1] = ((v >> 8) & 0xFF) as u8;
                    out[2] = ((v >> 16) & 0xFF) as u8;
                }
                _ => {
                    out.copy_from_slice(&sample.to_le_bytes());
                }
            }
        }

        count * width
    }
}

impl std::fmt::Display for WaveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.format_tag {
            FormatTag::Pcm => "PCM",
            FormatTag::IeeeFloat => "float",
        };
        write!(
            f,
            "{}Hz {}ch {}bit {} ({} B/s)",
            self.sample_rate, self.channels, self.bits_per_sample, kind, self.avg_bytes_per_sec
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_derives_layout() {
        let format = WaveFormat::pcm(44100, 2, 16);
        assert_eq!(format.block_align, 4);
        assert_eq!(format.avg_bytes_per_sec, 176_400);
        assert!(format.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inconsistent() {
        let mut format = WaveFormat::pcm(48000, 2, 16);
        format.block_align = 3;
        assert_eq!(
            format.validate(),
            Err(FormatError::BlockAlign { expected: 4, actual: 3 })
        );

        let format = WaveFormat::pcm(48000, 2, 12);
        assert_eq!(format.validate(), Err(FormatError::BitDepth(12)));

        let format = WaveFormat::pcm(0, 2, 16);
        assert_eq!(format.validate(), Err(FormatError::SampleRate(0)));

        let mut format = WaveFormat::pcm(48000, 1, 16);
        format.avg_bytes_per_sec = 1;
        assert!(matches!(format.validate(), Err(FormatError::ByteRate { .. })));
    }

    #[test]
    fn test_oversized_layout_is_rejected() {
        let format = WaveFormat::pcm(48000, 20_000, 32);
        assert_eq!(format.block_align, u16::MAX);
        assert!(matches!(format.validate(), Err(FormatError::Overflow { .. })));

        // 帧长度合法但字节率超出 u32
        let format = WaveFormat::pcm(MAX_SAMPLE_RATE, 16_000, 32);
        assert!(matches!(format.validate(), Err(FormatError::Overflow { .. })));

        // 手工拼出的格式同样不能 panic
        let format = WaveFormat {
            format_tag: FormatTag::Pcm,
            channels: 20_000,
            sample_rate: 44100,
            avg_bytes_per_sec: 0,
            block_align: 0,
            bits_per_sample: 32,
            extra_size: 0,
        };
        assert!(matches!(format.validate(), Err(FormatError::Overflow { .. })));
    }

    #[test]
    fn test_renegotiation_rules() {
        let base = WaveFormat::pcm(44100, 2, 16);

        // 只改采样率：允许
        assert!(base.is_renegotiable_to(&WaveFormat::pcm(48000, 2, 16)));
        // 改位深：拒绝
        assert!(!base.is_renegotiable_to(&WaveFormat::pcm(44100, 2, 8)));
        // 改声道：拒绝
        assert!(!base.is_renegotiable_to(&WaveFormat::pcm(44100, 1, 16)));
        // 改编码：拒绝
        assert!(!WaveFormat::pcm(44100, 2, 32).is_renegotiable_to(&WaveFormat::float(44100, 2)));
    }

    #[test]
    fn test_silence_byte() {
        assert_eq!(WaveFormat::pcm(8000, 1, 8).silence_byte(), 0x80);
        assert_eq!(WaveFormat::pcm(8000, 1, 16).silence_byte(), 0);
        assert_eq!(WaveFormat::float(48000, 2).silence_byte(), 0);
    }

    #[test]
    fn test_time_pos_conversion() {
        let format = WaveFormat::pcm(44100, 2, 16);
        // 1 秒
        assert_eq!(format.time_from_pos(176_400), TICKS_PER_SECOND);
        assert_eq!(format.pos_from_time(TICKS_PER_SECOND), 176_400);
        // 截断到 block 对齐
        assert_eq!(format.pos_from_time(TICKS_PER_SECOND / 1000) % 4, 0);
        assert_eq!(format.pos_from_time(-10), 0);
    }

    #[test]
    fn test_aligned_offsets_survive_time_conversion() {
        for format in [
            WaveFormat::pcm(44100, 2, 16),
            WaveFormat::pcm(48000, 6, 24),
            WaveFormat::pcm(22050, 1, 8),
            WaveFormat::pcm(192_000, 8, 32),
        ] {
            let align = format.bytes_per_frame();
            for frames in [1usize, 3, 7, 441, 1000, 44_099, 96_001] {
                let pos = frames * align;
                assert_eq!(
                    format.pos_from_time(format.time_from_pos(pos)),
                    pos,
                    "{} at {} bytes",
                    format,
                    pos
                );
            }
        }
    }

    #[test]
    fn test_16bit_pack() {
        let format = WaveFormat::pcm(48000, 1, 16);
        let mut out = [0u8; 4];
        let written = format.samples_to_bytes(&[0x4000_0000, -0x4000_0000], &mut out);
        assert_eq!(written, 4);
        assert_eq!(out, [0x00, 0x40, 0x00, 0xC0]);
    }

    #[test]
    fn test_24bit_pack_negative() {
        let format = WaveFormat::pcm(96000, 1, 24);
        let mut out = [0u8; 3];
        // -0x400000 左对齐
        format.samples_to_bytes(&[(-0x40_0000i32) << 8], &mut out);
        assert_eq!(out, [0x00, 0x00, 0xC0]);
    }

    #[test]
    fn test_8bit_pack_is_offset_binary() {
        let format = WaveFormat::pcm(8000, 1, 8);
        let mut out = [0u8; 3];
        format.samples_to_bytes(&[0, i32::MAX, i32::MIN], &mut out);
        assert_eq!(out, [0x80, 0xFF, 0x00]);
    }
}
