//! 正弦波信号源
//!
//! 确定性地生成 PCM 块，用于试听和离线测试

use std::f64::consts::TAU;
use std::time::Duration;

use super::{DecodeError, PcmChunk, SampleSource};
use crate::audio::{FormatTag, WaveFormat, TICKS_PER_SECOND};

/// 每块 20ms
const CHUNK_MS: u64 = 20;

/// 振幅（满幅的一半）
const AMPLITUDE: f64 = 0.5;

/// 正弦波信号源
#[derive(Debug, Clone)]
pub struct ToneSource {
    format: WaveFormat,
    frequency: f64,
    total_frames: u64,
    position: u64,
}

impl ToneSource {
    pub fn new(
        frequency: f64,
        duration: Duration,
        format: WaveFormat,
    ) -> Result<Self, DecodeError> {
        format
            .validate()
            .map_err(|e| DecodeError::InvalidTone(e.to_string()))?;
        if format.format_tag != FormatTag::Pcm {
            return Err(DecodeError::InvalidTone("only integer PCM is supported".into()));
        }
        let nyquist = format.sample_rate as f64 / 2.0;
        if !(frequency > 0.0 && frequency < nyquist) {
            return Err(DecodeError::InvalidTone(format!(
                "frequency {} Hz outside (0, {}) Hz",
                frequency, nyquist
            )));
        }

        let total_frames =
            (duration.as_nanos() * format.sample_rate as u128 / 1_000_000_000) as u64;
        Ok(Self {
            format,
            frequency,
            total_frames,
            position: 0,
        })
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// 生成下一块，结束时返回 None
    pub fn next_chunk(&mut self) -> Option<PcmChunk> {
        let remaining = self.total_frames - self.position;
        if remaining == 0 {
            return None;
        }

        let rate = self.format.sample_rate as u64;
        let frames = (rate * CHUNK_MS / 1000).max(1).min(remaining);
        let channels = self.format.channels as usize;

        let mut samples = Vec::with_capacity(frames as usize * channels);
        for n in self.position..self.position + frames {
            let phase = TAU * self.frequency * n as f64 / rate as f64;
            let value = (phase.sin() * AMPLITUDE * i32::MAX as f64) as i32;
            samples.extend(std::iter::repeat(value).take(channels));
        }

        let mut data = vec![0u8; samples.len() * self.format.bytes_per_sample()];
        let written = self.format.samples_to_bytes(&samples, &mut data);
        data.truncate(written);

        let start = self.ticks_at(self.position);
        self.position += frames;
        let stop = self.ticks_at(self.position);

        Some(PcmChunk { data, start, stop })
    }

    fn ticks_at(&self, frames: u64) -> i64 {
        (frames as i128 * TICKS_PER_SECOND as i128 / self.format.sample_rate as i128) as i64
    }
}

impl SampleSource for ToneSource {
    fn format(&self) -> WaveFormat {
        self.format
    }

    fn next_chunk(&mut self) -> Result<Option<PcmChunk>, DecodeError> {
        Ok(ToneSource::next_chunk(self))
    }
}
