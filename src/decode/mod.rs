//! 上游样本源
//!
//! - `AudioDecoder`: symphonia 文件解码
//! - `ToneSource`: 正弦波发生器

pub mod decoder;
pub mod tone;

pub use decoder::{AudioDecoder, AudioInfo};
pub use tone::ToneSource;

use crate::audio::WaveFormat;

/// 解码错误
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to open file: {0}")]
    FileOpen(#[from] std::io::Error),
    #[error("unsupported audio format")]
    UnsupportedFormat,
    #[error("no audio track found")]
    NoAudioTrack,
    #[error("failed to create decoder: {0}")]
    DecoderCreation(String),
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    #[error("invalid tone: {0}")]
    InvalidTone(String),
}

/// 一块交错 PCM 数据及其呈现时间（ticks）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmChunk {
    pub data: Vec<u8>,
    pub start: i64,
    pub stop: i64,
}

/// 按块产出 PCM 的样本源
pub trait SampleSource {
    /// 产出数据的格式
    fn format(&self) -> WaveFormat;

    /// 下一块数据，结束时返回 None
    fn next_chunk(&mut self) -> Result<Option<PcmChunk>, DecodeError>;
}
