//! 硬件传输抽象
//!
//! 渲染器只通过这两个 trait 访问声卡：
//! - `AudioDevice`: 按描述创建播放 buffer
//! - `SoundBuffer`: 一个循环播放的硬件 buffer，暴露 play/write 游标
//!
//! 每个平台的音频 API 各自实现；`VirtualDevice` 是进程内实现

use super::format::WaveFormat;

/// 音量下限（百分之一 dB，-100 dB）
pub const VOLUME_MIN: i32 = -10_000;
/// 音量上限（0 dB，不衰减）
pub const VOLUME_MAX: i32 = 0;
/// 声像最左
pub const PAN_LEFT: i32 = -10_000;
/// 声像最右
pub const PAN_RIGHT: i32 = 10_000;

/// 传输层错误
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to create sound buffer: {0}")]
    CreateFailed(String),
    #[error("failed to lock {len} bytes at offset {offset}")]
    LockFailed { offset: usize, len: usize },
    #[error("failed to query cursor position")]
    CursorFailed,
    #[error("playback control failed: {0}")]
    ControlFailed(String),
    #[error("frequency {0} Hz not supported")]
    FrequencyNotSupported(u32),
    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(usize),
}

/// 硬件 buffer 创建参数
#[derive(Clone, Copy, Debug)]
pub struct BufferDesc {
    /// 字节容量
    pub size: usize,
    /// 初始格式
    pub format: WaveFormat,
}

/// 硬件游标快照
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor {
    /// 正在输出的字节偏移
    pub play: usize,
    /// 在此之前的区域已排队待播，不可写
    pub write: usize,
}

/// 音频设备
pub trait AudioDevice: Send + Sync {
    /// 设备名
    fn name(&self) -> &str;

    /// 创建硬件 buffer
    fn create_buffer(&self, desc: &BufferDesc) -> Result<Box<dyn SoundBuffer>, TransportError>;
}

/// 循环硬件 buffer
///
/// 游标都在 `[0, size)` 内，硬件只推进游标，字节只由软件写入
pub trait SoundBuffer: Send {
    /// 读取当前 play/write 游标
    fn cursor(&self) -> Result<Cursor, TransportError>;

    /// 锁定 `[offset, offset + len)`（按容量回绕）并交给 `f` 写入
    ///
    /// 回绕时区域分成两段，第二段从 0 开始，不回绕时第二段为空。
    /// `f` 返回即解锁
    fn lock(
        &mut self,
        offset: usize,
        len: usize,
        f: &mut dyn FnMut(&mut [u8], &mut [u8]),
    ) -> Result<(), TransportError>;

    /// 开始播放
    fn play(&mut self, looping: bool) -> Result<(), TransportError>;

    /// 停止播放，游标保持不动
    fn stop(&mut self) -> Result<(), TransportError>;

    /// 音量（百分之一 dB，`VOLUME_MIN..=VOLUME_MAX`）
    fn set_volume(&mut self, volume: i32) -> Result<(), TransportError>;

    /// 声像（`PAN_LEFT..=PAN_RIGHT`）
    fn set_pan(&mut self, pan: i32) -> Result<(), TransportError>;

    /// 播放频率（Hz）
    fn set_frequency(&mut self, hz: u32) -> Result<(), TransportError>;
}
