//! 音频核心模块
//!
//! 包含：
//! - Clock: 100ns tick 参考时钟
//! - Format: 音频格式与字节/时间换算
//! - Device: 硬件传输抽象
//! - Ring Buffer: 带回绕处理的字节环
//! - Virtual Device: 进程内声卡实现
//! - Stats: 渲染统计

pub mod clock;
pub mod device;
pub mod format;
pub mod ring_buffer;
pub mod stats;
pub mod virtual_device;

pub use clock::{Clock, ManualClock, SystemClock, TICKS_PER_MILLISECOND, TICKS_PER_SECOND};
pub use device::{AudioDevice, BufferDesc, Cursor, SoundBuffer, TransportError};
pub use format::{FormatError, FormatTag, WaveFormat};
pub use ring_buffer::{RingBuffer, Segments};
pub use stats::{RenderStats, StatsReport};
pub use virtual_device::{CursorMode, VirtualDevice, VirtualDeviceConfig};
