//! 进程内虚拟声卡
//!
//! 行为模仿循环播放的硬件 buffer：
//! - Manual 模式：游标只由调用方移动（测试用）
//! - Realtime 模式：播放时 play 游标按墙钟时间和播放频率推进，
//!   write 游标领先 `write_lead`
//!
//! 同时统计被"硬件"消费的字节数，并支持故障注入

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;

use super::device::{AudioDevice, BufferDesc, Cursor, SoundBuffer, TransportError};
use super::ring_buffer::split;

/// 游标推进方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorMode {
    /// 只由 `set_cursor` / `advance` 移动
    Manual,
    /// 随墙钟时间推进
    Realtime,
}

/// 虚拟设备配置
#[derive(Clone, Debug)]
pub struct VirtualDeviceConfig {
    pub mode: CursorMode,
    /// Realtime 模式下 write 游标领先 play 游标的时长
    pub write_lead: Duration,
    /// 是否 mlock buffer 内存，防止 page fault
    pub lock_memory: bool,
}

impl Default for VirtualDeviceConfig {
    fn default() -> Self {
        Self {
            mode: CursorMode::Realtime,
            write_lead: Duration::from_millis(10),
            lock_memory: false,
        }
    }
}

/// Realtime 模式的时间锚点
struct Anchor {
    started: Instant,
    /// 锚点时刻已消费的总字节数
    base: u64,
}

/// 单个虚拟 buffer 的共享状态
struct BufferState {
    data: Mutex<Vec<u8>>,
    size: usize,
    block_align: usize,

    // play/write 游标会被控制线程和渲染线程同时读写
    play_pos: CachePadded<AtomicUsize>,
    write_pos: CachePadded<AtomicUsize>,

    playing: AtomicBool,
    looping: AtomicBool,
    frequency: AtomicU32,
    volume: AtomicI32,
    pan: AtomicI32,

    /// Realtime 模式已观测到的消费总量
    consumed: AtomicU64,
    anchor: Mutex<Option<Anchor>>,

    fail_lock: AtomicBool,
    fail_control: AtomicBool,
    memory_locked: AtomicBool,
}

impl BufferState {
    fn data(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn anchor(&self) -> MutexGuard<'_, Option<Anchor>> {
        self.anchor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 当前频率下每秒的字节数
    fn bytes_per_sec(&self) -> u64 {
        self.frequency.load(Ordering::Acquire) as u64 * self.block_align as u64
    }

    fn align(&self, bytes: u64) -> u64 {
        bytes - bytes % self.block_align.max(1) as u64
    }

    /// Realtime 模式下按经过时间计算消费总量
    fn realtime_total(&self, anchor: &Anchor) -> u64 {
        let elapsed = anchor.started.elapsed();
        let bytes = elapsed.as_nanos() * self.bytes_per_sec() as u128 / 1_000_000_000;
        anchor.base + self.align(bytes as u64)
    }

    fn lead_bytes(&self, lead: Duration) -> usize {
        let bytes = lead.as_nanos() * self.bytes_per_sec() as u128 / 1_000_000_000;
        (self.align(bytes as u64) as usize).min(self.size.saturating_sub(self.block_align))
    }

    /// 停止时把锚点折算进已消费总量
    fn freeze(&self) {
        let mut anchor = self.anchor();
        if let Some(current) = anchor.take() {
            let total = self.realtime_total(&current);
            self.consumed.store(total, Ordering::Release);
            self.play_pos
                .store((total % self.size as u64) as usize, Ordering::Release);
        }
    }

    fn lock_memory(&self) -> bool {
        let data = self.data();
        let ptr = data.as_ptr() as *const libc::c_void;
        let len = data.len();

        let result = unsafe { libc::mlock(ptr, len) };
        if result == 0 {
            self.memory_locked.store(true, Ordering::Release);
            log::debug!("Virtual buffer memory locked: {} bytes", len);
            true
        } else {
            log::warn!(
                "Failed to lock virtual buffer memory: {}",
                std::io::Error::last_os_error()
            );
            false
        }
    }

    fn unlock_memory(&self) {
        if !self.memory_locked.swap(false, Ordering::AcqRel) {
            return;
        }
        let data = self.data();
        unsafe {
            libc::munlock(data.as_ptr() as *const libc::c_void, data.len());
        }
        log::debug!("Virtual buffer memory unlocked");
    }
}

impl Drop for BufferState {
    fn drop(&mut self) {
        self.unlock_memory();
    }
}

struct DeviceInner {
    config: VirtualDeviceConfig,
    current: Mutex<Option<Arc<BufferState>>>,
    fail_create: AtomicBool,
    buffers_created: AtomicUsize,
}

/// 虚拟声卡
///
/// Clone 出来的句柄共享同一设备，测试可以在交给渲染器之后继续
/// 观察和驱动最近创建的 buffer
#[derive(Clone)]
pub struct VirtualDevice {
    inner: Arc<DeviceInner>,
}

impl VirtualDevice {
    pub fn new(config: VirtualDeviceConfig) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                config,
                current: Mutex::new(None),
                fail_create: AtomicBool::new(false),
                buffers_created: AtomicUsize::new(0),
            }),
        }
    }

    /// Manual 模式设备
    pub fn manual() -> Self {
        Self::new(VirtualDeviceConfig {
            mode: CursorMode::Manual,
            ..Default::default()
        })
    }

    /// Realtime 模式设备
    pub fn realtime() -> Self {
        Self::new(VirtualDeviceConfig::default())
    }

    pub fn config(&self) -> &VirtualDeviceConfig {
        &self.inner.config
    }

    fn current(&self) -> Option<Arc<BufferState>> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 已创建的 buffer 数
    pub fn buffers_created(&self) -> usize {
        self.inner.buffers_created.load(Ordering::Acquire)
    }

    /// 下一次 `create_buffer` 是否失败
    pub fn fail_create(&self, fail: bool) {
        self.inner.fail_create.store(fail, Ordering::Release);
    }

    /// 让当前 buffer 的下一次 lock 失败
    pub fn fail_next_lock(&self) {
        if let Some(state) = self.current() {
            state.fail_lock.store(true, Ordering::Release);
        }
    }

    /// 让当前 buffer 的下一次音量/声像设置失败
    pub fn fail_next_control(&self) {
        if let Some(state) = self.current() {
            state.fail_control.store(true, Ordering::Release);
        }
    }

    /// 当前 buffer 的容量
    pub fn buffer_size(&self) -> Option<usize> {
        self.current().map(|s| s.size)
    }

    /// 当前 buffer 内容的拷贝
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.current().map(|s| s.data().clone())
    }

    /// 用 `byte` 填满当前 buffer（绕过渲染器，测试用）
    pub fn fill(&self, byte: u8) {
        if let Some(state) = self.current() {
            state.data().fill(byte);
        }
    }

    /// 直接设置游标（Manual 模式）
    pub fn set_cursor(&self, play: usize, write: usize) {
        if let Some(state) = self.current() {
            state.play_pos.store(play % state.size, Ordering::Release);
            state.write_pos.store(write % state.size, Ordering::Release);
        }
    }

    /// play/write 游标同时前进 `bytes`（Manual 模式）
    pub fn advance(&self, bytes: usize) {
        if let Some(state) = self.current() {
            let play = state.play_pos.load(Ordering::Acquire);
            let write = state.write_pos.load(Ordering::Acquire);
            state
                .play_pos
                .store((play + bytes) % state.size, Ordering::Release);
            state
                .write_pos
                .store((write + bytes) % state.size, Ordering::Release);
            state.consumed.fetch_add(bytes as u64, Ordering::AcqRel);
        }
    }

    pub fn cursor(&self) -> Option<Cursor> {
        let state = self.current()?;
        cursor_of(&state, &self.inner.config).ok()
    }

    pub fn is_playing(&self) -> bool {
        self.current()
            .map(|s| s.playing.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn is_looping(&self) -> bool {
        self.current()
            .map(|s| s.looping.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn frequency(&self) -> Option<u32> {
        self.current().map(|s| s.frequency.load(Ordering::Acquire))
    }

    pub fn volume(&self) -> Option<i32> {
        self.current().map(|s| s.volume.load(Ordering::Acquire))
    }

    pub fn pan(&self) -> Option<i32> {
        self.current().map(|s| s.pan.load(Ordering::Acquire))
    }

    /// 已被播放消费的总字节数
    pub fn consumed_bytes(&self) -> u64 {
        let Some(state) = self.current() else {
            return 0;
        };
        let anchor = state.anchor();
        match anchor.as_ref() {
            Some(current) => state.realtime_total(current),
            None => state.consumed.load(Ordering::Acquire),
        }
    }

    /// 当前 buffer 内存是否已 mlock
    pub fn is_memory_locked(&self) -> bool {
        self.current()
            .map(|s| s.memory_locked.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

impl Default for VirtualDevice {
    fn default() -> Self {
        Self::realtime()
    }
}

fn cursor_of(state: &BufferState, config: &VirtualDeviceConfig) -> Result<Cursor, TransportError> {
    match config.mode {
        CursorMode::Manual => Ok(Cursor {
            play: state.play_pos.load(Ordering::Acquire),
            write: state.write_pos.load(Ordering::Acquire),
        }),
        CursorMode::Realtime => {
            let anchor = state.anchor();
            match anchor.as_ref() {
                Some(current) => {
                    let play = (state.realtime_total(current) % state.size as u64) as usize;
                    state.play_pos.store(play, Ordering::Release);
                    let write = (play + state.lead_bytes(config.write_lead)) % state.size;
                    Ok(Cursor { play, write })
                }
                None => {
                    // 停止时 write 与 play 重合
                    let play = state.play_pos.load(Ordering::Acquire);
                    Ok(Cursor { play, write: play })
                }
            }
        }
    }
}

impl AudioDevice for VirtualDevice {
    fn name(&self) -> &str {
        match self.inner.config.mode {
            CursorMode::Manual => "virtual (manual)",
            CursorMode::Realtime => "virtual",
        }
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Box<dyn SoundBuffer>, TransportError> {
        if self.inner.fail_create.load(Ordering::Acquire) {
            return Err(TransportError::CreateFailed("injected failure".into()));
        }
        if desc.size == 0 {
            return Err(TransportError::CreateFailed("zero-sized buffer".into()));
        }

        let mut data = Vec::new();
        data.try_reserve_exact(desc.size)
            .map_err(|_| TransportError::OutOfMemory(desc.size))?;
        data.resize(desc.size, desc.format.silence_byte());

        let state = Arc::new(BufferState {
            data: Mutex::new(data),
            size: desc.size,
            block_align: desc.format.bytes_per_frame(),
            play_pos: CachePadded::new(AtomicUsize::new(0)),
            write_pos: CachePadded::new(AtomicUsize::new(0)),
            playing: AtomicBool::new(false),
            looping: AtomicBool::new(false),
            frequency: AtomicU32::new(desc.format.sample_rate),
            volume: AtomicI32::new(0),
            pan: AtomicI32::new(0),
            consumed: AtomicU64::new(0),
            anchor: Mutex::new(None),
            fail_lock: AtomicBool::new(false),
            fail_control: AtomicBool::new(false),
            memory_locked: AtomicBool::new(false),
        });

        if self.inner.config.lock_memory {
            state.lock_memory();
        }

        *self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&state));
        self.inner.buffers_created.fetch_add(1, Ordering::AcqRel);

        log::debug!(
            "Virtual buffer created: {} bytes, {}",
            desc.size,
            desc.format
        );

        Ok(Box::new(VirtualBuffer {
            state,
            config: self.inner.config.clone(),
        }))
    }
}

/// 虚拟 buffer
struct VirtualBuffer {
    state: Arc<BufferState>,
    config: VirtualDeviceConfig,
}

impl VirtualBuffer {
    fn check_control(&self) -> Result<(), TransportError> {
        if self.state.fail_control.swap(false, Ordering::AcqRel) {
            return Err(TransportError::ControlFailed("injected failure".into()));
        }
        Ok(())
    }
}

impl SoundBuffer for VirtualBuffer {
    fn cursor(&self) -> Result<Cursor, TransportError> {
        cursor_of(&self.state, &self.config)
    }

    fn lock(
        &mut self,
        offset: usize,
        len: usize,
        f: &mut dyn FnMut(&mut [u8], &mut [u8]),
    ) -> Result<(), TransportError> {
        if self.state.fail_lock.swap(false, Ordering::AcqRel) || offset >= self.state.size {
            return Err(TransportError::LockFailed { offset, len });
        }

        let segments = split(offset, len, self.state.size);
        let mut data = self.state.data();
        let (head, tail) = data.split_at_mut(segments.first.start);
        // second 段总在 first 段之前
        let second = &mut head[segments.second.clone()];
        let first = &mut tail[..segments.first.len()];
        f(first, second);
        Ok(())
    }

    fn play(&mut self, looping: bool) -> Result<(), TransportError> {
        self.state.looping.store(looping, Ordering::Release);
        if self.state.playing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.config.mode == CursorMode::Realtime {
            let base = self.state.consumed.load(Ordering::Acquire);
            *self.state.anchor() = Some(Anchor {
                started: Instant::now(),
                base,
            });
        }
        log::debug!("Virtual buffer playing (looping: {})", looping);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        if !self.state.playing.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.state.freeze();
        log::debug!("Virtual buffer stopped");
        Ok(())
    }

    fn set_volume(&mut self, volume: i32) -> Result<(), TransportError> {
        self.check_control()?;
        self.state.volume.store(volume, Ordering::Release);
        Ok(())
    }

    fn set_pan(&mut self, pan: i32) -> Result<(), TransportError> {
        self.check_control()?;
        self.state.pan.store(pan, Ordering::Release);
        Ok(())
    }

    fn set_frequency(&mut self, hz: u32) -> Result<(), TransportError> {
        if hz == 0 || hz > super::format::MAX_SAMPLE_RATE {
            return Err(TransportError::FrequencyNotSupported(hz));
        }
        // 先按旧频率结算，再以新频率重新锚定
        let playing = self.state.playing.load(Ordering::Acquire);
        if playing {
            self.state.freeze();
        }
        self.state.frequency.store(hz, Ordering::Release);
        if playing && self.config.mode == CursorMode::Realtime {
            let base = self.state.consumed.load(Ordering::Acquire);
            *self.state.anchor() = Some(Anchor {
                started: Instant::now(),
                base,
            });
        }
        Ok(())
    }
}

impl Drop for VirtualBuffer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::WaveFormat;
    use crate::audio::ring_buffer::distance;

    fn queued_bytes(cursor: Cursor, size: usize) -> usize {
        distance(cursor.play, cursor.write, size)
    }

    fn desc(size: usize) -> BufferDesc {
        BufferDesc {
            size,
            format: WaveFormat::pcm(48000, 2, 16),
        }
    }

    #[test]
    fn test_manual_cursor() {
        let device = VirtualDevice::manual();
        let buffer = device.create_buffer(&desc(64)).unwrap();

        device.set_cursor(8, 16);
        assert_eq!(buffer.cursor().unwrap(), Cursor { play: 8, write: 16 });

        device.advance(60);
        assert_eq!(buffer.cursor().unwrap(), Cursor { play: 4, write: 12 });
        assert_eq!(device.consumed_bytes(), 60);
        assert_eq!(queued_bytes(buffer.cursor().unwrap(), 64), 8);
    }

    #[test]
    fn test_lock_splits_at_wrap() {
        let device = VirtualDevice::manual();
        let mut buffer = device.create_buffer(&desc(8)).unwrap();

        let mut lens = (0, 0);
        buffer
            .lock(6, 4, &mut |first, second| {
                first.fill(1);
                second.fill(2);
                lens = (first.len(), second.len());
            })
            .unwrap();

        assert_eq!(lens, (2, 2));
        assert_eq!(device.contents().unwrap(), vec![2, 2, 0, 0, 0, 0, 1, 1]);
    }

    #[test]
    fn test_injected_failures() {
        let device = VirtualDevice::manual();
        device.fail_create(true);
        assert!(matches!(
            device.create_buffer(&desc(8)),
            Err(TransportError::CreateFailed(_))
        ));

        device.fail_create(false);
        let mut buffer = device.create_buffer(&desc(8)).unwrap();
        device.fail_next_lock();
        assert!(buffer.lock(0, 4, &mut |_, _| {}).is_err());
        // 只失败一次
        assert!(buffer.lock(0, 4, &mut |_, _| {}).is_ok());

        device.fail_next_control();
        assert!(matches!(
            buffer.set_volume(-100),
            Err(TransportError::ControlFailed(_))
        ));
        assert_eq!(device.volume(), Some(0));
        buffer.set_pan(500).unwrap();
        assert_eq!(device.pan(), Some(500));
    }

    #[test]
    fn test_lock_memory_pins_buffer() {
        let device = VirtualDevice::new(VirtualDeviceConfig {
            mode: CursorMode::Manual,
            lock_memory: true,
            ..Default::default()
        });
        assert!(!device.is_memory_locked());
        let _buffer = device.create_buffer(&desc(4096)).unwrap();
        assert!(device.is_memory_locked());

        let unpinned = VirtualDevice::manual();
        let _buffer = unpinned.create_buffer(&desc(4096)).unwrap();
        assert!(!unpinned.is_memory_locked());
    }

    #[test]
    fn test_realtime_cursor_advances_while_playing() {
        let device = VirtualDevice::realtime();
        let mut buffer = device.create_buffer(&desc(192_000)).unwrap();

        let idle = buffer.cursor().unwrap();
        assert_eq!(idle.play, idle.write);

        buffer.play(true).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let cursor = buffer.cursor().unwrap();
        assert!(cursor.play > 0, "play cursor should advance");
        // 10ms @ 48kHz stereo 16-bit
        assert_eq!(queued_bytes(cursor, 192_000), 1920);

        buffer.stop().unwrap();
        let frozen = device.consumed_bytes();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(device.consumed_bytes(), frozen);
        assert!(!device.is_playing());
    }

    #[test]
    fn test_frequency_range() {
        let device = VirtualDevice::manual();
        let mut buffer = device.create_buffer(&desc(64)).unwrap();
        buffer.set_frequency(44100).unwrap();
        assert_eq!(device.frequency(), Some(44100));
        assert!(buffer.set_frequency(0).is_err());
    }
}
