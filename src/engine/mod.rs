//! 渲染引擎
//!
//! 把带时间戳的样本流送进循环硬件 buffer，并和参考时钟保持同步
//! 核心设计：
//! - 生产者线程调用 `receive`，buffer 满或样本太早时阻塞（反压）
//! - 控制线程通过 `start` / `pause` / `stop` / flush 切换状态，
//!   并随时可以唤醒被阻塞的生产者
//! - 硬件独立推进自己的 play 游标，软件只写字节

pub mod config;
pub mod error;
pub mod event;
mod feeder;
pub mod planner;
pub mod state;
pub mod tracker;

pub use config::RendererConfig;
pub use error::RenderError;
pub use event::{EventSink, RenderEvent};
pub use planner::{BlockReason, WritePlan, WritePlanner};
pub use state::{StateWait, StreamState};
pub use tracker::{PositionTracker, Positions};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::audio::device::{PAN_LEFT, PAN_RIGHT, VOLUME_MAX, VOLUME_MIN};
use crate::audio::{
    AudioDevice, BufferDesc, Clock, RenderStats, RingBuffer, SoundBuffer, StatsReport,
    SystemClock, WaveFormat,
};
use event::Signal;

/// 一个待渲染的媒体样本
#[derive(Debug, Clone, Copy)]
pub struct MediaSample<'a> {
    /// 交错 PCM 字节
    pub data: &'a [u8],
    /// 呈现起始时间（流时间，ticks）
    pub start: Option<i64>,
    /// 呈现结束时间
    pub stop: Option<i64>,
    /// 预滚样本只用于定位，不输出
    pub preroll: bool,
    /// 流中途切换的新格式
    pub format: Option<WaveFormat>,
}

impl<'a> MediaSample<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            start: None,
            stop: None,
            preroll: false,
            format: None,
        }
    }

    pub fn with_times(mut self, start: i64, stop: i64) -> Self {
        self.start = Some(start);
        self.stop = Some(stop);
        self
    }

    pub fn with_preroll(mut self, preroll: bool) -> Self {
        self.preroll = preroll;
        self
    }

    pub fn with_format(mut self, format: WaveFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// `receive` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    /// 已写入（或在暂停中被 flush 合法地打断）
    Rendered,
    /// 预滚样本，未写入
    Preroll,
    /// 流已结束或正在 flush，样本被忽略
    Declined,
}

/// 受流锁保护的状态
struct Stream {
    state: StreamState,
    format: Option<WaveFormat>,
    tracker: Option<PositionTracker>,
    /// 时钟原点，由 `start` 锁定
    stream_start: i64,
    eos: bool,
    volume: i32,
    pan: i32,
    media_time: Option<i64>,
    clock: Option<Weak<dyn Clock>>,
}

impl Stream {
    fn clock(&self) -> Option<Arc<dyn Clock>> {
        self.clock.as_ref()?.upgrade()
    }

    /// 流时间：时钟当前时间减去流起点，无时钟时为 None
    fn stream_time(&self) -> Option<i64> {
        self.clock().map(|clock| clock.now() - self.stream_start)
    }

    fn transport(&mut self) -> Option<&mut dyn SoundBuffer> {
        self.tracker
            .as_mut()
            .map(|tracker| tracker.ring_mut().transport())
    }
}

struct Shared {
    config: RendererConfig,
    planner: WritePlanner,
    device: Box<dyn AudioDevice>,
    stream: Mutex<Stream>,
    /// 状态切换完成（暂停后收到第一个样本、开始、停止、流结束）
    state_signal: Signal,
    /// 唤醒被阻塞的写入者（flush、停止）
    flush_signal: Signal,
    flushing: AtomicBool,
    stats: RenderStats,
    reference_clock: Arc<SystemClock>,
    events: Mutex<Option<Arc<dyn EventSink>>>,
}

impl Shared {
    fn lock_stream(&self) -> MutexGuard<'_, Stream> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    fn notify(&self, event: RenderEvent) {
        let sink = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sink {
            Some(sink) => sink.notify(event),
            None => log::debug!("No event sink for {:?}", event),
        }
    }

    /// 进入 Paused / Running 前的准备
    fn init_stream(&self, stream: &mut Stream) {
        if stream.tracker.is_some() {
            self.state_signal.reset();
        }
        stream.eos = false;
        self.flush_signal.reset();
    }

    /// 停止硬件播放并复位写游标
    fn stop_stream(&self, stream: &mut Stream) {
        if let Some(transport) = stream.transport() {
            if let Err(e) = transport.stop() {
                log::error!("Failed to stop playback: {}", e);
            }
        }
        if let Some(tracker) = stream.tracker.as_mut() {
            tracker.reset_write_pos();
        }
    }

    /// 离开活动状态后的清理，唤醒所有等待者
    fn cleanup_stream(&self, stream: &mut Stream) {
        stream.media_time = None;
        self.state_signal.set();
        self.flush_signal.set();
    }

    fn renegotiate(&self, stream: &mut Stream, new: WaveFormat) -> Result<(), RenderError> {
        let current = stream.format.ok_or(RenderError::NotConnected)?;
        if current == new {
            return Ok(());
        }

        let rejected = |reason: String| {
            log::warn!("Format change rejected: {}", reason);
            self.notify(RenderEvent::FormatRejected {
                reason: reason.clone(),
            });
            RenderError::TypeRejected(reason)
        };

        if !current.is_renegotiable_to(&new) {
            return Err(rejected(format!("cannot switch from {} to {}", current, new)));
        }
        if let Err(e) = new.validate() {
            return Err(rejected(e.to_string()));
        }

        if current.sample_rate != new.sample_rate {
            let transport = stream.transport().ok_or(RenderError::NotConnected)?;
            if let Err(e) = transport.set_frequency(new.sample_rate) {
                return Err(rejected(e.to_string()));
            }
            log::info!(
                "Sample rate changed {} -> {} Hz",
                current.sample_rate,
                new.sample_rate
            );
            self.notify(RenderEvent::FormatChanged {
                from_rate: current.sample_rate,
                to_rate: new.sample_rate,
            });
        }
        stream.format = Some(new);
        Ok(())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let stream = self
            .stream
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(transport) = stream.transport() {
            if let Err(e) = transport.stop() {
                log::error!("Failed to stop playback on drop: {}", e);
            }
        }
    }
}

/// 音频渲染器
///
/// 轻量句柄，Clone 后可以在生产者线程和控制线程之间共享。
/// 最后一个句柄释放时停止硬件播放
#[derive(Clone)]
pub struct Renderer {
    shared: Arc<Shared>,
}

impl Renderer {
    /// 创建渲染器
    pub fn new<D>(device: D, config: RendererConfig) -> Result<Self, RenderError>
    where
        D: AudioDevice + 'static,
    {
        config.validate()?;
        log::debug!("Renderer created on {}", device.name());

        Ok(Self {
            shared: Arc::new(Shared {
                planner: WritePlanner::new(&config),
                config,
                device: Box::new(device),
                stream: Mutex::new(Stream {
                    state: StreamState::Stopped,
                    format: None,
                    tracker: None,
                    stream_start: 0,
                    eos: false,
                    volume: VOLUME_MAX,
                    pan: 0,
                    media_time: None,
                    clock: None,
                }),
                state_signal: Signal::new(true),
                flush_signal: Signal::new(true),
                flushing: AtomicBool::new(false),
                stats: RenderStats::new(),
                reference_clock: Arc::new(SystemClock::new()),
                events: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &RendererConfig {
        &self.shared.config
    }

    pub fn device_name(&self) -> &str {
        self.shared.device.name()
    }

    /// 连接格式并创建硬件 buffer
    ///
    /// 只能在 Stopped 状态下调用；之前设置的音量、声像会应用到新 buffer
    pub fn connect(&self, format: WaveFormat) -> Result<(), RenderError> {
        format.validate()?;

        let mut stream = self.shared.lock_stream();
        if stream.state != StreamState::Stopped {
            return Err(RenderError::WrongState);
        }
        if stream.tracker.is_some() {
            return Err(RenderError::AlreadyConnected);
        }

        let size = self.shared.config.buffer_bytes(&format);
        let buffer = self
            .shared
            .device
            .create_buffer(&BufferDesc { size, format })
            .map_err(|e| {
                log::error!("Failed to create sound buffer: {}", e);
                RenderError::from_create(e)
            })?;

        let mut ring = RingBuffer::new(buffer, size, format.silence_byte());
        let transport = ring.transport();
        if let Err(e) = transport.set_volume(stream.volume) {
            log::warn!("Failed to apply volume {}: {}", stream.volume, e);
        }
        if let Err(e) = transport.set_pan(stream.pan) {
            log::warn!("Failed to apply pan {}: {}", stream.pan, e);
        }

        stream.tracker = Some(PositionTracker::new(ring));
        stream.format = Some(format);
        log::info!(
            "Connected {} ({} byte buffer on {})",
            format,
            size,
            self.shared.device.name()
        );
        Ok(())
    }

    /// 释放硬件 buffer
    pub fn disconnect(&self) -> Result<(), RenderError> {
        let mut stream = self.shared.lock_stream();
        if stream.state != StreamState::Stopped {
            return Err(RenderError::WrongState);
        }
        if stream.tracker.take().is_none() {
            return Err(RenderError::NotConnected);
        }
        stream.format = None;
        log::info!("Disconnected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock_stream().tracker.is_some()
    }

    /// 当前连接的格式
    pub fn format(&self) -> Option<WaveFormat> {
        self.shared.lock_stream().format
    }

    pub fn state(&self) -> StreamState {
        self.shared.lock_stream().state
    }

    /// 接收一个样本
    ///
    /// Running 时写入 ring buffer，buffer 满或样本太早时阻塞；
    /// Paused 时阻塞直到开始播放、flush 或停止
    pub fn receive(&self, sample: MediaSample<'_>) -> Result<Receipt, RenderError> {
        let shared = &self.shared;
        let mut stream = shared.lock_stream();

        if stream.eos || shared.is_flushing() {
            return Ok(Receipt::Declined);
        }
        if stream.state == StreamState::Stopped {
            return Err(RenderError::WrongState);
        }
        if stream.tracker.is_none() {
            return Err(RenderError::NotConnected);
        }

        if let Some(format) = sample.format {
            shared.renegotiate(&mut stream, format)?;
        }

        if stream.clock().is_some() {
            if let Some(start) = sample.start {
                stream.media_time = Some(start);
            }
        }

        if stream.state == StreamState::Paused {
            shared.state_signal.set();
        }

        shared.stats.record_sample(sample.preroll);
        if sample.preroll {
            log::trace!("Preroll sample of {} bytes", sample.data.len());
            return Ok(Receipt::Preroll);
        }

        feeder::feed(shared, stream, sample.start, sample.data)?;
        Ok(Receipt::Rendered)
    }

    /// 标记流结束，等待已写入的数据播完
    ///
    /// Running 状态下排空完成时发出 `RenderEvent::Complete`；
    /// 暂停中结束的流在下一次 `start` 时发出
    pub fn end_of_stream(&self) -> Result<(), RenderError> {
        let shared = &self.shared;
        {
            let mut stream = shared.lock_stream();
            stream.eos = true;
            shared.state_signal.set();
            log::debug!("End of stream while {}", stream.state);
        }

        let drained = feeder::drain(shared)?;

        {
            let mut stream = shared.lock_stream();
            if let Some(tracker) = stream.tracker.as_mut() {
                tracker.ring_mut().clear()?;
                shared.stats.add_zeroed(tracker.size());
            }
        }

        if drained {
            shared.notify(RenderEvent::Complete);
        }
        Ok(())
    }

    /// 开始 flush：之后的样本被忽略，阻塞的写入者立即返回
    pub fn begin_flush(&self) {
        self.shared.flushing.store(true, Ordering::Release);
        self.shared.flush_signal.set();
        log::debug!("Begin flush");
    }

    /// 结束 flush：清空 buffer，下一次写入跟随硬件游标
    pub fn end_flush(&self) -> Result<(), RenderError> {
        let shared = &self.shared;
        let mut stream = shared.lock_stream();

        shared.flushing.store(false, Ordering::Release);
        stream.eos = false;
        stream.media_time = None;
        shared.flush_signal.reset();

        if let Some(tracker) = stream.tracker.as_mut() {
            tracker.clear()?;
        }
        log::debug!("End flush");
        Ok(())
    }

    /// 暂停
    ///
    /// 从 Stopped 进入时等待第一个样本，`wait_state` 在此之前返回 Intermediate
    pub fn pause(&self) -> Result<(), RenderError> {
        let shared = &self.shared;
        let mut stream = shared.lock_stream();
        match stream.state {
            StreamState::Paused => return Ok(()),
            StreamState::Stopped => shared.init_stream(&mut stream),
            StreamState::Running => shared.stop_stream(&mut stream),
        }
        log::info!("{} -> paused", stream.state);
        stream.state = StreamState::Paused;
        Ok(())
    }

    /// 开始播放，`at` 是参考时钟上的流起点（ticks）
    pub fn start(&self, at: i64) -> Result<(), RenderError> {
        let shared = &self.shared;
        let mut stream = shared.lock_stream();
        match stream.state {
            StreamState::Running => return Ok(()),
            StreamState::Stopped => shared.init_stream(&mut stream),
            StreamState::Paused => {}
        }

        stream.stream_start = at;
        shared.state_signal.set();

        if let Some(transport) = stream.transport() {
            transport.play(true).map_err(|e| {
                log::error!("Failed to start playback: {}", e);
                RenderError::from(e)
            })?;
        }
        log::info!("{} -> running (stream start {})", stream.state, at);
        stream.state = StreamState::Running;

        let complete = stream.eos || stream.tracker.is_none();
        drop(stream);

        if complete {
            shared.notify(RenderEvent::Complete);
        }
        Ok(())
    }

    /// 停止播放，唤醒所有被阻塞的调用者
    pub fn stop(&self) {
        let shared = &self.shared;
        let mut stream = shared.lock_stream();
        let previous = stream.state;
        if previous == StreamState::Running {
            shared.stop_stream(&mut stream);
        }
        stream.state = StreamState::Stopped;
        if previous != StreamState::Stopped {
            shared.cleanup_stream(&mut stream);
            log::info!("{} -> stopped", previous);
        }
    }

    /// 等待状态切换完成，最多 `timeout`
    pub fn wait_state(&self, timeout: Duration) -> StateWait {
        let settled = self.shared.state_signal.wait_timeout(timeout);
        let state = self.state();
        if settled {
            StateWait::Settled(state)
        } else {
            StateWait::Intermediate(state)
        }
    }

    /// 设置音量（百分之一 dB），超出范围时截断
    pub fn set_volume(&self, volume: i32) -> Result<(), RenderError> {
        let volume = volume.clamp(VOLUME_MIN, VOLUME_MAX);
        let mut stream = self.shared.lock_stream();
        if let Some(transport) = stream.transport() {
            transport.set_volume(volume)?;
        }
        stream.volume = volume;
        Ok(())
    }

    pub fn volume(&self) -> i32 {
        self.shared.lock_stream().volume
    }

    /// 设置声像，超出范围时截断
    pub fn set_pan(&self, pan: i32) -> Result<(), RenderError> {
        let pan = pan.clamp(PAN_LEFT, PAN_RIGHT);
        let mut stream = self.shared.lock_stream();
        if let Some(transport) = stream.transport() {
            transport.set_pan(pan)?;
        }
        stream.pan = pan;
        Ok(())
    }

    pub fn pan(&self) -> i32 {
        self.shared.lock_stream().pan
    }

    /// 挂接参考时钟（只保存弱引用）
    pub fn set_clock<C>(&self, clock: &Arc<C>)
    where
        C: Clock + 'static,
    {
        let weak: Weak<C> = Arc::downgrade(clock);
        let weak: Weak<dyn Clock> = weak;
        self.shared.lock_stream().clock = Some(weak);
    }

    /// 使用渲染器内置的系统时钟
    pub fn use_reference_clock(&self) {
        let clock = Arc::clone(&self.shared.reference_clock);
        self.set_clock(&clock);
    }

    pub fn clear_clock(&self) {
        self.shared.lock_stream().clock = None;
    }

    /// 渲染器内置的单调时钟
    pub fn reference_clock(&self) -> Arc<SystemClock> {
        Arc::clone(&self.shared.reference_clock)
    }

    /// 最近一个样本的呈现时间（仅在挂接时钟时更新）
    pub fn media_time(&self) -> Option<i64> {
        self.shared.lock_stream().media_time
    }

    pub fn set_event_sink<S>(&self, sink: S)
    where
        S: EventSink + 'static,
    {
        *self
            .shared
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(sink));
    }

    pub fn stats(&self) -> &RenderStats {
        &self.shared.stats
    }

    /// 统计报告，时长按当前格式换算
    pub fn report(&self) -> StatsReport {
        let bytes_per_sec = self.format().map_or(0, |f| f.avg_bytes_per_sec);
        self.shared.stats.report(bytes_per_sec)
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stream = self.shared.lock_stream();
        f.debug_struct("Renderer")
            .field("device", &self.shared.device.name())
            .field("state", &stream.state)
            .field("format", &stream.format)
            .field("eos", &stream.eos)
            .field("flushing", &self.shared.is_flushing())
            .field("state_settled", &self.shared.state_signal.is_set())
            .finish()
    }
}
