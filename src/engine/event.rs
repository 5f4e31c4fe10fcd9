//! 信号与事件通知
//!
//! - `Signal`: 手动复位事件（Mutex<bool> + Condvar），置位后保持到 reset
//! - `RenderEvent` / `EventSink`: 向外部协作者报告流完成和格式变化

use std::sync::{mpsc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// 手动复位信号
#[derive(Debug)]
pub(crate) struct Signal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new(set: bool) -> Self {
        Self {
            flag: Mutex::new(set),
            cond: Condvar::new(),
        }
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 置位并唤醒所有等待者
    pub fn set(&self) {
        *self.flag() = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.flag() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.flag()
    }

    /// 等待置位，最多 `timeout`
    ///
    /// 返回 false 表示超时
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.flag();
        while !*flag {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            flag = match self.cond.wait_timeout(flag, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

/// 渲染器对外事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    /// 流已播放完毕
    Complete,
    /// 采样率切换已生效
    FormatChanged { from_rate: u32, to_rate: u32 },
    /// 样本携带的新格式被拒绝
    FormatRejected { reason: String },
}

/// 事件接收者
pub trait EventSink: Send + Sync {
    fn notify(&self, event: RenderEvent);
}

impl EventSink for mpsc::Sender<RenderEvent> {
    fn notify(&self, event: RenderEvent) {
        if self.send(event).is_err() {
            log::debug!("Event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signal_times_out_when_reset() {
        let signal = Signal::new(false);
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_signal_stays_set_until_reset() {
        let signal = Signal::new(true);
        assert!(signal.wait_timeout(Duration::ZERO));
        assert!(signal.wait_timeout(Duration::ZERO));
        signal.reset();
        assert!(!signal.is_set());
    }

    #[test]
    fn test_signal_wakes_waiter() {
        let signal = Arc::new(Signal::new(false));
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                let start = Instant::now();
                let woke = signal.wait_timeout(Duration::from_secs(5));
                (woke, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        signal.set();

        let (woke, elapsed) = waiter.join().unwrap();
        assert!(woke);
        assert!(elapsed < Duration::from_secs(1), "waited {:?}", elapsed);
    }

    #[test]
    fn test_channel_sink() {
        let (tx, rx) = mpsc::channel();
        tx.notify(RenderEvent::Complete);
        assert_eq!(rx.recv().unwrap(), RenderEvent::Complete);

        drop(rx);
        // 接收端已关闭时不 panic
        tx.notify(RenderEvent::Complete);
    }
}
