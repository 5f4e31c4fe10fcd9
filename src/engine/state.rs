//! 流状态

/// 流状态
///
/// Stopped ⇄ Paused ⇄ Running，Stopped 也可以直接进入 Running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    /// 写入被拒绝，硬件停止，写游标未设置
    #[default]
    Stopped,
    /// 接受样本但不推进硬件
    Paused,
    /// 硬件循环播放，时钟原点已锁定
    Running,
}

impl StreamState {
    /// 该状态下 feeder 是否可以规划写入
    #[inline]
    pub fn is_streaming(self) -> bool {
        self == Self::Running
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Running => "running",
        };
        f.write_str(name)
    }
}

/// `wait_state` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateWait {
    /// 状态切换已完成
    Settled(StreamState),
    /// 超时，状态切换仍在进行（例如暂停后尚未收到第一个样本）
    Intermediate(StreamState),
}

impl StateWait {
    pub fn state(self) -> StreamState {
        match self {
            Self::Settled(state) | Self::Intermediate(state) => state,
        }
    }

    pub fn is_settled(self) -> bool {
        matches!(self, Self::Settled(_))
    }
}
