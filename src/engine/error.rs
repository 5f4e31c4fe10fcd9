//! 渲染器错误

use crate::audio::{FormatError, TransportError};

/// 渲染器错误
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// 当前 Stopped/Paused/Running 状态下不允许该操作
    #[error("operation not valid in the current stream state")]
    WrongState,
    /// 格式不兼容
    #[error("media type rejected: {0}")]
    TypeRejected(String),
    /// 硬件传输失败
    #[error("hardware failure: {0}")]
    Hardware(#[from] TransportError),
    #[error("out of memory")]
    OutOfMemory,
    #[error("no format connected")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<FormatError> for RenderError {
    fn from(e: FormatError) -> Self {
        Self::TypeRejected(e.to_string())
    }
}

impl RenderError {
    /// 创建期的传输错误：内存不足单独归类
    pub(crate) fn from_create(e: TransportError) -> Self {
        match e {
            TransportError::OutOfMemory(_) => Self::OutOfMemory,
            other => Self::Hardware(other),
        }
    }
}
