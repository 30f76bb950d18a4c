//! 存储层错误类型
//!
//! 定义统一的存储错误类型，用于封装底层错误：
//! - SQLite 执行错误、文件 I/O 错误
//! - 关闭时仍有未释放句柄
//! - 存储已关闭

use domain::HubError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(String),
    #[error("store busy: {0} handles outstanding")]
    Busy(usize),
    #[error("store closed")]
    Closed,
}

impl StoreError {
    pub fn io(message: impl Into<String>) -> Self {
        StoreError::Io(message.into())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<StoreError> for HubError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(message) => HubError::StoreIo(message),
            StoreError::Busy(count) => HubError::StoreBusy(count),
            StoreError::Closed => HubError::StoreIo("store closed".to_string()),
        }
    }
}
