//! Hub 统一错误分类
//!
//! 所有跨组件边界的失败都归入以下有限集合，新增种类需要显式扩展本枚举。

/// Hub 错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// ThingValue 或请求中缺失/为空的必填字段。
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// 授权拒绝。
    #[error("not permitted: {0}")]
    NotPermitted(String),
    /// 目录查询或清理目标不存在。
    #[error("not found: {0}")]
    NotFound(String),
    /// 底层桶存储失败。
    #[error("store io: {0}")]
    StoreIo(String),
    /// 存在未释放的桶/游标时关闭存储。
    #[error("store busy: {0} handles outstanding")]
    StoreBusy(usize),
    /// RPC 或 MQTT 投递失败。
    #[error("transport: {0}")]
    Transport(String),
    /// 调用方取消。
    #[error("cancelled")]
    Cancelled,
}

impl HubError {
    /// 稳定的错误码（用于 MQTT 错误应答）。
    pub fn kind(&self) -> &'static str {
        match self {
            HubError::InvalidValue(_) => "INVALID_VALUE",
            HubError::NotPermitted(_) => "NOT_PERMITTED",
            HubError::NotFound(_) => "NOT_FOUND",
            HubError::StoreIo(_) => "STORE_IO",
            HubError::StoreBusy(_) => "STORE_BUSY",
            HubError::Transport(_) => "TRANSPORT",
            HubError::Cancelled => "CANCELLED",
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        HubError::InvalidValue(message.into())
    }

    pub fn not_permitted(message: impl Into<String>) -> Self {
        HubError::NotPermitted(message.into())
    }
}
