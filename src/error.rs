//! 网关错误类型
//!
//! 本子系统的失败都在发生点就地处理，不向上升级为进程级错误：
//! - 连接级协议违规只终止该连接
//! - 单个会话的投递失败只记为 delivered=false
//! - 客户端的畸形消息忽略并记日志

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// 连接时缺少必需的身份参数（协议违规，仅对该连接致命）
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    /// 会话通道已关闭，投递失败（瞬时投递失败，调用方按 delivered=false 处理）
    #[error("session channel closed: {0}")]
    ChannelClosed(String),

    /// 设备上报了未跟踪的交易号
    #[error("unknown transaction: {0}")]
    UnknownTransaction(String),

    /// 交易状态不允许该操作（如对非 PENDING 交易做设备确认）
    #[error("invalid transaction state for {id}: {state}")]
    InvalidTransactionState { id: String, state: &'static str },

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
