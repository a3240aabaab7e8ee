//! 集群推送错误类型定义
//!
//! - 对外暴露统一的 `ClusterError` / `ClusterResult`
//! - 基础设施层（存储、总线）使用 `anyhow::Result`，在领域服务中转换为业务错误

use thiserror::Error;

/// 集群推送错误类型
#[derive(Debug, Error)]
pub enum ClusterError {
    /// 用户未连接（不存在在线记录）
    #[error("User not connected: {0}")]
    NotConnected(String),

    /// 推送通道发送失败
    #[error("Transport failure for user {user_id}: {reason}")]
    TransportFailure { user_id: String, reason: String },

    /// 无效的参数
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// 共享存储不可用
    #[error("Store unavailable: {0:#}")]
    Store(#[source] anyhow::Error),

    /// 广播总线不可用
    #[error("Bus unavailable: {0:#}")]
    Bus(#[source] anyhow::Error),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 其他错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClusterError {
    pub fn transport(user_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::TransportFailure {
            user_id: user_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected(_))
    }

    /// 是否为外部依赖（存储 / 总线）不可用
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Bus(_))
    }
}

/// 集群推送结果类型
pub type ClusterResult<T> = Result<T, ClusterError>;

/// 将 `anyhow::Result` 映射为存储错误
pub(crate) trait StoreResultExt<T> {
    fn into_store(self) -> ClusterResult<T>;
    fn into_bus(self) -> ClusterResult<T>;
}

impl<T> StoreResultExt<T> for anyhow::Result<T> {
    fn into_store(self) -> ClusterResult<T> {
        self.map_err(ClusterError::Store)
    }

    fn into_bus(self) -> ClusterResult<T> {
        self.map_err(ClusterError::Bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = ClusterError::NotConnected("u1".to_string());
        assert!(err.is_not_connected());
        assert!(!err.is_unavailable());

        let err: anyhow::Result<()> = Err(anyhow::anyhow!("connection refused"));
        let err = err.into_store().unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_transport_failure_message() {
        let err = ClusterError::transport("u1", "channel closed");
        assert_eq!(
            err.to_string(),
            "Transport failure for user u1: channel closed"
        );
    }
}
