use serde::{Deserialize, Serialize};

/// 连接信息
///
/// 推送通道建立成功时创建，每次成功投递刷新 `last_heartbeat`，
/// 通道完成 / 超时 / 出错 / 主动关闭时销毁。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// 用户ID
    pub user_id: String,
    /// 会话ID
    pub session_id: String,
    /// 持有连接的节点ID
    pub owner_node_id: String,
    /// 连接时间（毫秒时间戳）
    pub connected_at: i64,
    /// 最后心跳时间（毫秒时间戳）
    pub last_heartbeat: i64,
}

impl Connection {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        owner_node_id: impl Into<String>,
        now_millis: i64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            owner_node_id: owner_node_id.into(),
            connected_at: now_millis,
            last_heartbeat: now_millis,
        }
    }
}

/// 推送通道终止原因
///
/// 通道状态机：`OPEN -> ACTIVE -> {COMPLETED, TIMEOUT, ERROR} -> REMOVED`，
/// 三种终态走同一条清理路径。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReason {
    /// 正常完成（客户端断开或主动关闭）
    Completed,
    /// 超过最大存活时间
    Timeout,
    /// 发送失败
    Error(String),
}

impl TerminalReason {
    pub fn as_str(&self) -> &str {
        match self {
            TerminalReason::Completed => "completed",
            TerminalReason::Timeout => "timeout",
            TerminalReason::Error(_) => "error",
        }
    }
}

impl std::fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalReason::Error(reason) => write!(f, "error: {}", reason),
            other => f.write_str(other.as_str()),
        }
    }
}
