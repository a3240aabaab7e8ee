use serde::Serialize;

use super::Connection;

/// 路由结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOutcome {
    /// 本节点直接投递成功
    DeliveredLocally,
    /// 本节点直接投递失败（通道已被清理）
    DeliveryFailed,
    /// 已广播，由目标节点投递（无法同步确认）
    Broadcast,
}

/// 路由回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteReceipt {
    pub outcome: RouteOutcome,
    /// 在线记录中的目标节点
    pub node_id: String,
}

impl RouteReceipt {
    pub fn success(&self) -> bool {
        self.outcome != RouteOutcome::DeliveryFailed
    }

    pub fn message(&self) -> &'static str {
        match self.outcome {
            RouteOutcome::DeliveredLocally => "Message sent directly",
            RouteOutcome::DeliveryFailed => "Failed to send message",
            RouteOutcome::Broadcast => "Message broadcasted to target node",
        }
    }
}

/// 关闭连接结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseOutcome {
    /// 本节点持有连接并已关闭
    ClosedLocally,
    /// 本节点未持有该用户的连接
    NotLocal,
}

/// 用户连接状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub user_id: String,
    pub connected: bool,
    pub node_id: Option<String>,
    pub is_local: bool,
    pub local_connections: usize,
    pub connection: Option<Connection>,
}

/// 节点统计信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub node_id: String,
    pub local_connections: usize,
    pub active_streams: usize,
    pub healthy_nodes: usize,
}
