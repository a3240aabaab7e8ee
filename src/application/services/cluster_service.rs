use std::sync::Arc;

use tracing::info;

use crate::domain::model::{CloseOutcome, ConnectionStatus, NodeStats, RouteReceipt};
use crate::domain::service::{
    ChannelHandle, LocalConnectionTable, MessageRouter, NodeHealthRegistry, PacedStreamer,
    PresenceRegistry,
};
use crate::error::ClusterResult;
use crate::utils::validate_user_id;

/// 集群推送服务
///
/// 接入层（HTTP 等）调用的入口：connect / send / stream / close / status / stats。
pub struct SseClusterService {
    table: Arc<LocalConnectionTable>,
    presence: Arc<PresenceRegistry>,
    health: Arc<NodeHealthRegistry>,
    router: Arc<MessageRouter>,
    streamer: Arc<PacedStreamer>,
    /// `stream` 触发时推送的默认文本
    stream_text: String,
}

impl SseClusterService {
    pub fn new(
        table: Arc<LocalConnectionTable>,
        presence: Arc<PresenceRegistry>,
        health: Arc<NodeHealthRegistry>,
        router: Arc<MessageRouter>,
        streamer: Arc<PacedStreamer>,
        stream_text: impl Into<String>,
    ) -> Self {
        Self {
            table,
            presence,
            health,
            router,
            streamer,
            stream_text: stream_text.into(),
        }
    }

    pub fn node_id(&self) -> &str {
        self.table.node_id()
    }

    /// 建立推送连接
    pub async fn connect(&self, user_id: &str) -> ClusterResult<ChannelHandle> {
        self.table.open(user_id).await
    }

    /// 向用户推送消息
    pub async fn send(
        &self,
        user_id: &str,
        event: Option<&str>,
        data: &str,
    ) -> ClusterResult<RouteReceipt> {
        validate_user_id(user_id)?;
        self.router.route(user_id, event, data).await
    }

    /// 以默认文本启动流式输出
    pub async fn stream(&self, user_id: &str) -> ClusterResult<RouteReceipt> {
        self.stream_text(user_id, &self.stream_text).await
    }

    pub async fn stream_text(&self, user_id: &str, text: &str) -> ClusterResult<RouteReceipt> {
        validate_user_id(user_id)?;
        self.router.route_stream(user_id, text).await
    }

    /// 关闭本节点持有的连接，其他节点的连接不做处理
    pub async fn close(&self, user_id: &str) -> ClusterResult<CloseOutcome> {
        if self.table.close(user_id).await? {
            info!(%user_id, "Connection closed");
            Ok(CloseOutcome::ClosedLocally)
        } else {
            Ok(CloseOutcome::NotLocal)
        }
    }

    /// 查询用户连接状态
    pub async fn status(&self, user_id: &str) -> ClusterResult<ConnectionStatus> {
        validate_user_id(user_id)?;
        let node_id = self.presence.lookup(user_id).await?;
        let is_local = self.table.contains(user_id);
        let connection = match self.table.connection(user_id) {
            Some(connection) => Some(connection),
            None if node_id.is_some() => self.presence.connection_info(user_id).await?,
            None => None,
        };

        Ok(ConnectionStatus {
            user_id: user_id.to_string(),
            connected: node_id.is_some(),
            node_id,
            is_local,
            local_connections: self.table.count(),
            connection,
        })
    }

    /// 节点统计
    pub async fn stats(&self) -> ClusterResult<NodeStats> {
        let healthy_nodes = self.health.list_healthy().await?.len();
        Ok(NodeStats {
            node_id: self.node_id().to_string(),
            local_connections: self.table.count(),
            active_streams: self.streamer.active_streams(),
            healthy_nodes,
        })
    }
}
