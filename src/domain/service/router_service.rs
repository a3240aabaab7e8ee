//! 消息路由
//!
//! 根据在线记录决定本地投递还是广播到集群：
//! - 无在线记录：返回 `NotConnected`，无副作用
//! - 在线记录指向本节点：通过本地连接表直接投递
//! - 指向其他节点：发布到广播总线，由持有连接的节点投递（无法同步确认）
//!
//! 普通消息与流式输出共用同一个路由决策 [`MessageRouter::resolve`]。
//! 控制事件名（`start-stream`）只能由流式输出路径产生，普通消息使用时直接拒绝，
//! 保证同一请求无论目标在本地还是远端都得到相同的结果。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::model::{ClusterMessage, RouteOutcome, RouteReceipt, events};
use crate::domain::repository::MessageBus;
use crate::domain::service::{LocalConnectionTable, PacedStreamer, PresenceRegistry};
use crate::error::{ClusterError, ClusterResult, StoreResultExt};
use crate::metrics::{CLUSTER_METRICS, TARGET_LOCAL, TARGET_NOT_CONNECTED, TARGET_REMOTE};
use crate::utils::Clock;

/// 路由目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// 本节点持有连接
    Local,
    /// 其他节点持有连接
    Remote(String),
}

/// 消息路由器
pub struct MessageRouter {
    node_id: String,
    presence: Arc<PresenceRegistry>,
    table: Arc<LocalConnectionTable>,
    streamer: Arc<PacedStreamer>,
    bus: Arc<dyn MessageBus>,
    topic: String,
    clock: Arc<dyn Clock>,
}

impl MessageRouter {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        table: Arc<LocalConnectionTable>,
        streamer: Arc<PacedStreamer>,
        bus: Arc<dyn MessageBus>,
        topic: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            node_id: presence.node_id().to_string(),
            presence,
            table,
            streamer,
            bus,
            topic: topic.into(),
            clock,
        }
    }

    /// 路由决策
    pub async fn resolve(&self, user_id: &str) -> ClusterResult<RouteTarget> {
        match self.presence.lookup(user_id).await? {
            None => {
                CLUSTER_METRICS.record_route(TARGET_NOT_CONNECTED);
                Err(ClusterError::NotConnected(user_id.to_string()))
            }
            Some(node_id) if node_id == self.node_id => {
                CLUSTER_METRICS.record_route(TARGET_LOCAL);
                Ok(RouteTarget::Local)
            }
            Some(node_id) => {
                CLUSTER_METRICS.record_route(TARGET_REMOTE);
                Ok(RouteTarget::Remote(node_id))
            }
        }
    }

    /// 路由普通消息
    pub async fn route(
        &self,
        user_id: &str,
        event: Option<&str>,
        data: &str,
    ) -> ClusterResult<RouteReceipt> {
        if let Some(name) = event.filter(|name| events::is_control(name)) {
            return Err(ClusterError::InvalidParameter(format!(
                "event name '{}' is reserved for stream control",
                name
            )));
        }
        match self.resolve(user_id).await? {
            RouteTarget::Local => {
                let delivered = self.table.send(user_id, event, data).await?;
                if !delivered {
                    self.release_stale(user_id).await?;
                }
                Ok(self.local_receipt(delivered))
            }
            RouteTarget::Remote(node_id) => {
                self.publish(user_id, event, data).await?;
                Ok(RouteReceipt {
                    outcome: RouteOutcome::Broadcast,
                    node_id,
                })
            }
        }
    }

    /// 路由流式输出：本地直接启动，远端广播 start-stream 控制事件
    pub async fn route_stream(&self, user_id: &str, text: &str) -> ClusterResult<RouteReceipt> {
        match self.resolve(user_id).await? {
            RouteTarget::Local => {
                let started = self.streamer.start(user_id, text);
                if !started {
                    self.release_stale(user_id).await?;
                }
                Ok(self.local_receipt(started))
            }
            RouteTarget::Remote(node_id) => {
                self.publish(user_id, Some(events::START_STREAM), text)
                    .await?;
                Ok(RouteReceipt {
                    outcome: RouteOutcome::Broadcast,
                    node_id,
                })
            }
        }
    }

    async fn publish(&self, user_id: &str, event: Option<&str>, data: &str) -> ClusterResult<()> {
        let message = ClusterMessage::new(user_id, event, data, self.clock.now_millis());
        self.bus.publish(&self.topic, &message).await.into_bus()?;
        info!(%user_id, topic = %self.topic, "Message broadcasted");
        Ok(())
    }

    /// 在线记录指向本节点但本地已无通道：记录已失效，释放之
    async fn release_stale(&self, user_id: &str) -> ClusterResult<()> {
        if self.table.release_stale(user_id).await? {
            debug!(%user_id, "Released stale presence entry");
        } else {
            warn!(%user_id, "Presence changed during local delivery, keeping entry");
        }
        Ok(())
    }

    fn local_receipt(&self, delivered: bool) -> RouteReceipt {
        RouteReceipt {
            outcome: if delivered {
                RouteOutcome::DeliveredLocally
            } else {
                RouteOutcome::DeliveryFailed
            },
            node_id: self.node_id.clone(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}
