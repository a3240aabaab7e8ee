//! 广播消息处理
//!
//! 每个节点都会收到全部广播消息，只有本地连接表中持有目标用户的节点投递，
//! 其余节点静默丢弃。本地连接表是投递时刻的权威依据，在线记录可能已过期。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::model::ClusterMessage;
use crate::domain::service::{LocalConnectionTable, PacedStreamer};
use crate::metrics::CLUSTER_METRICS;

/// 广播消息处理器
pub struct BroadcastHandler {
    table: Arc<LocalConnectionTable>,
    streamer: Arc<PacedStreamer>,
}

impl BroadcastHandler {
    pub fn new(table: Arc<LocalConnectionTable>, streamer: Arc<PacedStreamer>) -> Self {
        Self { table, streamer }
    }

    /// 处理单条广播消息，返回是否由本节点投递
    pub async fn handle(&self, message: &ClusterMessage) -> bool {
        let user_id = message.user_id.as_str();
        if !self.table.contains(user_id) {
            CLUSTER_METRICS.fanout_dropped_total.inc();
            debug!(%user_id, node_id = %self.table.node_id(), "No local connection, dropping broadcast");
            return false;
        }

        if message.is_start_stream() {
            return self.streamer.start(user_id, &message.data);
        }

        match self
            .table
            .send(user_id, message.event_name.as_deref(), &message.data)
            .await
        {
            Ok(delivered) => {
                if delivered {
                    debug!(%user_id, "Delivered broadcast message");
                }
                delivered
            }
            Err(err) => {
                warn!(%user_id, error = %err, "Failed to deliver broadcast message");
                false
            }
        }
    }

    /// 顺序消费广播消息直到取消或总线关闭，保持单用户消息顺序
    ///
    /// 投递逐条等待完成：一个慢客户端最多阻塞后续广播一个发送超时
    /// （`PUSH_SEND_TIMEOUT`），超时后通道被拆除，不会持续拖慢本节点。
    pub async fn run(&self, mut rx: mpsc::Receiver<ClusterMessage>, cancel: CancellationToken) {
        info!(node_id = %self.table.node_id(), "Broadcast consumer started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => {
                        self.handle(&message).await;
                    }
                    None => {
                        warn!("Broadcast subscription closed");
                        break;
                    }
                },
            }
        }
        info!(node_id = %self.table.node_id(), "Broadcast consumer stopped");
    }
}
