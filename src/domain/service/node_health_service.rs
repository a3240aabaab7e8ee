//! 节点健康注册表
//!
//! 每个节点周期性写入自己的心跳记录（TTL = 节点超时），并加入集群成员集合
//! （集合 TTL = 2 × 节点超时，单次心跳丢失不会导致集合过期）。
//! 巡检遍历成员集合，对心跳缺失或超时的节点清理其名下的在线记录。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::domain::model::{KeySpace, NodeRecord};
use crate::domain::repository::KvStore;
use crate::error::{ClusterResult, StoreResultExt};
use crate::metrics::CLUSTER_METRICS;
use crate::utils::Clock;

/// 单次巡检结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// 本次判定为不健康的节点
    pub unhealthy_nodes: Vec<String>,
    /// 被清理的在线记录数
    pub evicted_entries: usize,
    /// 清理过程中出错的节点（下次巡检重试）
    pub failed_nodes: Vec<String>,
}

/// 节点健康注册表
pub struct NodeHealthRegistry {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    clock: Arc<dyn Clock>,
    node_timeout: Duration,
}

impl NodeHealthRegistry {
    pub fn new(
        store: Arc<dyn KvStore>,
        keys: KeySpace,
        clock: Arc<dyn Clock>,
        node_timeout: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            clock,
            node_timeout,
        }
    }

    pub fn node_timeout(&self) -> Duration {
        self.node_timeout
    }

    fn timeout_millis(&self) -> i64 {
        self.node_timeout.as_millis() as i64
    }

    /// 写入节点心跳
    ///
    /// 两步写入（记录 + 成员集合）均为幂等操作，中途失败后下次心跳会补齐。
    pub async fn heartbeat(&self, node_id: &str, host: &str, port: u16) -> ClusterResult<()> {
        let record = NodeRecord {
            node_id: node_id.to_string(),
            host: host.to_string(),
            port,
            last_heartbeat: self.clock.now_millis(),
            healthy: true,
        };
        let payload = serde_json::to_string(&record).context("failed to encode node record")?;

        self.store
            .set(
                &self.keys.node_info_key(node_id),
                &payload,
                Some(self.node_timeout),
            )
            .await
            .into_store()?;

        let nodes_key = self.keys.nodes_key();
        self.store.set_add(&nodes_key, node_id).await.into_store()?;
        self.store
            .expire(&nodes_key, self.node_timeout * 2)
            .await
            .into_store()?;

        debug!(%node_id, "Heartbeat sent");
        Ok(())
    }

    /// 读取节点记录，无法解析的记录视为缺失
    pub async fn record(&self, node_id: &str) -> ClusterResult<Option<NodeRecord>> {
        let raw = self
            .store
            .get(&self.keys.node_info_key(node_id))
            .await
            .into_store()?;
        Ok(raw.and_then(|payload| match serde_json::from_str(&payload) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(%node_id, error = %err, "Malformed node record, treating as missing");
                None
            }
        }))
    }

    /// 节点是否健康：记录存在且距最后心跳不超过节点超时
    pub async fn is_healthy(&self, node_id: &str) -> ClusterResult<bool> {
        let now = self.clock.now_millis();
        Ok(self
            .record(node_id)
            .await?
            .is_some_and(|record| record.is_fresh(now, self.timeout_millis())))
    }

    /// 获取所有健康节点
    pub async fn list_healthy(&self) -> ClusterResult<Vec<NodeRecord>> {
        let members = self
            .store
            .set_members(&self.keys.nodes_key())
            .await
            .into_store()?;

        let now = self.clock.now_millis();
        let mut healthy = Vec::with_capacity(members.len());
        for node_id in members {
            if let Some(record) = self.record(&node_id).await? {
                if record.is_fresh(now, self.timeout_millis()) {
                    healthy.push(record);
                }
            }
        }
        healthy.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(healthy)
    }

    /// 查找成员集合中心跳缺失或超时的节点
    pub async fn find_unhealthy(&self) -> ClusterResult<Vec<String>> {
        let members = self
            .store
            .set_members(&self.keys.nodes_key())
            .await
            .into_store()?;

        let now = self.clock.now_millis();
        let mut unhealthy = Vec::new();
        for node_id in members {
            match self.record(&node_id).await? {
                None => {
                    warn!(%node_id, "Node info not found, marking as unhealthy");
                    unhealthy.push(node_id);
                }
                Some(record) if !record.is_fresh(now, self.timeout_millis()) => {
                    warn!(
                        %node_id,
                        since_last_heartbeat_ms = now - record.last_heartbeat,
                        "Node heartbeat timeout, marking as unhealthy"
                    );
                    unhealthy.push(node_id);
                }
                Some(_) => {}
            }
        }
        Ok(unhealthy)
    }

    /// 巡检：判定不健康节点并清理其名下的在线记录
    ///
    /// 单个节点清理失败不影响其他节点，失败节点留在成员集合中由下次巡检重试。
    pub async fn sweep(&self) -> ClusterResult<SweepReport> {
        let mut report = SweepReport::default();
        for node_id in self.find_unhealthy().await? {
            match self.evict_node(&node_id).await {
                Ok(Some(evicted)) => {
                    report.evicted_entries += evicted;
                    report.unhealthy_nodes.push(node_id);
                }
                Ok(None) => {}
                Err(err) => {
                    error!(%node_id, error = %err, "Error cleaning up unhealthy node");
                    report.failed_nodes.push(node_id);
                }
            }
        }
        Ok(report)
    }

    /// 清理节点名下的所有在线记录及节点信息
    ///
    /// 按在线记录前缀扫描全部键，按值过滤出指向该节点的记录，复杂度 O(在线记录数)。
    /// 在线记录本身带 TTL，这里只是加速清理。
    /// 若节点在判定后恢复了心跳，放弃清理并返回 `None`。
    pub async fn evict_node(&self, node_id: &str) -> ClusterResult<Option<usize>> {
        if self.is_healthy(node_id).await? {
            info!(%node_id, "Node recovered before cleanup, skipping");
            return Ok(None);
        }

        info!(%node_id, "Cleaning up connections for unhealthy node");

        let presence_keys = self
            .store
            .keys_with_prefix(&self.keys.presence_prefix())
            .await
            .into_store()?;

        let mut keys_to_delete = Vec::new();
        for key in presence_keys {
            let owner = self.store.get(&key).await.into_store()?;
            if owner.as_deref() != Some(node_id) {
                continue;
            }
            if let Some(user_id) = self.keys.user_from_presence_key(&key) {
                keys_to_delete.push(self.keys.connection_key(user_id));
            }
            keys_to_delete.push(key);
        }

        let evicted = keys_to_delete
            .iter()
            .filter(|key| self.keys.user_from_presence_key(key).is_some())
            .count();
        if !keys_to_delete.is_empty() {
            self.store.delete(&keys_to_delete).await.into_store()?;
            CLUSTER_METRICS.evicted_presence_total.inc_by(evicted as u64);
            info!(%node_id, evicted, "Deleted connection records for node");
        }

        self.deregister(node_id).await?;
        info!(%node_id, "Unhealthy node cleanup completed");
        Ok(Some(evicted))
    }

    /// 删除节点信息并移出成员集合
    pub async fn deregister(&self, node_id: &str) -> ClusterResult<()> {
        self.store
            .delete(&[self.keys.node_info_key(node_id)])
            .await
            .into_store()?;
        self.store
            .set_remove(&self.keys.nodes_key(), node_id)
            .await
            .into_store()?;
        Ok(())
    }
}
