//! 在线状态注册表
//!
//! 维护 用户 -> 持有连接的节点 映射（带 TTL）。每次读取都会校验目标节点是否健康，
//! 不健康时惰性清理并返回空，使读路径在巡检尚未运行时也能自愈。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::domain::model::{Connection, KeySpace};
use crate::domain::repository::KvStore;
use crate::domain::service::NodeHealthRegistry;
use crate::error::{ClusterResult, StoreResultExt};
use crate::utils::Clock;

/// 在线状态注册表
pub struct PresenceRegistry {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    health: Arc<NodeHealthRegistry>,
    clock: Arc<dyn Clock>,
    /// 当前节点ID
    node_id: String,
    ttl: Duration,
}

impl PresenceRegistry {
    pub fn new(
        store: Arc<dyn KvStore>,
        keys: KeySpace,
        health: Arc<NodeHealthRegistry>,
        clock: Arc<dyn Clock>,
        node_id: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            health,
            clock,
            node_id: node_id.into(),
            ttl,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// 写入在线记录，覆盖之前的持有节点
    pub async fn register(&self, user_id: &str, node_id: &str) -> ClusterResult<()> {
        self.store
            .set(&self.keys.presence_key(user_id), node_id, Some(self.ttl))
            .await
            .into_store()?;
        debug!(%user_id, %node_id, "Presence registered");
        Ok(())
    }

    /// 写入连接信息与在线记录
    pub async fn register_connection(&self, connection: &Connection) -> ClusterResult<()> {
        self.write_connection_info(connection).await?;
        self.register(&connection.user_id, &connection.owner_node_id)
            .await?;
        info!(
            user_id = %connection.user_id,
            session_id = %connection.session_id,
            node_id = %connection.owner_node_id,
            "Registered connection"
        );
        Ok(())
    }

    /// 查询用户所在节点
    ///
    /// 节点不健康时清理该用户的在线记录并返回 `None`。
    pub async fn lookup(&self, user_id: &str) -> ClusterResult<Option<String>> {
        let node_id = self
            .store
            .get(&self.keys.presence_key(user_id))
            .await
            .into_store()?;

        let Some(node_id) = node_id else {
            return Ok(None);
        };

        if !self.health.is_healthy(&node_id).await? {
            warn!(%node_id, %user_id, "Node is unhealthy, removing presence entry");
            self.unregister(user_id).await?;
            return Ok(None);
        }

        Ok(Some(node_id))
    }

    /// 成功投递后刷新：延长 TTL 并将持有节点重写为当前节点
    pub async fn refresh(&self, user_id: &str) -> ClusterResult<()> {
        if let Some(mut connection) = self.connection_info(user_id).await? {
            connection.owner_node_id = self.node_id.clone();
            connection.last_heartbeat = self.clock.now_millis();
            self.write_connection_info(&connection).await?;
        }
        self.register(user_id, &self.node_id).await
    }

    /// 删除在线记录及连接信息
    pub async fn unregister(&self, user_id: &str) -> ClusterResult<()> {
        let keys = [
            self.keys.connection_key(user_id),
            self.keys.presence_key(user_id),
        ];
        self.store.delete(&keys).await.into_store()?;
        info!(%user_id, node_id = %self.node_id, "Unregistered connection");
        Ok(())
    }

    /// 仅当在线记录仍属于当前节点（及指定会话）时删除
    ///
    /// 用户已重连到其他节点时，本节点旧通道的清理不能覆盖新节点的记录；
    /// 传入 `session_id` 时，连接信息已被同节点的新会话改写的记录同样保留。
    /// 跨节点的读取与删除之间不是原子的，残留窗口由 TTL 与健康校验兜底。
    pub async fn release(&self, user_id: &str, session_id: Option<&str>) -> ClusterResult<bool> {
        let owner = self
            .store
            .get(&self.keys.presence_key(user_id))
            .await
            .into_store()?;

        if let Some(owner) = owner {
            if owner != self.node_id {
                debug!(%user_id, %owner, "Presence owned by another node, keeping entry");
                return Ok(false);
            }
        }

        if let Some(session_id) = session_id {
            if let Some(current) = self.connection_info(user_id).await? {
                if current.session_id != session_id {
                    debug!(
                        %user_id,
                        %session_id,
                        current_session_id = %current.session_id,
                        "Presence belongs to a newer session, keeping entry"
                    );
                    return Ok(false);
                }
            }
        }

        self.unregister(user_id).await?;
        Ok(true)
    }

    /// 获取连接信息
    pub async fn connection_info(&self, user_id: &str) -> ClusterResult<Option<Connection>> {
        let raw = self
            .store
            .get(&self.keys.connection_key(user_id))
            .await
            .into_store()?;
        Ok(raw.and_then(|payload| match serde_json::from_str(&payload) {
            Ok(connection) => Some(connection),
            Err(err) => {
                warn!(%user_id, error = %err, "Malformed connection record, ignoring");
                None
            }
        }))
    }

    async fn write_connection_info(&self, connection: &Connection) -> ClusterResult<()> {
        let payload =
            serde_json::to_string(connection).context("failed to encode connection record")?;
        self.store
            .set(
                &self.keys.connection_key(&connection.user_id),
                &payload,
                Some(self.ttl),
            )
            .await
            .into_store()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::memory::InMemoryKvStore;
    use crate::utils::ManualClock;

    struct Fixture {
        clock: Arc<ManualClock>,
        health: Arc<NodeHealthRegistry>,
        store: Arc<InMemoryKvStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = ManualClock::new(0);
            let store = Arc::new(InMemoryKvStore::new(clock.clone()));
            let health = Arc::new(NodeHealthRegistry::new(
                store.clone(),
                KeySpace::default(),
                clock.clone(),
                Duration::from_secs(30),
            ));
            Self {
                clock,
                health,
                store,
            }
        }

        fn presence(&self, node_id: &str) -> PresenceRegistry {
            PresenceRegistry::new(
                self.store.clone(),
                KeySpace::default(),
                self.health.clone(),
                self.clock.clone(),
                node_id,
                Duration::from_secs(1800),
            )
        }
    }

    /// 测试：从未注册的用户查询为空
    #[tokio::test]
    async fn test_lookup_unknown_user() {
        let fixture = Fixture::new();
        let presence = fixture.presence("node-a");
        assert_eq!(presence.lookup("nobody").await.unwrap(), None);
    }

    /// 测试：节点健康时返回持有节点
    #[tokio::test]
    async fn test_lookup_healthy_owner() {
        let fixture = Fixture::new();
        let presence = fixture.presence("node-a");
        fixture.health.heartbeat("node-a", "h", 1).await.unwrap();

        presence.register("alice", "node-a").await.unwrap();
        assert_eq!(
            presence.lookup("alice").await.unwrap(),
            Some("node-a".to_string())
        );
    }

    /// 测试：节点不健康后的下一次查询立即返回空（惰性自愈），无需巡检
    #[tokio::test]
    async fn test_lookup_self_heals_when_owner_unhealthy() {
        let fixture = Fixture::new();
        let presence = fixture.presence("node-b");
        fixture.health.heartbeat("node-a", "h", 1).await.unwrap();
        presence.register("alice", "node-a").await.unwrap();

        fixture.clock.set(31_000);
        assert!(!fixture.health.is_healthy("node-a").await.unwrap());

        assert_eq!(presence.lookup("alice").await.unwrap(), None);
        let keys = KeySpace::default();
        assert_eq!(fixture.store.get(&keys.presence_key("alice")).await.unwrap(), None);
    }

    /// 测试：刷新将持有节点改写为当前节点并更新心跳
    #[tokio::test]
    async fn test_refresh_restamps_owner() {
        let fixture = Fixture::new();
        let presence = fixture.presence("node-b");
        let connection = Connection::new("alice", "s1", "node-a", 0);
        fixture.store.set(
            &KeySpace::default().connection_key("alice"),
            &serde_json::to_string(&connection).unwrap(),
            None,
        )
        .await
        .unwrap();

        fixture.clock.set(5_000);
        presence.refresh("alice").await.unwrap();

        let info = presence.connection_info("alice").await.unwrap().unwrap();
        assert_eq!(info.owner_node_id, "node-b");
        assert_eq!(info.last_heartbeat, 5_000);
        assert_eq!(info.connected_at, 0);
        let owner = fixture
            .store
            .get(&KeySpace::default().presence_key("alice"))
            .await
            .unwrap();
        assert_eq!(owner, Some("node-b".to_string()));
    }

    /// 测试：release 不删除其他节点持有的记录
    #[tokio::test]
    async fn test_release_respects_other_owner() {
        let fixture = Fixture::new();
        let node_a = fixture.presence("node-a");
        let node_b = fixture.presence("node-b");

        node_b.register("alice", "node-b").await.unwrap();
        assert!(!node_a.release("alice", None).await.unwrap());
        assert!(node_b.release("alice", None).await.unwrap());
        assert!(node_b.release("alice", None).await.unwrap());
    }

    /// 测试：同节点新会话已写入后，旧会话的 release 不删除记录
    #[tokio::test]
    async fn test_release_keeps_newer_session() {
        let fixture = Fixture::new();
        let presence = fixture.presence("node-a");
        fixture.health.heartbeat("node-a", "h", 1).await.unwrap();

        let newer = Connection::new("alice", "s2", "node-a", 0);
        presence.register_connection(&newer).await.unwrap();

        assert!(!presence.release("alice", Some("s1")).await.unwrap());
        assert_eq!(
            presence.lookup("alice").await.unwrap(),
            Some("node-a".to_string())
        );
        assert_eq!(presence.connection_info("alice").await.unwrap(), Some(newer));

        assert!(presence.release("alice", Some("s2")).await.unwrap());
        assert_eq!(presence.lookup("alice").await.unwrap(), None);
    }

    /// 测试：注册连接同时写入连接信息
    #[tokio::test]
    async fn test_register_connection_writes_both_records() {
        let fixture = Fixture::new();
        let presence = fixture.presence("node-a");
        let connection = Connection::new("alice", "s1", "node-a", 7);
        presence.register_connection(&connection).await.unwrap();

        assert_eq!(presence.connection_info("alice").await.unwrap(), Some(connection));
        presence.unregister("alice").await.unwrap();
        assert_eq!(presence.connection_info("alice").await.unwrap(), None);
    }
}
