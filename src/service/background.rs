//! 后台任务：节点心跳与健康巡检
//!
//! 单次失败只记录日志和指标，下一个周期照常执行，循环本身不会退出。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::domain::service::NodeHealthRegistry;
use crate::metrics::CLUSTER_METRICS;

const HEARTBEAT_TASK: &str = "heartbeat";
const SWEEP_TASK: &str = "sweep";

/// 启动心跳任务，首次心跳立即发送
pub fn spawn_heartbeat(
    health: Arc<NodeHealthRegistry>,
    node: NodeConfig,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(node_id = %node.id, period_secs = period.as_secs(), "Heartbeat task started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(err) = health.heartbeat(&node.id, &node.host, node.port).await {
                CLUSTER_METRICS.record_background_failure(HEARTBEAT_TASK);
                error!(
                    node_id = %node.id,
                    error = %err,
                    store_unavailable = err.is_unavailable(),
                    "Error sending heartbeat, retrying next tick"
                );
            }
        }
        info!(node_id = %node.id, "Heartbeat task stopped");
    })
}

/// 启动健康巡检任务
pub fn spawn_sweep(
    health: Arc<NodeHealthRegistry>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_secs = period.as_secs(), "Health sweep task started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match health.sweep().await {
                Ok(report) if report.unhealthy_nodes.is_empty() && report.failed_nodes.is_empty() => {
                    debug!("Health sweep found no unhealthy nodes");
                }
                Ok(report) => {
                    if !report.failed_nodes.is_empty() {
                        CLUSTER_METRICS.record_background_failure(SWEEP_TASK);
                    }
                    warn!(
                        unhealthy = ?report.unhealthy_nodes,
                        failed = ?report.failed_nodes,
                        evicted = report.evicted_entries,
                        "Health sweep cleaned up unhealthy nodes"
                    );
                }
                Err(err) => {
                    CLUSTER_METRICS.record_background_failure(SWEEP_TASK);
                    error!(
                        error = %err,
                        store_unavailable = err.is_unavailable(),
                        "Error in health check, retrying next tick"
                    );
                }
            }
        }
        info!("Health sweep task stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::domain::model::KeySpace;
    use crate::domain::repository::KvStore;
    use crate::infrastructure::persistence::memory::InMemoryKvStore;
    use crate::utils::ManualClock;

    /// 前 N 次调用返回错误，之后正常工作的存储
    struct FailingStore {
        inner: InMemoryKvStore,
        failures: AtomicUsize,
    }

    impl FailingStore {
        fn new(clock: Arc<ManualClock>) -> Self {
            Self {
                inner: InMemoryKvStore::new(clock),
                failures: AtomicUsize::new(0),
            }
        }

        fn fail_next(&self, calls: usize) {
            self.failures.store(calls, Ordering::SeqCst);
        }

        fn check(&self) -> anyhow::Result<()> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("connection refused");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl KvStore for FailingStore {
        async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.check()?;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
            self.check()?;
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, keys: &[String]) -> anyhow::Result<usize> {
            self.check()?;
            self.inner.delete(keys).await
        }

        async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
            self.check()?;
            self.inner.expire(key, ttl).await
        }

        async fn set_add(&self, set_key: &str, member: &str) -> anyhow::Result<()> {
            self.check()?;
            self.inner.set_add(set_key, member).await
        }

        async fn set_members(&self, set_key: &str) -> anyhow::Result<Vec<String>> {
            self.check()?;
            self.inner.set_members(set_key).await
        }

        async fn set_remove(&self, set_key: &str, member: &str) -> anyhow::Result<()> {
            self.check()?;
            self.inner.set_remove(set_key, member).await
        }

        async fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
            self.check()?;
            self.inner.keys_with_prefix(prefix).await
        }
    }

    fn failure_count(task: &str) -> u64 {
        CLUSTER_METRICS
            .background_failures_total
            .with_label_values(&[task])
            .get()
    }

    /// 测试：心跳任务持续写入节点记录，取消后退出
    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_loop_keeps_node_healthy() {
        let clock = ManualClock::new(0);
        let store = Arc::new(InMemoryKvStore::new(clock.clone()));
        let health = Arc::new(NodeHealthRegistry::new(
            store.clone(),
            KeySpace::default(),
            clock.clone(),
            Duration::from_secs(30),
        ));
        let node = NodeConfig {
            id: "node-a".to_string(),
            host: "h".to_string(),
            port: 1,
        };
        let cancel = CancellationToken::new();
        let handle = spawn_heartbeat(
            health.clone(),
            node,
            Duration::from_secs(10),
            cancel.clone(),
        );

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            clock.advance(Duration::from_secs(10));
        }
        tokio::task::yield_now().await;
        let record = health.record("node-a").await.unwrap().unwrap();
        assert!(record.last_heartbeat >= 40_000);
        assert!(health.is_healthy("node-a").await.unwrap());

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(
            store.set_members(&KeySpace::default().nodes_key()).await.unwrap(),
            vec!["node-a".to_string()]
        );
    }

    /// 测试：心跳失败不会终止循环，存储恢复后下一个周期写入成功
    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_loop_recovers_after_store_failure() {
        let clock = ManualClock::new(0);
        let store = Arc::new(FailingStore::new(clock.clone()));
        let health = Arc::new(NodeHealthRegistry::new(
            store.clone(),
            KeySpace::default(),
            clock.clone(),
            Duration::from_secs(30),
        ));
        let node = NodeConfig {
            id: "node-a".to_string(),
            host: "h".to_string(),
            port: 1,
        };
        let before = failure_count(HEARTBEAT_TASK);
        store.fail_next(2);

        let cancel = CancellationToken::new();
        let handle = spawn_heartbeat(health.clone(), node, Duration::from_secs(10), cancel.clone());

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(health.record("node-a").await.unwrap(), None);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(health.is_healthy("node-a").await.unwrap());
        assert!(failure_count(HEARTBEAT_TASK) >= before + 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    /// 测试：巡检失败后下一个周期重试并清理失效节点的在线记录
    #[tokio::test(start_paused = true)]
    async fn test_sweep_loop_retries_after_store_failure() {
        let clock = ManualClock::new(0);
        let store = Arc::new(FailingStore::new(clock.clone()));
        let keys = KeySpace::default();
        let health = Arc::new(NodeHealthRegistry::new(
            store.clone(),
            keys.clone(),
            clock.clone(),
            Duration::from_secs(30),
        ));
        health.heartbeat("node-dead", "h", 1).await.unwrap();
        store
            .set(&keys.presence_key("bob"), "node-dead", None)
            .await
            .unwrap();
        clock.set(31_000);

        let before = failure_count(SWEEP_TASK);
        store.fail_next(1);
        let cancel = CancellationToken::new();
        let handle = spawn_sweep(health.clone(), Duration::from_secs(5), cancel.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            store.get(&keys.presence_key("bob")).await.unwrap(),
            Some("node-dead".to_string())
        );
        assert!(failure_count(SWEEP_TASK) >= before + 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.get(&keys.presence_key("bob")).await.unwrap(), None);
        assert!(store.set_members(&keys.nodes_key()).await.unwrap().is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
