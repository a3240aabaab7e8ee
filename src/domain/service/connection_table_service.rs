//! 本地连接表
//!
//! 每个节点内存中的 用户 -> 推送通道 映射。本地表与在线状态注册表必须同步变更：
//! 打开通道后注册在线记录，通道终止后释放在线记录。
//!
//! 通道的三种终态（完成 / 超时 / 出错）都汇入 [`LocalConnectionTable::on_terminal`]，
//! 每个通道的清理最多执行一次。
//!
//! 同一用户的 注册在线记录 与 释放在线记录 在本节点内串行执行（按用户分片的异步锁），
//! 旧通道的清理不会删掉紧随其后重连的新会话的记录。

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::model::{Connection, PushEvent, TerminalReason, events};
use crate::domain::repository::{PushChannel, PushEventStream, PushTransport};
use crate::domain::service::PresenceRegistry;
use crate::error::ClusterResult;
use crate::metrics::CLUSTER_METRICS;
use crate::utils::{Clock, generate_session_id, validate_user_id};

/// 用户锁分片数
const USER_LOCK_STRIPES: usize = 64;

/// 打开通道后交给接入层的句柄
pub struct ChannelHandle {
    pub user_id: String,
    pub session_id: String,
    pub node_id: String,
    /// 客户端事件流
    pub events: PushEventStream,
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

/// 本地通道条目
struct ChannelEntry {
    session_id: String,
    connected_at: i64,
    last_heartbeat: AtomicI64,
    channel: Box<dyn PushChannel>,
    /// 通道拆除时取消，流式输出与生命周期监视任务据此退出
    cancel: CancellationToken,
    terminated: AtomicBool,
}

impl ChannelEntry {
    /// 终止通道，仅第一次调用返回 true
    fn retire(&self) -> bool {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();
        self.channel.close();
        true
    }
}

/// 本地连接表
pub struct LocalConnectionTable {
    node_id: String,
    entries: DashMap<String, Arc<ChannelEntry>>,
    /// 串行化同一用户的在线记录注册与释放
    user_locks: Vec<Mutex<()>>,
    transport: Arc<dyn PushTransport>,
    presence: Arc<PresenceRegistry>,
    clock: Arc<dyn Clock>,
    max_lifetime: Duration,
}

impl LocalConnectionTable {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        presence: Arc<PresenceRegistry>,
        clock: Arc<dyn Clock>,
        max_lifetime: Duration,
    ) -> Self {
        Self {
            node_id: presence.node_id().to_string(),
            entries: DashMap::new(),
            user_locks: (0..USER_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            transport,
            presence,
            clock,
            max_lifetime,
        }
    }

    /// 打开推送通道，替换该用户在本节点的旧通道（本地后写者胜）
    pub async fn open(self: &Arc<Self>, user_id: &str) -> ClusterResult<ChannelHandle> {
        validate_user_id(user_id)?;

        let session_id = generate_session_id();
        let opened = self.transport.open(user_id, &session_id)?;
        let now = self.clock.now_millis();

        let entry = Arc::new(ChannelEntry {
            session_id: session_id.clone(),
            connected_at: now,
            last_heartbeat: AtomicI64::new(now),
            channel: opened.channel,
            cancel: CancellationToken::new(),
            terminated: AtomicBool::new(false),
        });

        {
            let _guard = self.user_lock(user_id).lock().await;

            if let Some(previous) = self.entries.insert(user_id.to_string(), entry.clone()) {
                // 旧通道由新通道取代，在线记录紧接着被覆盖，无需注销
                if previous.retire() {
                    info!(
                        %user_id,
                        old_session_id = %previous.session_id,
                        new_session_id = %session_id,
                        "Replaced existing local connection"
                    );
                }
            }
            self.update_gauge();

            let connection = Connection::new(user_id, &session_id, &self.node_id, now);
            if let Err(err) = self.presence.register_connection(&connection).await {
                error!(%user_id, %session_id, error = %err, "Failed to register connection");
                if self
                    .entries
                    .remove_if(user_id, |_, current| current.session_id == session_id)
                    .is_some()
                {
                    entry.retire();
                    self.update_gauge();
                }
                return Err(err);
            }
        }

        self.spawn_lifecycle_watch(user_id, entry.clone());

        let connected = serde_json::json!({
            "sessionId": session_id,
            "nodeId": self.node_id,
        });
        if let Err(err) = entry
            .channel
            .send(PushEvent::named(events::CONNECTED, connected.to_string()))
            .await
        {
            error!(%user_id, %session_id, error = %err, "Failed to send connected event");
            self.on_terminal(user_id, &session_id, TerminalReason::Error(err.to_string()))
                .await;
            return Err(err);
        }

        info!(%user_id, %session_id, node_id = %self.node_id, "Push connection created");
        Ok(ChannelHandle {
            user_id: user_id.to_string(),
            session_id,
            node_id: self.node_id.clone(),
            events: opened.events,
        })
    }

    /// 监视通道终态：对端断开 -> 完成，超过最大存活时间 -> 超时
    fn spawn_lifecycle_watch(self: &Arc<Self>, user_id: &str, entry: Arc<ChannelEntry>) {
        let table = Arc::clone(self);
        let user_id = user_id.to_string();
        let max_lifetime = self.max_lifetime;

        tokio::spawn(async move {
            let reason = tokio::select! {
                biased;
                _ = entry.cancel.cancelled() => None,
                _ = entry.channel.closed() => Some(TerminalReason::Completed),
                _ = tokio::time::sleep(max_lifetime) => Some(TerminalReason::Timeout),
            };
            if let Some(reason) = reason {
                table.on_terminal(&user_id, &entry.session_id, reason).await;
            }
        });
    }

    /// 向用户当前通道发送事件
    ///
    /// 无本地通道返回 false；发送失败视同断开，返回前完成本地与分布式清理。
    pub async fn send(&self, user_id: &str, event: Option<&str>, data: &str) -> ClusterResult<bool> {
        let Some(entry) = self.entry(user_id) else {
            warn!(%user_id, "No local session found");
            return Ok(false);
        };
        Ok(self.deliver(user_id, entry, PushEvent::new(event, data)).await)
    }

    /// 向指定会话发送事件，会话已被替换或关闭时返回 false
    pub async fn send_to_session(
        &self,
        user_id: &str,
        session_id: &str,
        event: Option<&str>,
        data: &str,
    ) -> ClusterResult<bool> {
        match self.entry(user_id) {
            Some(entry) if entry.session_id == session_id => {
                Ok(self.deliver(user_id, entry, PushEvent::new(event, data)).await)
            }
            _ => {
                debug!(%user_id, %session_id, "Session no longer active");
                Ok(false)
            }
        }
    }

    async fn deliver(&self, user_id: &str, entry: Arc<ChannelEntry>, event: PushEvent) -> bool {
        match entry.channel.send(event).await {
            Ok(()) => {
                entry
                    .last_heartbeat
                    .store(self.clock.now_millis(), Ordering::Release);
                // 投递已成功，刷新失败只影响 TTL，由下次投递或自愈兜底
                if let Err(err) = self.presence.refresh(user_id).await {
                    warn!(%user_id, error = %err, "Failed to refresh presence");
                }
                true
            }
            Err(err) => {
                CLUSTER_METRICS.delivery_failures_total.inc();
                error!(%user_id, session_id = %entry.session_id, error = %err, "Failed to send message");
                self.on_terminal(user_id, &entry.session_id, TerminalReason::Error(err.to_string()))
                    .await;
                false
            }
        }
    }

    /// 强制完成并移除用户的通道，重复调用无副作用
    pub async fn close(&self, user_id: &str) -> ClusterResult<bool> {
        let Some(entry) = self.entry(user_id) else {
            return Ok(false);
        };
        self.teardown(user_id, &entry.session_id, TerminalReason::Completed)
            .await
    }

    /// 传输层终态回调，每个通道最多生效一次
    pub async fn on_terminal(&self, user_id: &str, session_id: &str, reason: TerminalReason) {
        if let Err(err) = self.teardown(user_id, session_id, reason).await {
            warn!(%user_id, %session_id, error = %err, "Failed to release presence after teardown");
        }
    }

    /// 统一清理路径：移除本地条目 -> 关闭通道 -> 释放在线记录
    ///
    /// 返回是否实际清理了通道；本地清理总会完成，在线记录释放失败时返回错误。
    async fn teardown(
        &self,
        user_id: &str,
        session_id: &str,
        reason: TerminalReason,
    ) -> ClusterResult<bool> {
        let _guard = self.user_lock(user_id).lock().await;
        let Some((_, entry)) = self
            .entries
            .remove_if(user_id, |_, current| current.session_id == session_id)
        else {
            return Ok(false);
        };

        entry.retire();
        self.update_gauge();
        info!(%user_id, %session_id, reason = %reason, "Push connection terminated");

        self.presence.release(user_id, Some(session_id)).await?;
        Ok(true)
    }

    /// 释放指向本节点、但本地已无通道的在线记录
    ///
    /// 本地仍持有该用户的通道（例如刚刚重连）时保留记录并返回 false。
    pub async fn release_stale(&self, user_id: &str) -> ClusterResult<bool> {
        let _guard = self.user_lock(user_id).lock().await;
        if self.entries.contains_key(user_id) {
            return Ok(false);
        }
        self.presence.release(user_id, None).await
    }

    /// 关闭所有本地通道（节点下线）
    pub async fn close_all(&self) -> ClusterResult<usize> {
        let sessions: Vec<(String, String)> = self
            .entries
            .iter()
            .map(|item| (item.key().clone(), item.value().session_id.clone()))
            .collect();

        let mut closed = 0;
        let mut last_error = None;
        for (user_id, session_id) in sessions {
            match self
                .teardown(&user_id, &session_id, TerminalReason::Completed)
                .await
            {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(err) => {
                    closed += 1;
                    warn!(%user_id, error = %err, "Failed to release presence on shutdown");
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(closed),
        }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// 广播过滤谓词：本节点是否持有该用户的通道
    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.contains_key(user_id)
    }

    /// 当前会话ID及其取消令牌
    pub fn session_token(&self, user_id: &str) -> Option<(String, CancellationToken)> {
        self.entries
            .get(user_id)
            .map(|entry| (entry.session_id.clone(), entry.cancel.clone()))
    }

    /// 本地连接快照
    pub fn connection(&self, user_id: &str) -> Option<Connection> {
        self.entries.get(user_id).map(|entry| Connection {
            user_id: user_id.to_string(),
            session_id: entry.session_id.clone(),
            owner_node_id: self.node_id.clone(),
            connected_at: entry.connected_at,
            last_heartbeat: entry.last_heartbeat.load(Ordering::Acquire),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// 克隆条目，避免跨 await 持有 DashMap 分片锁
    fn entry(&self, user_id: &str) -> Option<Arc<ChannelEntry>> {
        self.entries.get(user_id).map(|entry| Arc::clone(entry.value()))
    }

    fn user_lock(&self, user_id: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        &self.user_locks[hasher.finish() as usize % self.user_locks.len()]
    }

    fn update_gauge(&self) {
        CLUSTER_METRICS
            .local_connections
            .set(self.entries.len() as i64);
    }
}
