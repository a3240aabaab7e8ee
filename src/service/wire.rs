//! 依赖装配

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::application::{BroadcastHandler, SseClusterService};
use crate::config::ClusterConfig;
use crate::domain::model::KeySpace;
use crate::domain::repository::{KvStore, MessageBus, PushTransport};
use crate::domain::service::{
    LocalConnectionTable, MessageRouter, NodeHealthRegistry, PacedStreamer, PresenceRegistry,
};
use crate::infrastructure::persistence::redis::{RedisKvStore, RedisMessageBus};
use crate::infrastructure::transport::MpscPushTransport;
use crate::utils::{Clock, SystemClock};

/// 单次推送的发送超时
const PUSH_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// 应用上下文 - 包含所有已初始化的服务
pub struct ApplicationContext {
    pub config: ClusterConfig,
    pub bus: Arc<dyn MessageBus>,
    pub health: Arc<NodeHealthRegistry>,
    pub presence: Arc<PresenceRegistry>,
    pub table: Arc<LocalConnectionTable>,
    pub streamer: Arc<PacedStreamer>,
    pub router: Arc<MessageRouter>,
    pub service: Arc<SseClusterService>,
    pub broadcast_handler: Arc<BroadcastHandler>,
}

/// 连接 Redis 并装配节点
pub async fn initialize(config: ClusterConfig) -> Result<ApplicationContext> {
    let store: Arc<dyn KvStore> = Arc::new(
        RedisKvStore::connect(&config.redis.url)
            .await
            .context("Failed to connect redis store")?,
    );
    let bus: Arc<dyn MessageBus> = Arc::new(
        RedisMessageBus::connect(&config.redis.url)
            .await
            .context("Failed to connect redis bus")?,
    );
    let transport: Arc<dyn PushTransport> = Arc::new(MpscPushTransport::new(
        config.cluster.channel_buffer,
        PUSH_SEND_TIMEOUT,
    ));

    info!(redis_url = %config.redis.url, namespace = %config.redis.namespace, "Redis backend ready");
    Ok(initialize_with(
        config,
        store,
        bus,
        transport,
        Arc::new(SystemClock),
    ))
}

/// 使用给定的存储、总线、传输层和时钟装配节点
pub fn initialize_with(
    config: ClusterConfig,
    store: Arc<dyn KvStore>,
    bus: Arc<dyn MessageBus>,
    transport: Arc<dyn PushTransport>,
    clock: Arc<dyn Clock>,
) -> ApplicationContext {
    let keys = KeySpace::new(config.redis.namespace.clone());
    let timing = &config.cluster;

    let health = Arc::new(NodeHealthRegistry::new(
        store.clone(),
        keys.clone(),
        clock.clone(),
        timing.node_timeout(),
    ));
    let presence = Arc::new(PresenceRegistry::new(
        store,
        keys,
        health.clone(),
        clock.clone(),
        config.node.id.clone(),
        timing.presence_ttl(),
    ));
    let table = Arc::new(LocalConnectionTable::new(
        transport,
        presence.clone(),
        clock.clone(),
        timing.channel_max_lifetime(),
    ));
    let streamer = Arc::new(PacedStreamer::new(
        table.clone(),
        timing.stream_char_delay(),
    ));
    let router = Arc::new(MessageRouter::new(
        presence.clone(),
        table.clone(),
        streamer.clone(),
        bus.clone(),
        timing.broadcast_topic.clone(),
        clock,
    ));
    let service = Arc::new(SseClusterService::new(
        table.clone(),
        presence.clone(),
        health.clone(),
        router.clone(),
        streamer.clone(),
        timing.stream_text.clone(),
    ));
    let broadcast_handler = Arc::new(BroadcastHandler::new(table.clone(), streamer.clone()));

    ApplicationContext {
        config,
        bus,
        health,
        presence,
        table,
        streamer,
        router,
        service,
        broadcast_handler,
    }
}
