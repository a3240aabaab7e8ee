//! 应用启动器 - 负责节点启动与优雅下线

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::SseClusterService;
use crate::config::ClusterConfig;
use crate::service::background::{spawn_heartbeat, spawn_sweep};
use crate::service::wire::{self, ApplicationContext};

/// 运行中的集群节点
pub struct ClusterNode {
    context: ApplicationContext,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ClusterNode {
    /// 启动节点：首次心跳、订阅广播、启动后台任务
    pub async fn start(context: ApplicationContext) -> Result<Self> {
        let node = context.config.node.clone();
        let timing = context.config.cluster.clone();

        // 先完成一次心跳，保证节点对外可见时已是健康状态
        context
            .health
            .heartbeat(&node.id, &node.host, node.port)
            .await
            .context("Failed to send initial heartbeat")?;

        let rx = context
            .bus
            .subscribe(&timing.broadcast_topic)
            .await
            .context("Failed to subscribe broadcast topic")?;

        let cancel = CancellationToken::new();
        let handler = context.broadcast_handler.clone();
        let consumer_cancel = cancel.child_token();
        let consumer = tokio::spawn(async move { handler.run(rx, consumer_cancel).await });

        let heartbeat = spawn_heartbeat(
            context.health.clone(),
            node.clone(),
            timing.heartbeat_interval(),
            cancel.child_token(),
        );
        let sweep = spawn_sweep(
            context.health.clone(),
            timing.sweep_interval(),
            cancel.child_token(),
        );

        info!(
            node_id = %node.id,
            host = %node.host,
            port = node.port,
            topic = %timing.broadcast_topic,
            "Cluster node started"
        );

        Ok(Self {
            context,
            cancel,
            tasks: vec![consumer, heartbeat, sweep],
        })
    }

    pub fn service(&self) -> Arc<SseClusterService> {
        self.context.service.clone()
    }

    pub fn context(&self) -> &ApplicationContext {
        &self.context
    }

    pub fn node_id(&self) -> &str {
        &self.context.config.node.id
    }

    /// 优雅下线：停止后台任务，关闭所有本地连接，移除节点记录
    pub async fn shutdown(self) -> Result<()> {
        let node_id = self.context.config.node.id.clone();
        info!(%node_id, "Shutting down cluster node");

        self.cancel.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(%node_id, error = %err, "Background task ended abnormally");
            }
        }

        let closed = match self.context.table.close_all().await {
            Ok(closed) => closed,
            Err(err) => {
                error!(%node_id, error = %err, "Failed to release presence for some connections");
                0
            }
        };

        self.context
            .health
            .deregister(&node_id)
            .await
            .context("Failed to deregister node")?;

        info!(%node_id, closed, "Cluster node stopped");
        Ok(())
    }
}

/// 应用启动器
pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 运行应用的主入口点，收到 Ctrl-C 后优雅下线
    pub async fn run(config: ClusterConfig) -> Result<()> {
        let context = wire::initialize(config).await?;
        let node = ClusterNode::start(context).await?;

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!(node_id = %node.node_id(), "Shutdown signal received");

        node.shutdown().await
    }
}
