//! SSE 集群推送核心库
//!
//! 让集群中任意节点都能向连接在其他节点上的用户推送实时事件：
//! - 在线状态注册表：用户 -> 持有连接的节点（带 TTL，读取时惰性自愈）
//! - 节点健康注册表：心跳与失效节点巡检
//! - 消息路由：本地直接投递，或通过广播总线由持有节点投递

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod metrics;
pub mod service;
pub mod tracing;
pub mod utils;

pub use application::{BroadcastHandler, SseClusterService};
pub use config::{ClusterConfig, ConfigManager, LoadedConfig, LoggingConfig, load_config};
pub use domain::model::{
    ClusterMessage, CloseOutcome, Connection, ConnectionStatus, NodeRecord, NodeStats, PushEvent,
    RouteOutcome, RouteReceipt,
};
pub use domain::service::{
    ChannelHandle, LocalConnectionTable, MessageRouter, NodeHealthRegistry, PacedStreamer,
    PresenceRegistry,
};
pub use error::{ClusterError, ClusterResult};
pub use service::{ApplicationBootstrap, ApplicationContext, ClusterNode};
