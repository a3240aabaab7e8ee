use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::domain::model::{ClusterMessage, PushEvent};
use crate::error::ClusterResult;

// Rust 2024: 对于需要作为 trait 对象使用的 trait（Arc<dyn Trait>），
// 如果方法参数包含引用，需要保留 async-trait 宏

/// 共享过期键值存储接口
///
/// 单个命令是原子的，但不提供跨键事务；调用方需容忍读写延迟，
/// 并保证多步更新在中途中断后可以幂等重放。
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// 写入键值，`ttl` 为空时不过期
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    /// 删除键，返回实际删除的数量
    async fn delete(&self, keys: &[String]) -> Result<usize>;
    /// 设置过期时间，键不存在时返回 false
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
    async fn set_add(&self, set_key: &str, member: &str) -> Result<()>;
    async fn set_members(&self, set_key: &str) -> Result<Vec<String>>;
    async fn set_remove(&self, set_key: &str, member: &str) -> Result<()>;
    /// 列出所有以 `prefix` 开头的键
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// 广播总线接口
///
/// 每个订阅者都会收到发布到同一主题的全部消息。
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, message: &ClusterMessage) -> Result<()>;
    /// 订阅主题，消息通过返回的接收器投递
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<ClusterMessage>>;
}

/// 客户端侧事件流
pub type PushEventStream = BoxStream<'static, PushEvent>;

/// 单个推送通道
///
/// 发送可能阻塞在 I/O 上，并可能随时因对端断开而失败。
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// 发送事件，失败返回 `ClusterError::TransportFailure`
    async fn send(&self, event: PushEvent) -> ClusterResult<()>;
    /// 强制完成通道
    fn close(&self);
    /// 对端断开时完成
    async fn closed(&self);
}

/// 打开的推送通道
pub struct OpenedChannel {
    /// 服务端写入端
    pub channel: Box<dyn PushChannel>,
    /// 客户端读取端，交给接入层转换为具体协议
    pub events: PushEventStream,
}

/// 推送通道传输层接口
pub trait PushTransport: Send + Sync {
    fn open(&self, user_id: &str, session_id: &str) -> ClusterResult<OpenedChannel>;
}
