use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use crate::domain::model::ClusterMessage;
use crate::domain::repository::MessageBus;

const SUBSCRIPTION_BUFFER: usize = 1024;

/// 内存广播总线，每个订阅者收到同一主题的全部消息
#[derive(Default)]
pub struct InMemoryMessageBus {
    topics: RwLock<HashMap<String, Vec<mpsc::Sender<ClusterMessage>>>>,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 主题当前的订阅者数量
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|subscribers| subscribers.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, topic: &str, message: &ClusterMessage) -> Result<()> {
        let subscribers = self
            .topics
            .read()
            .await
            .get(topic)
            .cloned()
            .unwrap_or_default();

        let mut closed = 0;
        for tx in &subscribers {
            if tx.send(message.clone()).await.is_err() {
                closed += 1;
            }
        }

        if closed > 0 {
            let mut topics = self.topics.write().await;
            if let Some(subscribers) = topics.get_mut(topic) {
                subscribers.retain(|tx| !tx.is_closed());
            }
            debug!(%topic, closed, "Removed closed subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<ClusterMessage>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.topics
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试：每个订阅者都收到消息，已关闭的订阅者被移除
    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let bus = InMemoryMessageBus::new();
        let mut first = bus.subscribe("t").await.unwrap();
        let mut second = bus.subscribe("t").await.unwrap();
        let third = bus.subscribe("t").await.unwrap();
        drop(third);

        let message = ClusterMessage::new("u1", None, "hello", 1);
        bus.publish("t", &message).await.unwrap();

        assert_eq!(first.recv().await.unwrap(), message);
        assert_eq!(second.recv().await.unwrap(), message);
        assert_eq!(bus.subscriber_count("t").await, 2);
    }
}
