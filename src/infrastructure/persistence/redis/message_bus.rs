use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use redis::{AsyncCommands, aio::ConnectionManager};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::domain::model::ClusterMessage;
use crate::domain::repository::MessageBus;

/// 订阅转发缓冲区大小
const SUBSCRIPTION_BUFFER: usize = 1024;
/// 订阅断开后的重连间隔
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

/// Redis Pub/Sub 实现的广播总线
pub struct RedisMessageBus {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisMessageBus {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let publisher = ConnectionManager::new(client.clone())
            .await
            .context("failed to open redis connection")?;
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl MessageBus for RedisMessageBus {
    async fn publish(&self, topic: &str, message: &ClusterMessage) -> Result<()> {
        let payload = serde_json::to_string(message).context("failed to encode cluster message")?;
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn
            .publish(topic, payload)
            .await
            .with_context(|| format!("failed to publish to {topic}"))?;
        debug!(%topic, user_id = %message.user_id, receivers, "Published cluster message");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<ClusterMessage>> {
        // 首次订阅同步建立，失败直接返回给调用方
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("failed to open pubsub connection")?;
        pubsub
            .subscribe(topic)
            .await
            .with_context(|| format!("failed to subscribe to {topic}"))?;
        info!(%topic, "Subscribed to broadcast topic");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let client = self.client.clone();
        let topic = topic.to_string();

        tokio::spawn(async move {
            let mut pubsub = Some(pubsub);
            loop {
                let current = match pubsub.take() {
                    Some(current) => current,
                    None => match resubscribe(&client, &topic).await {
                        Ok(current) => current,
                        Err(err) => {
                            error!(%topic, error = %err, "Failed to resubscribe, retrying");
                            tokio::select! {
                                _ = tx.closed() => return,
                                _ = tokio::time::sleep(RESUBSCRIBE_BACKOFF) => continue,
                            }
                        }
                    },
                };

                let mut messages = Box::pin(current.into_on_message());
                loop {
                    let msg = tokio::select! {
                        _ = tx.closed() => {
                            debug!(%topic, "Subscriber dropped, stopping forwarder");
                            return;
                        }
                        msg = messages.next() => msg,
                    };
                    let Some(msg) = msg else {
                        warn!(%topic, "Pubsub stream ended, reconnecting");
                        break;
                    };

                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(err) => {
                            warn!(%topic, error = %err, "Invalid pubsub payload, skipping");
                            continue;
                        }
                    };
                    match serde_json::from_str::<ClusterMessage>(&payload) {
                        Ok(message) => {
                            if tx.send(message).await.is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            warn!(%topic, error = %err, "Malformed cluster message, skipping");
                        }
                    }
                }
                drop(messages);
                tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
            }
        });

        Ok(rx)
    }
}

async fn resubscribe(client: &redis::Client, topic: &str) -> Result<redis::aio::PubSub> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .context("failed to open pubsub connection")?;
    pubsub
        .subscribe(topic)
        .await
        .with_context(|| format!("failed to subscribe to {topic}"))?;
    info!(%topic, "Resubscribed to broadcast topic");
    Ok(pubsub)
}
