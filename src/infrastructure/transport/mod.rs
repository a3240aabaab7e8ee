//! 基于 mpsc 的推送通道
//!
//! 服务端写入 `mpsc::Sender`，客户端侧拿到 `ReceiverStream`，由接入层转换为
//! SSE 等具体协议。客户端丢弃事件流即视为断开。

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::domain::model::PushEvent;
use crate::domain::repository::{OpenedChannel, PushChannel, PushTransport};
use crate::error::{ClusterError, ClusterResult};

/// mpsc 推送传输层
pub struct MpscPushTransport {
    buffer: usize,
    /// 客户端消费过慢时的发送超时，超时视为传输失败
    send_timeout: Duration,
}

impl MpscPushTransport {
    pub fn new(buffer: usize, send_timeout: Duration) -> Self {
        Self {
            buffer: buffer.max(1),
            send_timeout,
        }
    }
}

impl PushTransport for MpscPushTransport {
    fn open(&self, user_id: &str, _session_id: &str) -> ClusterResult<OpenedChannel> {
        let (tx, rx) = mpsc::channel(self.buffer);
        Ok(OpenedChannel {
            channel: Box::new(MpscPushChannel {
                user_id: user_id.to_string(),
                sender: Mutex::new(Some(tx)),
                send_timeout: self.send_timeout,
            }),
            events: ReceiverStream::new(rx).boxed(),
        })
    }
}

struct MpscPushChannel {
    user_id: String,
    sender: Mutex<Option<mpsc::Sender<PushEvent>>>,
    send_timeout: Duration,
}

impl MpscPushChannel {
    fn sender(&self) -> Option<mpsc::Sender<PushEvent>> {
        self.sender
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().cloned())
    }
}

#[async_trait]
impl PushChannel for MpscPushChannel {
    async fn send(&self, event: PushEvent) -> ClusterResult<()> {
        let Some(sender) = self.sender() else {
            return Err(ClusterError::transport(&self.user_id, "channel closed"));
        };
        match tokio::time::timeout(self.send_timeout, sender.send(event)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ClusterError::transport(&self.user_id, "client disconnected")),
            Err(_) => Err(ClusterError::transport(&self.user_id, "send timed out")),
        }
    }

    fn close(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
    }

    async fn closed(&self) {
        if let Some(sender) = self.sender() {
            sender.closed().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试：客户端丢弃事件流后发送失败
    #[tokio::test]
    async fn test_send_after_client_drop() {
        let transport = MpscPushTransport::new(4, Duration::from_secs(1));
        let opened = transport.open("u1", "s1").unwrap();
        drop(opened.events);

        let err = opened
            .channel
            .send(PushEvent::new(None, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::TransportFailure { .. }));
        opened.channel.closed().await;
    }

    /// 测试：关闭后客户端流结束
    #[tokio::test]
    async fn test_close_ends_stream() {
        let transport = MpscPushTransport::new(4, Duration::from_secs(1));
        let mut opened = transport.open("u1", "s1").unwrap();
        opened.channel.send(PushEvent::new(None, "x")).await.unwrap();
        opened.channel.close();

        assert_eq!(opened.events.next().await.unwrap().data, "x");
        assert!(opened.events.next().await.is_none());
        assert!(opened.channel.send(PushEvent::new(None, "y")).await.is_err());
    }

    /// 测试：客户端不消费时发送超时
    #[tokio::test(start_paused = true)]
    async fn test_slow_client_times_out() {
        let transport = MpscPushTransport::new(1, Duration::from_millis(100));
        let opened = transport.open("u1", "s1").unwrap();
        opened.channel.send(PushEvent::new(None, "1")).await.unwrap();

        let err = opened
            .channel
            .send(PushEvent::new(None, "2"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
