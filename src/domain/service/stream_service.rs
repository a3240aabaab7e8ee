//! 逐字符流式输出
//!
//! 每个流在独立任务中运行，按固定间隔逐字符推送 `stream` 事件，结束后推送
//! `stream-complete`。任务绑定到启动时的会话，通道拆除时通过取消令牌中断。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::model::events;
use crate::domain::service::LocalConnectionTable;
use crate::metrics::CLUSTER_METRICS;

/// 逐字符流式输出器
pub struct PacedStreamer {
    table: Arc<LocalConnectionTable>,
    delay: Duration,
    active: Arc<AtomicUsize>,
}

/// 运行中流计数守卫
struct ActiveStream(Arc<AtomicUsize>);

impl ActiveStream {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        CLUSTER_METRICS.active_streams.inc();
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
        CLUSTER_METRICS.active_streams.dec();
    }
}

impl PacedStreamer {
    pub fn new(table: Arc<LocalConnectionTable>, delay: Duration) -> Self {
        Self {
            table,
            delay,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 为本地用户启动流式输出，用户没有本地通道时返回 false
    pub fn start(&self, user_id: &str, text: &str) -> bool {
        let Some((session_id, cancel)) = self.table.session_token(user_id) else {
            warn!(%user_id, "No local session found for stream");
            return false;
        };

        let guard = ActiveStream::enter(&self.active);
        let table = Arc::clone(&self.table);
        let delay = self.delay;
        let user_id = user_id.to_string();
        let text = text.to_string();

        info!(%user_id, %session_id, chars = text.chars().count(), "Stream started");
        tokio::spawn(async move {
            let _guard = guard;
            let mut buf = [0u8; 4];

            for ch in text.chars() {
                if cancel.is_cancelled() {
                    debug!(%user_id, %session_id, "Stream cancelled");
                    return;
                }
                let data = ch.encode_utf8(&mut buf);
                match table
                    .send_to_session(&user_id, &session_id, Some(events::STREAM), data)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(%user_id, %session_id, "Stream channel gone, stopping");
                        return;
                    }
                    Err(err) => {
                        warn!(%user_id, %session_id, error = %err, "Stream send failed");
                        return;
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(%user_id, %session_id, "Stream cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match table
                .send_to_session(
                    &user_id,
                    &session_id,
                    Some(events::STREAM_COMPLETE),
                    events::STREAM_COMPLETE_DATA,
                )
                .await
            {
                Ok(true) => info!(%user_id, %session_id, "Stream completed"),
                Ok(false) => debug!(%user_id, %session_id, "Stream channel gone before completion"),
                Err(err) => warn!(%user_id, %session_id, error = %err, "Stream completion failed"),
            }
        });
        true
    }

    /// 当前运行中的流数量
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}
