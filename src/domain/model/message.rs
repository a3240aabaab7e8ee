use serde::{Deserialize, Serialize};

/// 事件名称常量
pub mod events {
    /// 连接建立事件
    pub const CONNECTED: &str = "connected";
    /// 启动流式输出的控制事件
    pub const START_STREAM: &str = "start-stream";
    /// 流式输出的单字符事件
    pub const STREAM: &str = "stream";
    /// 流式输出完成事件
    pub const STREAM_COMPLETE: &str = "stream-complete";
    /// 流式输出完成事件数据
    pub const STREAM_COMPLETE_DATA: &str = "completed";

    /// 是否为节点间控制事件，普通消息不可使用
    pub fn is_control(name: &str) -> bool {
        name == START_STREAM
    }
}

/// 跨节点广播消息
///
/// 仅在广播总线上传输，不持久化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMessage {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    pub data: String,
    /// 发送时间（毫秒时间戳）
    pub timestamp: i64,
}

impl ClusterMessage {
    pub fn new(
        user_id: impl Into<String>,
        event_name: Option<&str>,
        data: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            event_name: normalize_event(event_name).map(str::to_string),
            data: data.into(),
            timestamp,
        }
    }

    pub fn is_start_stream(&self) -> bool {
        self.event_name.as_deref() == Some(events::START_STREAM)
    }
}

/// 推送给客户端的单个事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    /// 事件名称，为空时客户端按默认 message 事件处理
    pub event: Option<String>,
    pub data: String,
}

impl PushEvent {
    pub fn new(event: Option<&str>, data: impl Into<String>) -> Self {
        Self {
            event: normalize_event(event).map(str::to_string),
            data: data.into(),
        }
    }

    pub fn named(event: &str, data: impl Into<String>) -> Self {
        Self::new(Some(event), data)
    }
}

/// 空字符串事件名视为无事件名
pub(crate) fn normalize_event(event: Option<&str>) -> Option<&str> {
    event.filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let message = ClusterMessage::new("u1", Some("notice"), "hello", 42);
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(
            json,
            r#"{"userId":"u1","eventName":"notice","data":"hello","timestamp":42}"#
        );

        let plain: ClusterMessage =
            serde_json::from_str(r#"{"userId":"u1","data":"x","timestamp":1}"#).unwrap();
        assert_eq!(plain.event_name, None);
    }

    #[test]
    fn test_empty_event_name_is_dropped() {
        let message = ClusterMessage::new("u1", Some(""), "hello", 0);
        assert_eq!(message.event_name, None);
        assert_eq!(PushEvent::new(Some(""), "x").event, None);
        assert!(ClusterMessage::new("u1", Some(events::START_STREAM), "abc", 0).is_start_stream());
    }
}
