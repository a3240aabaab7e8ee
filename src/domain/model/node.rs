use serde::{Deserialize, Serialize};

/// 节点信息
///
/// 节点启动时创建，每个心跳周期刷新，超过节点超时未刷新即过期。
/// 每个节点只写自己的记录，读取所有节点的记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    /// 节点唯一标识
    pub node_id: String,
    /// 节点主机地址
    pub host: String,
    /// 节点端口
    pub port: u16,
    /// 最后心跳时间（毫秒时间戳）
    pub last_heartbeat: i64,
    /// 节点是否健康
    pub healthy: bool,
}

impl NodeRecord {
    /// 心跳是否在超时窗口内
    pub fn is_fresh(&self, now_millis: i64, timeout_millis: i64) -> bool {
        now_millis - self.last_heartbeat <= timeout_millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_fresh_boundary() {
        let record = NodeRecord {
            node_id: "node-a".to_string(),
            host: "localhost".to_string(),
            port: 8080,
            last_heartbeat: 0,
            healthy: true,
        };
        assert!(record.is_fresh(30_000, 30_000));
        assert!(!record.is_fresh(30_001, 30_000));
    }
}
