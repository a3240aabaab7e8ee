//! 共享存储键空间
//!
//! 在线记录、连接信息、节点信息三类键的前缀互不重叠，
//! 节点失效巡检按在线记录前缀扫描时不会命中节点信息键。

/// 共享存储键布局
#[derive(Debug, Clone)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// 用户 -> 节点 映射前缀
    pub fn presence_prefix(&self) -> String {
        format!("{}:presence:", self.namespace)
    }

    /// 用户 -> 节点 映射键
    pub fn presence_key(&self, user_id: &str) -> String {
        format!("{}{}", self.presence_prefix(), user_id)
    }

    /// 连接信息键
    pub fn connection_key(&self, user_id: &str) -> String {
        format!("{}:connection:{}", self.namespace, user_id)
    }

    /// 从在线记录键中解析用户ID
    pub fn user_from_presence_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.presence_prefix().as_str())
    }

    /// 节点信息键
    pub fn node_info_key(&self, node_id: &str) -> String {
        format!("{}:node:info:{}", self.namespace, node_id)
    }

    /// 所有节点集合键
    pub fn nodes_key(&self) -> String {
        format!("{}:nodes:all", self.namespace)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("sse")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_do_not_overlap() {
        let keys = KeySpace::new("sse");
        let prefix = keys.presence_prefix();
        assert!(keys.presence_key("u1").starts_with(&prefix));
        assert!(!keys.node_info_key("node-a").starts_with(&prefix));
        assert!(!keys.connection_key("u1").starts_with(&prefix));
        assert!(!keys.nodes_key().starts_with(&prefix));
        assert_eq!(keys.user_from_presence_key("sse:presence:u1"), Some("u1"));
        assert_eq!(keys.user_from_presence_key("sse:node:info:a"), None);
    }
}
