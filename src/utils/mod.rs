//! 工具函数模块
//!
//! 提供时间戳、ID 生成、参数校验以及可注入时钟等通用工具

pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use chrono::Utc;

use crate::error::{ClusterError, ClusterResult};

/// 用户ID最大长度
const MAX_ID_LEN: usize = 255;

/// 获取当前时间戳（毫秒）
pub fn current_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 生成唯一ID
pub fn generate_id(prefix: &str) -> String {
    format!("{}-{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..8])
}

/// 生成会话ID
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 验证用户ID有效性
pub fn validate_user_id(user_id: &str) -> ClusterResult<()> {
    validate_id("User ID", user_id)
}

/// 验证节点ID有效性
pub fn validate_node_id(node_id: &str) -> ClusterResult<()> {
    validate_id("Node ID", node_id)
}

fn validate_id(kind: &str, value: &str) -> ClusterResult<()> {
    if value.trim().is_empty() {
        return Err(ClusterError::InvalidParameter(format!(
            "{} cannot be empty",
            kind
        )));
    }
    if value.len() > MAX_ID_LEN {
        return Err(ClusterError::InvalidParameter(format!(
            "{} too long (max {} characters)",
            kind, MAX_ID_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_has_prefix() {
        let id = generate_id("node");
        assert!(id.starts_with("node-"));
        assert_eq!(id.len(), "node-".len() + 8);
        assert_ne!(id, generate_id("node"));
    }

    #[test]
    fn test_validate_user_id() {
        assert!(validate_user_id("alice").is_ok());
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("   ").is_err());
        assert!(validate_user_id(&"x".repeat(256)).is_err());
    }
}
