//! 集群推送配置模块
//!
//! 该模块提供了节点配置管理功能，包括：
//! - TOML 配置文件加载和解析
//! - 环境变量覆盖（见 [`ConfigManager`]）
//! - 心跳 / 超时 / 巡检等时序参数的校验

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::{ClusterError, ClusterResult};

mod manager;
pub use manager::ConfigManager;

/// 默认的流式输出演示文本
const DEFAULT_STREAM_TEXT: &str = "This is a simulated streaming reply. In a real application the text \
would come from a model and be pushed to the client one character at a time, so the user can watch \
the answer appear as it is produced.";

/// 节点身份配置
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// 节点唯一标识
    #[serde(default = "default_node_id")]
    pub id: String,
    /// 节点主机地址
    #[serde(default = "default_host")]
    pub host: String,
    /// 节点端口
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis 服务器地址
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// 命名空间前缀
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            namespace: default_namespace(),
        }
    }
}

/// 集群时序与通道配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterTimingConfig {
    /// 节点心跳间隔（秒）
    pub heartbeat_interval_secs: u64,
    /// 节点超时时间（秒）
    pub node_timeout_secs: u64,
    /// 健康巡检间隔（秒）
    pub sweep_interval_secs: u64,
    /// 在线记录过期时间（秒）
    pub presence_ttl_secs: u64,
    /// 推送通道最大存活时间（秒）
    pub channel_max_lifetime_secs: u64,
    /// 流式输出字符间隔（毫秒）
    pub stream_char_delay_ms: u64,
    /// 推送通道缓冲区大小
    pub channel_buffer: usize,
    /// 跨节点广播主题
    pub broadcast_topic: String,
    /// 流式输出文本
    pub stream_text: String,
}

impl Default for ClusterTimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 10,
            node_timeout_secs: 30,
            sweep_interval_secs: 5,
            presence_ttl_secs: 30 * 60,
            channel_max_lifetime_secs: 30 * 60,
            stream_char_delay_ms: 50,
            channel_buffer: 256,
            broadcast_topic: "sse-broadcast".to_string(),
            stream_text: DEFAULT_STREAM_TEXT.to_string(),
        }
    }
}

impl ClusterTimingConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }

    pub fn channel_max_lifetime(&self) -> Duration {
        Duration::from_secs(self.channel_max_lifetime_secs)
    }

    pub fn stream_char_delay(&self) -> Duration {
        Duration::from_millis(self.stream_char_delay_ms)
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_file: bool,
    pub with_line_number: bool,
    /// 是否输出 JSON 格式
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
            json: false,
        }
    }
}

/// 节点完整配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cluster: ClusterTimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ClusterConfig {
    /// 从 TOML 字符串解析
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid cluster configuration format")
    }

    /// 校验时序参数
    ///
    /// 心跳间隔必须小于节点超时，否则存活节点会被误判为不健康。
    pub fn validate(&self) -> ClusterResult<()> {
        crate::utils::validate_node_id(&self.node.id)
            .map_err(|e| ClusterError::Config(e.to_string()))?;

        let timing = &self.cluster;
        let non_zero = [
            ("heartbeat_interval_secs", timing.heartbeat_interval_secs),
            ("node_timeout_secs", timing.node_timeout_secs),
            ("sweep_interval_secs", timing.sweep_interval_secs),
            ("presence_ttl_secs", timing.presence_ttl_secs),
            ("channel_max_lifetime_secs", timing.channel_max_lifetime_secs),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ClusterError::Config(format!("{} must be positive", name)));
            }
        }
        if timing.channel_buffer == 0 {
            return Err(ClusterError::Config(
                "channel_buffer must be positive".to_string(),
            ));
        }
        if timing.heartbeat_interval_secs >= timing.node_timeout_secs {
            return Err(ClusterError::Config(format!(
                "heartbeat_interval_secs ({}) must be less than node_timeout_secs ({})",
                timing.heartbeat_interval_secs, timing.node_timeout_secs
            )));
        }
        if timing.broadcast_topic.trim().is_empty() {
            return Err(ClusterError::Config(
                "broadcast_topic cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// 合法但不推荐的配置组合
    pub fn warnings(&self) -> Vec<String> {
        let timing = &self.cluster;
        let mut warnings = Vec::new();
        if timing.sweep_interval_secs > timing.node_timeout_secs {
            warnings.push(format!(
                "sweep_interval_secs ({}) exceeds node_timeout_secs ({}), dead-node cleanup will lag",
                timing.sweep_interval_secs, timing.node_timeout_secs
            ));
        }
        warnings
    }
}

/// 加载结果
///
/// 加载发生在日志初始化之前，警告随结果返回，由调用方在日志就绪后输出。
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ClusterConfig,
    pub warnings: Vec<String>,
}

/// 加载配置
///
/// 读取 `path` 指向的 TOML 文件（文件不存在时使用默认值），
/// 然后应用环境变量覆盖并校验。
pub fn load_config(path: Option<&str>) -> Result<LoadedConfig> {
    let mut warnings = Vec::new();
    let mut config = match path {
        Some(path) if Path::new(path).exists() => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path))?;
            ClusterConfig::from_toml_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path))?
        }
        Some(path) => {
            warnings.push(format!("config file not found: {}, using defaults", path));
            ClusterConfig::default()
        }
        None => ClusterConfig::default(),
    };

    ConfigManager::apply_env_overrides(&mut config)?;
    config.validate()?;
    warnings.extend(config.warnings());
    Ok(LoadedConfig { config, warnings })
}

fn default_node_id() -> String {
    crate::utils::generate_id("node")
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_namespace() -> String {
    "sse".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = ClusterConfig::default();
        assert_eq!(config.cluster.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(config.cluster.node_timeout(), Duration::from_secs(30));
        assert_eq!(config.cluster.sweep_interval(), Duration::from_secs(5));
        assert_eq!(config.cluster.channel_max_lifetime(), Duration::from_secs(1800));
        assert_eq!(config.cluster.stream_char_delay(), Duration::from_millis(50));
        assert!(config.node.id.starts_with("node-"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = ClusterConfig::from_toml_str(
            r#"
            [node]
            id = "node-a"
            port = 9001

            [cluster]
            node_timeout_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.node.id, "node-a");
        assert_eq!(config.node.port, 9001);
        assert_eq!(config.node.host, "localhost");
        assert_eq!(config.cluster.node_timeout_secs, 60);
        assert_eq!(config.cluster.heartbeat_interval_secs, 10);
        assert_eq!(config.redis.namespace, "sse");
    }

    #[test]
    fn test_heartbeat_must_be_shorter_than_timeout() {
        let mut config = ClusterConfig::default();
        config.cluster.heartbeat_interval_secs = 30;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ClusterError::Config(_)));
    }

    #[test]
    fn test_load_reports_missing_file_and_slow_sweep() {
        let loaded = load_config(Some("/nonexistent/sse-cluster.toml")).unwrap();
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].contains("config file not found"));

        let mut config = ClusterConfig::default();
        assert!(config.warnings().is_empty());
        config.cluster.sweep_interval_secs = 60;
        assert!(config.validate().is_ok());
        assert_eq!(config.warnings().len(), 1);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = ClusterConfig::default();
        config.cluster.sweep_interval_secs = 0;
        assert!(config.validate().is_err());
    }
}
