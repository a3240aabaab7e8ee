//! 配置管理器 - 负责处理环境变量对文件配置的覆盖
//!
//! 优先级：环境变量 > 配置文件 > 默认值

use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};

use super::ClusterConfig;

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 应用环境变量覆盖
    ///
    /// 支持的变量：
    /// - `SSE_NODE_ID` / `SSE_NODE_HOST` / `SSE_NODE_PORT`
    /// - `SSE_REDIS_URL` / `SSE_REDIS_NAMESPACE`
    /// - `SSE_HEARTBEAT_INTERVAL_SECS` / `SSE_NODE_TIMEOUT_SECS` / `SSE_SWEEP_INTERVAL_SECS`
    /// - `SSE_PRESENCE_TTL_SECS`
    /// - `SSE_LOG_LEVEL`
    pub fn apply_env_overrides(config: &mut ClusterConfig) -> Result<()> {
        Self::apply_overrides(config, |name| env::var(name).ok())
    }

    /// 使用自定义变量来源应用覆盖
    pub fn apply_overrides<F>(config: &mut ClusterConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("SSE_NODE_ID") {
            config.node.id = id;
        }
        if let Some(host) = lookup("SSE_NODE_HOST") {
            config.node.host = host;
        }
        if let Some(port) = parse_var(&lookup, "SSE_NODE_PORT")? {
            config.node.port = port;
        }
        if let Some(url) = lookup("SSE_REDIS_URL") {
            config.redis.url = url;
        }
        if let Some(namespace) = lookup("SSE_REDIS_NAMESPACE") {
            config.redis.namespace = namespace;
        }
        if let Some(value) = parse_var(&lookup, "SSE_HEARTBEAT_INTERVAL_SECS")? {
            config.cluster.heartbeat_interval_secs = value;
        }
        if let Some(value) = parse_var(&lookup, "SSE_NODE_TIMEOUT_SECS")? {
            config.cluster.node_timeout_secs = value;
        }
        if let Some(value) = parse_var(&lookup, "SSE_SWEEP_INTERVAL_SECS")? {
            config.cluster.sweep_interval_secs = value;
        }
        if let Some(value) = parse_var(&lookup, "SSE_PRESENCE_TTL_SECS")? {
            config.cluster.presence_ttl_secs = value;
        }
        if let Some(level) = lookup("SSE_LOG_LEVEL") {
            config.logging.level = level;
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {}: {}", name, raw))
        })
        .transpose()
}
