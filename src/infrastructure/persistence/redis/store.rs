use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};

use crate::domain::repository::KvStore;

/// SCAN 每批返回的键数量提示
const SCAN_BATCH: usize = 200;

/// Redis 实现的共享键值存储
pub struct RedisKvStore {
    conn: ConnectionManager,
}

impl RedisKvStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// 连接 Redis，连接断开后由 `ConnectionManager` 自动重连
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to open redis connection")?;
        Ok(Self::new(conn))
    }

    fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

/// 转义 glob 通配符，使前缀按字面匹配
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('*');
    escaped
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection();
        conn.get(key)
            .await
            .with_context(|| format!("failed to get {key}"))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        let _: () = cmd
            .query_async(&mut conn)
            .await
            .with_context(|| format!("failed to set {key}"))?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection();
        conn.del(keys.to_vec())
            .await
            .context("failed to delete keys")
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection();
        redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("failed to expire {key}"))
    }

    async fn set_add(&self, set_key: &str, member: &str) -> Result<()> {
        let mut conn = self.connection();
        let _: i64 = conn
            .sadd(set_key, member)
            .await
            .with_context(|| format!("failed to add member to {set_key}"))?;
        Ok(())
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection();
        conn.smembers(set_key)
            .await
            .with_context(|| format!("failed to read members of {set_key}"))
    }

    async fn set_remove(&self, set_key: &str, member: &str) -> Result<()> {
        let mut conn = self.connection();
        let _: i64 = conn
            .srem(set_key, member)
            .await
            .with_context(|| format!("failed to remove member from {set_key}"))?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.connection();
        let pattern = escape_glob(prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        // 使用 SCAN 代替 KEYS，避免阻塞 Redis
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .with_context(|| format!("failed to scan keys with prefix {prefix}"))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("sse:presence:"), "sse:presence:*");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]*");
    }
}
