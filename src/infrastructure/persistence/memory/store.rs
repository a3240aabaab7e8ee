use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::repository::KvStore;
use crate::utils::Clock;

enum Value {
    Text(String),
    Set(BTreeSet<String>),
}

struct Entry {
    value: Value,
    /// 过期时间（毫秒时间戳），为空表示不过期
    expires_at: Option<i64>,
}

impl Entry {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// 内存键值存储
///
/// 过期基于注入的时钟判断，读取时惰性清除，测试中可配合 `ManualClock` 精确控制 TTL。
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryKvStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn deadline(&self, ttl: Duration) -> i64 {
        self.clock.now_millis() + ttl.as_millis() as i64
    }

    /// 读取前清除已过期的键
    async fn purge_expired(&self, key: &str) {
        let now = self.clock.now_millis();
        let expired = {
            let entries = self.entries.read().await;
            entries.get(key).is_some_and(|entry| entry.is_expired(now))
        };
        if expired {
            let mut entries = self.entries.write().await;
            if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
                entries.remove(key);
            }
        }
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.purge_expired(key).await;
        let entries = self.entries.read().await;
        match entries.get(key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::Text(text)) => Ok(Some(text.clone())),
            Some(Value::Set(_)) => bail!("WRONGTYPE key {key} holds a set"),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| self.deadline(ttl));
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.write().await;
        let mut deleted = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key) {
                if !entry.is_expired(now) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.purge_expired(key).await;
        let deadline = self.deadline(ttl);
        let mut entries = self.entries.write().await;
        Ok(match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(deadline);
                true
            }
            None => false,
        })
    }

    async fn set_add(&self, set_key: &str, member: &str) -> Result<()> {
        self.purge_expired(set_key).await;
        let mut entries = self.entries.write().await;
        let entry = entries.entry(set_key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(BTreeSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            Value::Text(_) => bail!("WRONGTYPE key {set_key} holds a string"),
        }
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>> {
        self.purge_expired(set_key).await;
        let entries = self.entries.read().await;
        match entries.get(set_key).map(|entry| &entry.value) {
            None => Ok(Vec::new()),
            Some(Value::Set(members)) => Ok(members.iter().cloned().collect()),
            Some(Value::Text(_)) => bail!("WRONGTYPE key {set_key} holds a string"),
        }
    }

    async fn set_remove(&self, set_key: &str, member: &str) -> Result<()> {
        self.purge_expired(set_key).await;
        let mut entries = self.entries.write().await;
        let now_empty = match entries.get_mut(set_key).map(|entry| &mut entry.value) {
            None => return Ok(()),
            Some(Value::Set(members)) => {
                members.remove(member);
                members.is_empty()
            }
            Some(Value::Text(_)) => bail!("WRONGTYPE key {set_key} holds a string"),
        };
        // 与 Redis 一致：空集合即删除
        if now_empty {
            entries.remove(set_key);
        }
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = self.clock.now_millis();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
