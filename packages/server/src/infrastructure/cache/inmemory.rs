//! プロセス内 Cache 実装
//!
//! Redis の文字列と集合を HashMap で再現する。TTL は Clock 基準で判定し、
//! 期限切れのエントリは参照時に削除する。

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tsudoi_shared::time::{Clock, SystemClock};

use crate::domain::{Cache, CacheError};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

/// インメモリキャッシュ
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// TTL 判定に使う Clock を指定して作成
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn purge_expired(&self, entries: &mut HashMap<String, Entry>, key: &str) {
        let now = self.clock.now();
        if entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now)
        {
            entries.remove(key);
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::Unavailable(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().await;
        self.purge_expired(&mut entries, key);
        match entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Text(text)) => Ok(Some(text.clone())),
            Some(Value::Set(_)) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = match ttl {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|e| CacheError::Unavailable(format!("invalid ttl: {}", e)))?;
                Some(self.clock.now() + ttl)
            }
            None => None,
        };
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        self.purge_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            Value::Text(_) => Err(wrong_type(key)),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        self.purge_expired(&mut entries, key);
        let now_empty = match entries.get_mut(key).map(|e| &mut e.value) {
            None => return Ok(()),
            Some(Value::Set(members)) => {
                members.remove(member);
                members.is_empty()
            }
            Some(Value::Text(_)) => return Err(wrong_type(key)),
        };
        // Redis deletes empty sets
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let mut entries = self.entries.lock().await;
        self.purge_expired(&mut entries, key);
        match entries.get(key).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::Set(members)) => {
                let mut members: Vec<String> = members.iter().cloned().collect();
                members.sort();
                Ok(members)
            }
            Some(Value::Text(_)) => Err(wrong_type(key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsudoi_shared::time::ManualClock;

    #[tokio::test]
    async fn test_set_and_get_text() {
        // テスト項目: 文字列の書き込みと読み出し、削除
        // given (前提条件):
        let cache = InMemoryCache::new();

        // when (操作):
        cache.set("user:a:status", "online", None).await.unwrap();
        let before_delete = cache.get("user:a:status").await.unwrap();
        cache.delete("user:a:status").await.unwrap();
        let after_delete = cache.get("user:a:status").await.unwrap();

        // then (期待する結果):
        assert_eq!(before_delete.as_deref(), Some("online"));
        assert_eq!(after_delete, None);
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        // テスト項目: TTL を過ぎたエントリは読み出せない
        // given (前提条件):
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = InMemoryCache::with_clock(clock.clone());
        cache
            .set("throttle", "1", Some(Duration::from_secs(180)))
            .await
            .unwrap();

        // when (操作):
        clock.advance(Duration::from_secs(179));
        let within_ttl = cache.get("throttle").await.unwrap();
        clock.advance(Duration::from_secs(1));
        let after_ttl = cache.get("throttle").await.unwrap();

        // then (期待する結果):
        assert_eq!(within_ttl.as_deref(), Some("1"));
        assert_eq!(after_ttl, None);
    }

    #[tokio::test]
    async fn test_set_operations() {
        // テスト項目: 集合への追加・削除・列挙。空になった集合は消える
        // given (前提条件):
        let cache = InMemoryCache::new();

        // when (操作):
        cache.set_add("room:x:members", "b").await.unwrap();
        cache.set_add("room:x:members", "a").await.unwrap();
        cache.set_add("room:x:members", "a").await.unwrap();
        let members = cache.set_members("room:x:members").await.unwrap();
        cache.set_remove("room:x:members", "a").await.unwrap();
        cache.set_remove("room:x:members", "b").await.unwrap();
        let after_remove = cache.set_members("room:x:members").await.unwrap();

        // then (期待する結果):
        assert_eq!(members, vec!["a".to_string(), "b".to_string()]);
        assert!(after_remove.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        // テスト項目: 文字列キーへの集合操作はエラーになる
        // given (前提条件):
        let cache = InMemoryCache::new();
        cache.set("k", "v", None).await.unwrap();

        // when (操作):
        let result = cache.set_add("k", "m").await;

        // then (期待する結果):
        assert!(matches!(result, Err(CacheError::Unavailable(_))));
    }
}
