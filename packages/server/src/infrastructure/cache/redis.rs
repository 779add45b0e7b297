//! Redis Cache 実装

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::{
    domain::{Cache, CacheError},
    infrastructure::redis_call::redis_call,
};

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    /// Open a client for `redis://host:port/db`. No connection is made yet.
    pub fn open(url: &str) -> Result<Self, CacheError> {
        Ok(Self::new(redis::Client::open(url)?))
    }

    async fn connection(&self) -> redis::RedisResult<redis::aio::MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        redis_call(async {
            let mut conn = self.connection().await?;
            conn.get(key).await
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        redis_call(async {
            let mut conn = self.connection().await?;
            match ttl {
                // SETEX rejects 0
                Some(ttl) => conn.set_ex(key, value, ttl.as_secs().max(1)).await,
                None => conn.set(key, value).await,
            }
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        redis_call(async {
            let mut conn = self.connection().await?;
            conn.del(key).await
        })
        .await
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError> {
        redis_call(async {
            let mut conn = self.connection().await?;
            conn.sadd(key, member).await
        })
        .await
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError> {
        redis_call(async {
            let mut conn = self.connection().await?;
            conn.srem(key, member).await
        })
        .await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        redis_call(async {
            let mut conn = self.connection().await?;
            conn.smembers(key).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_invalid_url() {
        // テスト項目: 不正な URL ではクライアントを作成できない
        // given (前提条件):
        let url = "not a redis url";

        // when (操作):
        let result = RedisCache::open(url);

        // then (期待する結果):
        assert!(matches!(result, Err(CacheError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_degrades_to_cache_error() {
        // テスト項目: 接続できない Redis への操作は CacheError になる
        // given (前提条件):
        // port 1 is reserved and never serves redis
        let cache = RedisCache::open("redis://127.0.0.1:1/").unwrap();

        // when (操作):
        let result = cache.get("user:a:status").await;

        // then (期待する結果):
        assert!(matches!(result, Err(CacheError::Unavailable(_))));
    }
}
