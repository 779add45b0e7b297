//! Cache port.
//!
//! Key-value store with TTL and set operations. The cache is never
//! authoritative: callers log `CacheError` and fall back to the store.

use std::time::Duration;

use async_trait::async_trait;

use super::CacheError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Write a string value; `None` keeps it until deleted
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError>;
}
