//! Cache 実装
//!
//! - `inmemory`: プロセス内キャッシュ（単一ノード / テスト用）
//! - `redis`: Redis キャッシュ（複数ノードで共有）

mod inmemory;
mod redis;

pub use self::inmemory::InMemoryCache;
pub use self::redis::RedisCache;
