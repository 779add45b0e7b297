//! PubSub 実装
//!
//! - `inmemory`: プロセス内ブローカー（単一ノード / テスト用）
//! - `redis`: Redis PUBLISH / SUBSCRIBE（ノード間ファンアウト）

mod inmemory;
mod redis;

pub use self::inmemory::InMemoryPubSub;
pub use self::redis::RedisPubSub;

/// Buffered payloads per subscription before the broker starts dropping
pub const SUBSCRIPTION_BUFFER: usize = 1024;
