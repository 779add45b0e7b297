//! Repository 実装
//!
//! ドメイン層の Repository trait を実装する。

pub mod inmemory;

pub use inmemory::{InMemoryStore, SeedData};
