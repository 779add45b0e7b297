//! InMemory Repository 実装

mod seed;
mod store;

pub use seed::{ChannelSeed, DmRoomSeed, SeedData};
pub use store::InMemoryStore;
