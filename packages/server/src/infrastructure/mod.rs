//! Infrastructure layer: implementations of the domain ports and wire DTOs.

pub mod cache;
pub mod dto;
pub mod pubsub;
mod redis_call;
pub mod repository;

pub use redis_call::REDIS_CALL_TIMEOUT;
