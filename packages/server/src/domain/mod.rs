//! Domain layer: entities, value objects and the ports implemented by
//! the infrastructure layer.

pub mod cache;
pub mod cache_keys;
pub mod entity;
pub mod error;
pub mod pubsub;
pub mod repository;
pub mod value_object;

pub use cache::Cache;
pub use entity::{Channel, DmRoom, Message, ServerMember, UserPresence};
pub use error::{CacheError, PubSubError, StoreError, ValueObjectError};
pub use pubsub::{PubSub, Subscription};
pub use repository::{MessageRepository, RoomRepository, UserRepository};
pub use value_object::{ObjectId, RoomKey, RoomType};

#[cfg(test)]
pub use cache::MockCache;
#[cfg(test)]
pub use repository::{MockMessageRepository, MockRoomRepository, MockUserRepository};
