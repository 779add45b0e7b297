//! UseCase layer: connection registry, room fan-out, message pipeline.

pub mod activity;
pub mod client;
pub mod connection_registry;
pub mod dm_bootstrap;
pub mod error;
pub mod message_handler;
pub mod presence;
pub mod room_manager;
pub mod runtime;

pub use activity::ActivityThrottle;
pub use client::{Client, OutboundFrame, PONG_WAIT, SEND_QUEUE_CAPACITY};
pub use connection_registry::{ConnectionRegistry, HEALTH_CHECK_INTERVAL, REGISTRY_QUEUE_CAPACITY};
pub use dm_bootstrap::{BootstrapOutcome, DmRoomBootstrap};
pub use error::{RegistryError, RoomError, SendError, SendMessageError};
pub use message_handler::MessageHandler;
pub use presence::{PresenceReconciler, PresenceService};
pub use room_manager::{ROOM_BROADCAST_CAPACITY, Room, RoomManager, RoomSnapshot};
pub use runtime::{spawn_supervised, store_call};
