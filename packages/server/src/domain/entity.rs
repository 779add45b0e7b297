//! Persisted entities consumed by the realtime core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_object::{ObjectId, RoomKey, RoomType};

/// A persisted chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: ObjectId,
    pub room_id: ObjectId,
    pub room_type: RoomType,
    pub sender_id: ObjectId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Create a new message addressed to `room`
    pub fn new(room: RoomKey, sender_id: ObjectId, content: String, at: DateTime<Utc>) -> Self {
        Self {
            id: ObjectId::new(),
            room_id: room.room_id,
            room_type: room.room_type,
            sender_id,
            content,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn room_key(&self) -> RoomKey {
        RoomKey::new(self.room_type, self.room_id)
    }
}

/// Direct-message membership record, one per (user_id, room_id) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmRoom {
    pub id: ObjectId,
    pub room_id: ObjectId,
    pub user_id: ObjectId,
    pub chat_with_user_id: ObjectId,
    pub is_hidden: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DmRoom {
    pub fn new(
        room_id: ObjectId,
        user_id: ObjectId,
        chat_with_user_id: ObjectId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ObjectId::new(),
            room_id,
            user_id,
            chat_with_user_id,
            is_hidden: false,
            created_at: at,
            updated_at: at,
        }
    }
}

/// A named room scoped to a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ObjectId,
    pub server_id: ObjectId,
    pub name: String,
    pub channel_type: String,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Channel {
    /// Create a text channel on `server_id`
    pub fn new(id: ObjectId, server_id: ObjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            server_id,
            name: name.into(),
            channel_type: "text".to_string(),
            last_message_at: None,
        }
    }
}

/// Membership of a user in a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerMember {
    pub server_id: ObjectId,
    pub user_id: ObjectId,
}

/// Presence fields persisted on the user document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPresence {
    pub user_id: ObjectId,
    pub is_online: bool,
    /// Unix seconds
    pub last_active_at: i64,
}
