//! WebSocket frame DTOs.
//!
//! Every frame is a JSON object `{ "action": ..., "data": ... }`. The same
//! `new_message` frame is the payload carried over pub/sub.

use serde::{Deserialize, Serialize};

use crate::domain::{ObjectId, RoomKey, RoomType};

/// Inbound frame; `data` is decoded per action
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub action: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Inbound actions understood by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundAction {
    JoinRoom,
    LeaveRoom,
    SendMessage,
    Ping,
}

impl InboundAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "join_room" => Some(Self::JoinRoom),
            "leave_room" => Some(Self::LeaveRoom),
            "send_message" => Some(Self::SendMessage),
            "ping" => Some(Self::Ping),
            _ => None,
        }
    }
}

/// `join_room` / `leave_room` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRequest {
    pub room_id: ObjectId,
    pub room_type: RoomType,
}

impl RoomRequest {
    pub fn room_key(&self) -> RoomKey {
        RoomKey::new(self.room_type, self.room_id)
    }
}

/// `send_message` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub room_id: ObjectId,
    pub room_type: RoomType,
    pub content: String,
}

/// Outbound actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerAction {
    RoomJoined,
    RoomLeft,
    NewMessage,
    MessageSent,
    Pong,
    Error,
}

/// Outbound frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFrame<T> {
    pub action: ServerAction,
    pub data: T,
}

impl<T> ServerFrame<T> {
    pub fn new(action: ServerAction, data: T) -> Self {
        Self { action, data }
    }
}

/// Message envelope: the unit published to `room:<key>` and delivered to
/// subscribers. `timestamp` is Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub room_type: RoomType,
    pub room_id: ObjectId,
    pub sender_id: ObjectId,
    pub content: String,
    pub timestamp: i64,
}

impl MessagePayload {
    pub fn room_key(&self) -> RoomKey {
        RoomKey::new(self.room_type, self.room_id)
    }

    /// `message_sent` for the sender's own connection, `new_message` otherwise
    pub fn action_for(&self, recipient: &ObjectId) -> ServerAction {
        if *recipient == self.sender_id {
            ServerAction::MessageSent
        } else {
            ServerAction::NewMessage
        }
    }
}

/// `room_joined` / `room_left` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: String,
    pub message: String,
}

impl StatusPayload {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongPayload {
    pub message: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub original_action: String,
    pub message: String,
}
