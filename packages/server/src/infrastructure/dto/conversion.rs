//! Conversion logic between DTOs and domain entities.

use crate::domain::entity;
use crate::infrastructure::dto::{http, websocket};

// ========================================
// Domain Entity → DTO
// ========================================

impl From<&entity::Message> for websocket::MessagePayload {
    fn from(model: &entity::Message) -> Self {
        Self {
            room_type: model.room_type,
            room_id: model.room_id,
            sender_id: model.sender_id,
            content: model.content.clone(),
            timestamp: model.created_at.timestamp_millis(),
        }
    }
}

impl From<entity::Message> for http::MessageDto {
    fn from(model: entity::Message) -> Self {
        Self {
            id: model.id.to_hex(),
            room_id: model.room_id.to_hex(),
            room_type: model.room_type.to_string(),
            sender_id: model.sender_id.to_hex(),
            content: model.content,
            created_at: model.created_at.to_rfc3339(),
        }
    }
}
