//! HTTP API response DTOs.

use serde::{Deserialize, Serialize};

/// Active room on this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummaryDto {
    pub key: String,
    pub room_type: String,
    pub room_id: String,
    pub clients: usize,
}

/// Persisted message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: String,
    pub room_id: String,
    pub room_type: String,
    pub sender_id: String,
    pub content: String,
    /// RFC 3339
    pub created_at: String,
}
