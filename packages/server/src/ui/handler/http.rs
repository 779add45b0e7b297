//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    domain::{ObjectId, RoomType},
    infrastructure::dto::http::{MessageDto, RoomSummaryDto},
    ui::state::AppState,
    usecase::store_call,
};

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Active rooms on this node
pub async fn get_rooms(State(state): State<Arc<AppState>>) -> Json<Vec<RoomSummaryDto>> {
    let rooms = state.room_manager.active_rooms().await;

    // Domain Model から DTO への変換
    let summaries = rooms
        .into_iter()
        .map(|room| RoomSummaryDto {
            key: room.key.to_string(),
            room_type: room.key.room_type.to_string(),
            room_id: room.key.room_id.to_hex(),
            clients: room.clients,
        })
        .collect();

    Json(summaries)
}

/// Persisted messages of a room, oldest first
pub async fn get_room_messages(
    State(state): State<Arc<AppState>>,
    Path((room_type, room_id)): Path<(String, String)>,
) -> Result<Json<Vec<MessageDto>>, StatusCode> {
    let room_type: RoomType = room_type.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let room_id = ObjectId::parse_str(&room_id).map_err(|_| StatusCode::BAD_REQUEST)?;

    let repository = &state.message_repository;
    match store_call(|| repository.find_messages_by_room(room_type, &room_id)).await {
        Ok(messages) => Ok(Json(messages.into_iter().map(MessageDto::from).collect())),
        Err(e) => {
            tracing::error!(room_id = %room_id, "Failed to load messages: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
