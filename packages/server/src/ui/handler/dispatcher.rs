//! Inbound action dispatch.
//!
//! Frames of one connection are dispatched sequentially by its read pump.
//! Every failure is answered with an `error` frame carrying the original
//! action name.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tsudoi_shared::time::Clock;

use crate::{
    domain::{ObjectId, RoomKey, RoomType},
    infrastructure::dto::websocket::{
        InboundAction, InboundFrame, MessagePayload, PongPayload, RoomRequest,
        SendMessageRequest, ServerAction, ServerFrame, StatusPayload,
    },
    usecase::{Client, DmRoomBootstrap, MessageHandler, RoomError, RoomManager, SendMessageError},
};

/// `original_action` used when the frame itself could not be parsed
const UNPARSED_ACTION: &str = "unknown";

/// Dispatch failures, each mapped to a client-facing message
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("user is not allowed to join this room")]
    NotAllowed,

    #[error("room not found")]
    RoomNotFound,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),
}

impl DispatchError {
    /// `message` of the `error` frame sent back to the client
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::InvalidFrame(_) => "invalid data",
            Self::NotAllowed => "not allowed",
            Self::RoomNotFound => "room not found",
            Self::Internal(_) => "internal error",
            Self::UnknownAction(_) => "unknown action",
        }
    }
}

impl From<RoomError> for DispatchError {
    fn from(e: RoomError) -> Self {
        match e {
            RoomError::Unauthorized => Self::NotAllowed,
            RoomError::RoomNotFound => Self::RoomNotFound,
            RoomError::BroadcastQueueFull | RoomError::Store(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<SendMessageError> for DispatchError {
    fn from(e: SendMessageError) -> Self {
        Self::Internal(e.to_string())
    }
}

fn decode<T: DeserializeOwned>(data: serde_json::Value) -> Result<T, DispatchError> {
    serde_json::from_value(data).map_err(|e| DispatchError::InvalidFrame(e.to_string()))
}

/// Routes inbound frames to the room manager and message handler
pub struct ActionDispatcher {
    room_manager: Arc<RoomManager>,
    message_handler: Arc<MessageHandler>,
    dm_bootstrap: Arc<DmRoomBootstrap>,
    clock: Arc<dyn Clock>,
}

impl ActionDispatcher {
    pub fn new(
        room_manager: Arc<RoomManager>,
        message_handler: Arc<MessageHandler>,
        dm_bootstrap: Arc<DmRoomBootstrap>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            room_manager,
            message_handler,
            dm_bootstrap,
            clock,
        }
    }

    /// 1 フレームを処理する。失敗は error フレームで返す
    pub async fn dispatch(&self, client: &Arc<Client>, text: &str) {
        let frame: InboundFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(user_id = %client.user_id(), "Unparseable frame: {}", e);
                client.send_error(UNPARSED_ACTION, DispatchError::InvalidFrame(e.to_string()).client_message());
                return;
            }
        };
        tracing::debug!(user_id = %client.user_id(), action = %frame.action, "Dispatching frame");

        let result = match InboundAction::parse(&frame.action) {
            Some(InboundAction::JoinRoom) => self.join_room(client, frame.data).await,
            Some(InboundAction::LeaveRoom) => self.leave_room(client, frame.data).await,
            Some(InboundAction::SendMessage) => self.send_message(client, frame.data).await,
            Some(InboundAction::Ping) => {
                self.ping(client);
                Ok(())
            }
            None => Err(DispatchError::UnknownAction(frame.action.clone())),
        };

        if let Err(e) = result {
            match &e {
                DispatchError::Internal(_) => {
                    tracing::error!(user_id = %client.user_id(), action = %frame.action, "{}", e)
                }
                _ => tracing::debug!(user_id = %client.user_id(), action = %frame.action, "{}", e),
            }
            client.send_error(&frame.action, e.client_message());
        }
    }

    async fn join_room(
        &self,
        client: &Arc<Client>,
        data: serde_json::Value,
    ) -> Result<(), DispatchError> {
        let key = decode::<RoomRequest>(data)?.room_key();
        self.room_manager
            .authorize_join(&client.user_id(), key)
            .await?;
        self.room_manager.enter_room(client, key).await?;

        reply(
            client,
            ServerAction::RoomJoined,
            StatusPayload::success(format!("Joined {} room {}", key.room_type, key.room_id)),
        );
        Ok(())
    }

    async fn leave_room(
        &self,
        client: &Arc<Client>,
        data: serde_json::Value,
    ) -> Result<(), DispatchError> {
        let key = decode::<RoomRequest>(data)?.room_key();
        self.room_manager.leave_room(client, key).await;

        reply(
            client,
            ServerAction::RoomLeft,
            StatusPayload::success(format!("Left {} room {}", key.room_type, key.room_id)),
        );
        Ok(())
    }

    async fn send_message(
        &self,
        client: &Arc<Client>,
        data: serde_json::Value,
    ) -> Result<(), DispatchError> {
        let request: SendMessageRequest = decode(data)?;
        let key = RoomKey::new(request.room_type, request.room_id);
        let sender_id = client.user_id();

        if key.room_type == RoomType::Dm {
            self.bootstrap_dm(&key.room_id, &sender_id).await;
        }

        self.room_manager.init_room(key).await;
        let envelope = MessagePayload {
            room_type: key.room_type,
            room_id: key.room_id,
            sender_id,
            content: request.content,
            timestamp: self.clock.now_millis(),
        };
        let result = self.message_handler.handle_message(envelope).await;

        // sending without joining leaves an empty room behind
        if let Some(room) = self.room_manager.get_room(&key).await
            && room.client_count().await == 0
        {
            self.room_manager.cleanup_room(&key).await;
        }

        result?;
        Ok(())
    }

    async fn bootstrap_dm(&self, room_id: &ObjectId, user_id: &ObjectId) {
        match self.dm_bootstrap.ensure(room_id, user_id).await {
            Ok(outcome) => {
                tracing::debug!(room_id = %room_id, user_id = %user_id, ?outcome, "DM bootstrap")
            }
            Err(e) => tracing::warn!(room_id = %room_id, user_id = %user_id, "DM bootstrap failed: {}", e),
        }
    }

    fn ping(&self, client: &Arc<Client>) {
        reply(
            client,
            ServerAction::Pong,
            PongPayload {
                message: "pong".to_string(),
                timestamp: self.clock.now_millis(),
            },
        );
    }
}

fn reply<T: serde::Serialize>(client: &Client, action: ServerAction, data: T) {
    if let Err(e) = client.send_message(&ServerFrame::new(action, data)) {
        tracing::warn!(user_id = %client.user_id(), "Failed to reply {:?}: {}", action, e);
    }
}
