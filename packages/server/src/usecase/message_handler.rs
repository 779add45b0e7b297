//! UseCase: メッセージ送信処理
//!
//! 1. メッセージを永続化（失敗したらファンアウトしない）
//! 2. ルームの最終更新日時を更新（失敗はログのみ）
//! 3. `room:<key>` に publish（失敗したら 1 回再試行し、それでも失敗したら
//!    ローカル配信キューにフォールバック）
//!
//! 受信者ごとのラベル（`message_sent` / `new_message`）は配信時に付ける。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - MessageHandler::handle_message() メソッド
//!
//! ### なぜこのテストが必要か
//! - 永続化に失敗したメッセージが配信されないことを保証する
//! - pub/sub 障害時にもローカルのクライアントには届くことを保証する
//!
//! ### どのような状況を想定しているか
//! - 正常系：永続化・最終更新日時の更新・publish
//! - 異常系：永続化失敗、publish 失敗（フォールバック）
//! - エッジケース：最終更新日時の更新失敗（送信自体は成功）

use std::sync::Arc;

use tsudoi_shared::time::Clock;

use crate::{
    domain::{Message, MessageRepository, PubSub, RoomRepository, RoomType},
    infrastructure::dto::websocket::{MessagePayload, ServerAction, ServerFrame},
};

use super::{error::SendMessageError, room_manager::RoomManager, runtime::store_call};

/// メッセージ送信のユースケース
pub struct MessageHandler {
    message_repository: Arc<dyn MessageRepository>,
    room_repository: Arc<dyn RoomRepository>,
    pubsub: Arc<dyn PubSub>,
    room_manager: Arc<RoomManager>,
    clock: Arc<dyn Clock>,
}

impl MessageHandler {
    /// 新しい MessageHandler を作成
    pub fn new(
        message_repository: Arc<dyn MessageRepository>,
        room_repository: Arc<dyn RoomRepository>,
        pubsub: Arc<dyn PubSub>,
        room_manager: Arc<RoomManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            message_repository,
            room_repository,
            pubsub,
            room_manager,
            clock,
        }
    }

    /// メッセージ送信を実行
    ///
    /// # Arguments
    ///
    /// * `envelope` - 送信するメッセージ（ルーム・送信者・本文）。`timestamp` は
    ///   永続化時刻で上書きされる
    ///
    /// # Returns
    ///
    /// * `Ok(Message)` - 永続化されたメッセージ
    /// * `Err(SendMessageError)` - 永続化失敗（配信は行われない）
    pub async fn handle_message(
        &self,
        envelope: MessagePayload,
    ) -> Result<Message, SendMessageError> {
        let key = envelope.room_key();
        let now = self.clock.now();

        // 1. 永続化
        let message = Message::new(key, envelope.sender_id, envelope.content, now);
        let repository = &self.message_repository;
        let message = store_call(|| repository.insert_message(message.clone()))
            .await
            .map_err(|e| {
                tracing::error!(room = %key, "Failed to persist message: {}", e);
                SendMessageError::PersistFailed(e)
            })?;

        // 2. ルームの最終更新日時
        let rooms = &self.room_repository;
        let touched = match key.room_type {
            RoomType::Dm => store_call(|| rooms.touch_dm_rooms(&key.room_id, now)).await,
            RoomType::Channel => store_call(|| rooms.touch_channel(&key.room_id, now)).await,
        };
        if let Err(e) = touched {
            tracing::warn!(room = %key, "Failed to update room recency: {}", e);
        }

        // 3. publish
        let envelope = MessagePayload::from(&message);
        let payload = serde_json::to_string(&ServerFrame::new(ServerAction::NewMessage, &envelope))
            .map_err(|e| SendMessageError::Encode(e.to_string()))?;
        self.publish_or_fallback(envelope, &payload).await;

        tracing::debug!(room = %key, message_id = %message.id, "Message handled");
        Ok(message)
    }

    async fn publish_or_fallback(&self, envelope: MessagePayload, payload: &str) {
        let key = envelope.room_key();
        let channel = key.pubsub_channel();

        let first = self.pubsub.publish(&channel, payload).await;
        let Err(first_error) = first else {
            return;
        };
        tracing::warn!(room = %key, "Publish failed, retrying once: {}", first_error);
        let Err(second_error) = self.pubsub.publish(&channel, payload).await else {
            return;
        };

        tracing::warn!(
            room = %key,
            "Publish failed twice, falling back to local delivery: {}",
            second_error
        );
        if let Err(e) = self.room_manager.enqueue_local(envelope).await {
            tracing::warn!(room = %key, "Local fallback delivery dropped: {}", e);
        }
    }
}
