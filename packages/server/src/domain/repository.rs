//! Repository trait 定義
//!
//! ドメイン層が必要とするドキュメントストアへのインターフェースを定義します。
//! 具体的な実装は Infrastructure 層が提供します（依存性の逆転）。
//!
//! 時刻は呼び出し側（UseCase 層の Clock）が決めて渡します。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Channel, DmRoom, Message, ObjectId, RoomType, StoreError, UserPresence};

/// Message Repository trait
///
/// メッセージの永続化と履歴取得を担当する。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// メッセージを保存し、保存したメッセージを返す
    async fn insert_message(&self, message: Message) -> Result<Message, StoreError>;

    /// ルームのメッセージを作成日時の昇順で取得
    async fn find_messages_by_room(
        &self,
        room_type: RoomType,
        room_id: &ObjectId,
    ) -> Result<Vec<Message>, StoreError>;
}

/// Room Repository trait
///
/// DM ルームのメンバーシップ、チャンネル、サーバーメンバーシップを扱う。
///
/// ## 一意性制約
///
/// - DmRoom は `(room_id, user_id)` で一意
/// - 重複した作成は `StoreError::DuplicateKey` を返す
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// room_id に属する DmRoom レコードを全て取得（最大 2 件）
    async fn find_dm_rooms(&self, room_id: &ObjectId) -> Result<Vec<DmRoom>, StoreError>;

    /// `(room_id, user_id)` の DmRoom レコードを取得
    async fn find_dm_room(
        &self,
        room_id: &ObjectId,
        user_id: &ObjectId,
    ) -> Result<Option<DmRoom>, StoreError>;

    /// DmRoom レコードを作成
    async fn create_dm_room(&self, dm_room: DmRoom) -> Result<(), StoreError>;

    /// room_id に属する全 DmRoom の updated_at を更新
    async fn touch_dm_rooms(&self, room_id: &ObjectId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// チャンネルを取得
    async fn find_channel(&self, channel_id: &ObjectId) -> Result<Option<Channel>, StoreError>;

    /// チャンネルの last_message_at を更新
    async fn touch_channel(&self, channel_id: &ObjectId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// サーバーが存在するか
    async fn server_exists(&self, server_id: &ObjectId) -> Result<bool, StoreError>;

    /// ユーザーがサーバーのメンバーか
    async fn is_server_member(
        &self,
        server_id: &ObjectId,
        user_id: &ObjectId,
    ) -> Result<bool, StoreError>;
}

/// User Repository trait
///
/// ユーザードキュメントのプレゼンス関連フィールドのみを扱う。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// is_online と last_active_at（Unix 秒）を更新
    async fn set_online_status(
        &self,
        user_id: &ObjectId,
        is_online: bool,
        last_active_at: i64,
    ) -> Result<(), StoreError>;

    /// last_active_at（Unix 秒）のみを更新
    async fn update_user_activity(
        &self,
        user_id: &ObjectId,
        last_active_at: i64,
    ) -> Result<(), StoreError>;

    /// last_active_at が cutoff（Unix 秒）より古いオンラインユーザーをオフラインにする
    ///
    /// # Returns
    ///
    /// オフラインにしたユーザー数
    async fn mark_stale_users_offline(&self, cutoff: i64) -> Result<u64, StoreError>;

    /// プレゼンスを取得
    async fn find_presence(&self, user_id: &ObjectId) -> Result<Option<UserPresence>, StoreError>;
}
