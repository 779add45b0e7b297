//! InMemory ドキュメントストア実装
//!
//! ドメイン層が定義する MessageRepository / RoomRepository / UserRepository
//! trait の具体的な実装。HashMap / Vec をインメモリ DB として使用します。
//!
//! DmRoom の `(room_id, user_id)` 一意インデックスを再現し、
//! 重複した作成には `StoreError::DuplicateKey` を返します。

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::{
    Channel, DmRoom, Message, MessageRepository, ObjectId, RoomRepository, RoomType,
    ServerMember, StoreError, UserPresence, UserRepository,
};

#[derive(Debug, Default)]
struct StoreData {
    messages: Vec<Message>,
    dm_rooms: Vec<DmRoom>,
    channels: HashMap<ObjectId, Channel>,
    servers: HashSet<ObjectId>,
    server_members: HashSet<ServerMember>,
    users: HashMap<ObjectId, UserPresence>,
}

/// インメモリドキュメントストア
///
/// 3 つの Repository trait を 1 つの構造体で実装する（依存性の逆転）。
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<StoreData>,
}

impl InMemoryStore {
    /// 空のストアを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// サーバーを登録
    pub async fn insert_server(&self, server_id: ObjectId) {
        self.data.write().await.servers.insert(server_id);
    }

    /// サーバーメンバーを登録
    pub async fn add_server_member(&self, server_id: ObjectId, user_id: ObjectId) {
        self.data
            .write()
            .await
            .server_members
            .insert(ServerMember { server_id, user_id });
    }

    /// チャンネルを登録
    pub async fn insert_channel(&self, channel: Channel) {
        self.data.write().await.channels.insert(channel.id, channel);
    }

    /// ユーザーのプレゼンスを登録
    pub async fn insert_user(&self, presence: UserPresence) {
        self.data
            .write()
            .await
            .users
            .insert(presence.user_id, presence);
    }

    /// 保存済みメッセージ数
    pub async fn count_messages(&self) -> usize {
        self.data.read().await.messages.len()
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn insert_message(&self, message: Message) -> Result<Message, StoreError> {
        let mut data = self.data.write().await;
        if data.messages.iter().any(|m| m.id == message.id) {
            return Err(StoreError::DuplicateKey(format!("message {}", message.id)));
        }
        data.messages.push(message.clone());
        Ok(message)
    }

    async fn find_messages_by_room(
        &self,
        room_type: RoomType,
        room_id: &ObjectId,
    ) -> Result<Vec<Message>, StoreError> {
        let data = self.data.read().await;
        let mut messages: Vec<Message> = data
            .messages
            .iter()
            .filter(|m| m.room_type == room_type && m.room_id == *room_id)
            .cloned()
            .collect();
        // stable: insertion order breaks ties
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }
}

#[async_trait]
impl RoomRepository for InMemoryStore {
    async fn find_dm_rooms(&self, room_id: &ObjectId) -> Result<Vec<DmRoom>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .dm_rooms
            .iter()
            .filter(|r| r.room_id == *room_id)
            .cloned()
            .collect())
    }

    async fn find_dm_room(
        &self,
        room_id: &ObjectId,
        user_id: &ObjectId,
    ) -> Result<Option<DmRoom>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .dm_rooms
            .iter()
            .find(|r| r.room_id == *room_id && r.user_id == *user_id)
            .cloned())
    }

    async fn create_dm_room(&self, dm_room: DmRoom) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        let duplicated = data
            .dm_rooms
            .iter()
            .any(|r| r.room_id == dm_room.room_id && r.user_id == dm_room.user_id);
        if duplicated {
            return Err(StoreError::DuplicateKey(format!(
                "dm_rooms (room_id: {}, user_id: {})",
                dm_room.room_id, dm_room.user_id
            )));
        }
        data.dm_rooms.push(dm_room);
        Ok(())
    }

    async fn touch_dm_rooms(&self, room_id: &ObjectId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        for room in data.dm_rooms.iter_mut().filter(|r| r.room_id == *room_id) {
            room.updated_at = at;
        }
        Ok(())
    }

    async fn find_channel(&self, channel_id: &ObjectId) -> Result<Option<Channel>, StoreError> {
        Ok(self.data.read().await.channels.get(channel_id).cloned())
    }

    async fn touch_channel(&self, channel_id: &ObjectId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        let channel = data.channels.get_mut(channel_id).ok_or(StoreError::NotFound)?;
        channel.last_message_at = Some(at);
        Ok(())
    }

    async fn server_exists(&self, server_id: &ObjectId) -> Result<bool, StoreError> {
        Ok(self.data.read().await.servers.contains(server_id))
    }

    async fn is_server_member(
        &self,
        server_id: &ObjectId,
        user_id: &ObjectId,
    ) -> Result<bool, StoreError> {
        Ok(self.data.read().await.server_members.contains(&ServerMember {
            server_id: *server_id,
            user_id: *user_id,
        }))
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn set_online_status(
        &self,
        user_id: &ObjectId,
        is_online: bool,
        last_active_at: i64,
    ) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        data.users.insert(
            *user_id,
            UserPresence {
                user_id: *user_id,
                is_online,
                last_active_at,
            },
        );
        Ok(())
    }

    async fn update_user_activity(
        &self,
        user_id: &ObjectId,
        last_active_at: i64,
    ) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        data.users
            .entry(*user_id)
            .and_modify(|p| p.last_active_at = last_active_at)
            .or_insert(UserPresence {
                user_id: *user_id,
                is_online: false,
                last_active_at,
            });
        Ok(())
    }

    async fn mark_stale_users_offline(&self, cutoff: i64) -> Result<u64, StoreError> {
        let mut data = self.data.write().await;
        let mut updated = 0;
        for presence in data
            .users
            .values_mut()
            .filter(|p| p.is_online && p.last_active_at < cutoff)
        {
            presence.is_online = false;
            updated += 1;
        }
        Ok(updated)
    }

    async fn find_presence(&self, user_id: &ObjectId) -> Result<Option<UserPresence>, StoreError> {
        Ok(self.data.read().await.users.get(user_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RoomKey;
    use std::sync::Arc;
    use tsudoi_shared::time::millis_to_datetime;

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - InMemoryStore の各 Repository 操作
    // - DmRoom の (room_id, user_id) 一意インデックス
    // - プレゼンスの一括オフライン化
    //
    // 【なぜこのテストが必要か】
    // - DM ブートストラップは一意インデックスによる重複排除に依存している
    // - UseCase 層が Repository に依存できるよう、信頼性を担保する
    //
    // 【どのようなシナリオをテストするか】
    // 1. メッセージ保存と作成日時順の取得
    // 2. DmRoom の重複作成（エラーケース）と並行作成
    // 3. チャンネル・サーバーメンバーシップの参照
    // 4. 古いオンラインユーザーのみオフラインにする
    // ========================================

    fn id(hex_char: char) -> ObjectId {
        ObjectId::parse_str(&hex_char.to_string().repeat(24)).unwrap()
    }

    #[tokio::test]
    async fn test_messages_are_returned_in_creation_order() {
        // テスト項目: ルームのメッセージが作成日時の昇順で返される
        // given (前提条件):
        let store = InMemoryStore::new();
        let room = RoomKey::new(RoomType::Channel, id('c'));
        let later = Message::new(room, id('a'), "second".to_string(), millis_to_datetime(2_000));
        let earlier = Message::new(room, id('b'), "first".to_string(), millis_to_datetime(1_000));
        let other_room = Message::new(
            RoomKey::new(RoomType::Dm, id('c')),
            id('a'),
            "dm".to_string(),
            millis_to_datetime(1_500),
        );

        // when (操作):
        store.insert_message(later).await.unwrap();
        store.insert_message(earlier).await.unwrap();
        store.insert_message(other_room).await.unwrap();
        let messages = store
            .find_messages_by_room(RoomType::Channel, &id('c'))
            .await
            .unwrap();

        // then (期待する結果):
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
        assert_eq!(store.count_messages().await, 3);
    }

    #[tokio::test]
    async fn test_create_dm_room_rejects_duplicate() {
        // テスト項目: 同じ (room_id, user_id) の DmRoom は重複作成できない
        // given (前提条件):
        let store = InMemoryStore::new();
        let now = millis_to_datetime(1_000);
        store
            .create_dm_room(DmRoom::new(id('d'), id('a'), id('b'), now))
            .await
            .unwrap();

        // when (操作):
        let result = store
            .create_dm_room(DmRoom::new(id('d'), id('a'), id('b'), now))
            .await;

        // then (期待する結果):
        assert!(matches!(result, Err(StoreError::DuplicateKey(_))));
        assert_eq!(store.find_dm_rooms(&id('d')).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_dm_room_creation_keeps_one_record() {
        // テスト項目: 並行して同じ DmRoom を作成しても 1 件だけ保存される
        // given (前提条件):
        let store = Arc::new(InMemoryStore::new());
        let now = millis_to_datetime(1_000);

        // when (操作):
        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_dm_room(DmRoom::new(id('d'), id('a'), id('b'), now))
                    .await
            }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }

        // then (期待する結果):
        assert_eq!(successes, 1);
        assert_eq!(store.find_dm_rooms(&id('d')).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_touch_dm_rooms_updates_every_record() {
        // テスト項目: room_id に属する全ての DmRoom の updated_at が更新される
        // given (前提条件):
        let store = InMemoryStore::new();
        let created = millis_to_datetime(1_000);
        let touched = millis_to_datetime(5_000);
        store
            .create_dm_room(DmRoom::new(id('d'), id('a'), id('b'), created))
            .await
            .unwrap();
        store
            .create_dm_room(DmRoom::new(id('d'), id('b'), id('a'), created))
            .await
            .unwrap();

        // when (操作):
        store.touch_dm_rooms(&id('d'), touched).await.unwrap();

        // then (期待する結果):
        let rooms = store.find_dm_rooms(&id('d')).await.unwrap();
        assert!(rooms.iter().all(|r| r.updated_at == touched));
    }

    #[tokio::test]
    async fn test_channel_and_membership_lookup() {
        // テスト項目: チャンネル・サーバー・メンバーシップが参照できる
        // given (前提条件):
        let store = InMemoryStore::new();
        store.insert_server(id('e')).await;
        store.add_server_member(id('e'), id('a')).await;
        store.insert_channel(Channel::new(id('c'), id('e'), "general")).await;

        // when (操作):
        let channel = store.find_channel(&id('c')).await.unwrap();
        let member = store.is_server_member(&id('e'), &id('a')).await.unwrap();
        let stranger = store.is_server_member(&id('e'), &id('b')).await.unwrap();
        store
            .touch_channel(&id('c'), millis_to_datetime(9_000))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(channel.map(|c| c.server_id), Some(id('e')));
        assert!(store.server_exists(&id('e')).await.unwrap());
        assert!(member);
        assert!(!stranger);
        assert_eq!(
            store.find_channel(&id('c')).await.unwrap().unwrap().last_message_at,
            Some(millis_to_datetime(9_000))
        );
    }

    #[tokio::test]
    async fn test_mark_stale_users_offline() {
        // テスト項目: cutoff より古いオンラインユーザーだけがオフラインになる
        // given (前提条件):
        let store = InMemoryStore::new();
        store.set_online_status(&id('a'), true, 100).await.unwrap();
        store.set_online_status(&id('b'), true, 1_000).await.unwrap();
        store.set_online_status(&id('c'), false, 100).await.unwrap();

        // when (操作):
        let updated = store.mark_stale_users_offline(500).await.unwrap();

        // then (期待する結果):
        assert_eq!(updated, 1);
        assert!(!store.find_presence(&id('a')).await.unwrap().unwrap().is_online);
        assert!(store.find_presence(&id('b')).await.unwrap().unwrap().is_online);
    }

    #[tokio::test]
    async fn test_update_user_activity_keeps_online_flag() {
        // テスト項目: アクティビティ更新は is_online を変更しない
        // given (前提条件):
        let store = InMemoryStore::new();
        store.set_online_status(&id('a'), true, 100).await.unwrap();

        // when (操作):
        store.update_user_activity(&id('a'), 200).await.unwrap();

        // then (期待する結果):
        let presence = store.find_presence(&id('a')).await.unwrap().unwrap();
        assert!(presence.is_online);
        assert_eq!(presence.last_active_at, 200);
    }
}
