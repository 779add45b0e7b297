//! 起動時に投入するシードデータ
//!
//! インメモリストアは空で起動するため、サーバー・メンバー・チャンネル・
//! DM ルームを JSON ファイルから読み込めるようにする。
//!
//! ```json
//! {
//!   "servers": ["5f0c...", "..."],
//!   "members": [{"server_id": "5f0c...", "user_id": "64a1..."}],
//!   "channels": [{"id": "64b2...", "server_id": "5f0c...", "name": "general"}],
//!   "dm_rooms": [{"room_id": "64c3...", "user_id": "64a1...", "chat_with_user_id": "64a2..."}]
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::{Channel, DmRoom, ObjectId, RoomRepository, ServerMember, StoreError};

use super::store::InMemoryStore;

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSeed {
    pub id: ObjectId,
    pub server_id: ObjectId,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DmRoomSeed {
    pub room_id: ObjectId,
    pub user_id: ObjectId,
    pub chat_with_user_id: ObjectId,
}

/// Seed file contents; every section is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeedData {
    pub servers: Vec<ObjectId>,
    pub members: Vec<ServerMember>,
    pub channels: Vec<ChannelSeed>,
    pub dm_rooms: Vec<DmRoomSeed>,
}

impl SeedData {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl InMemoryStore {
    /// シードデータを投入する
    ///
    /// 重複した DM ルームのレコードは無視する。
    pub async fn load_seed(&self, seed: SeedData, now: DateTime<Utc>) -> Result<(), StoreError> {
        for server_id in seed.servers {
            self.insert_server(server_id).await;
        }
        for member in seed.members {
            self.add_server_member(member.server_id, member.user_id).await;
        }
        for channel in seed.channels {
            self.insert_channel(Channel::new(channel.id, channel.server_id, channel.name))
                .await;
        }
        for dm in seed.dm_rooms {
            let record = DmRoom::new(dm.room_id, dm.user_id, dm.chat_with_user_id, now);
            match self.create_dm_room(record).await {
                Ok(()) | Err(StoreError::DuplicateKey(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsudoi_shared::time::millis_to_datetime;

    #[tokio::test]
    async fn test_load_seed() {
        // テスト項目: シードの各セクションがストアに反映される
        // given (前提条件):
        let json = r#"{
            "servers": ["555555555555555555555555"],
            "members": [{"server_id": "555555555555555555555555", "user_id": "aaaaaaaaaaaaaaaaaaaaaaaa"}],
            "channels": [{"id": "cccccccccccccccccccccccc", "server_id": "555555555555555555555555", "name": "general"}],
            "dm_rooms": [
                {"room_id": "dddddddddddddddddddddddd", "user_id": "aaaaaaaaaaaaaaaaaaaaaaaa", "chat_with_user_id": "bbbbbbbbbbbbbbbbbbbbbbbb"},
                {"room_id": "dddddddddddddddddddddddd", "user_id": "aaaaaaaaaaaaaaaaaaaaaaaa", "chat_with_user_id": "bbbbbbbbbbbbbbbbbbbbbbbb"}
            ]
        }"#;
        let store = InMemoryStore::new();
        let id = |s: &str| ObjectId::parse_str(s).unwrap();

        // when (操作):
        store
            .load_seed(
                SeedData::from_json(json).unwrap(),
                millis_to_datetime(1_700_000_000_000),
            )
            .await
            .unwrap();

        // then (期待する結果):
        let server = id("555555555555555555555555");
        assert!(store.server_exists(&server).await.unwrap());
        assert!(
            store
                .is_server_member(&server, &id("aaaaaaaaaaaaaaaaaaaaaaaa"))
                .await
                .unwrap()
        );
        let channel = store
            .find_channel(&id("cccccccccccccccccccccccc"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(channel.name, "general");
        assert_eq!(
            store
                .find_dm_rooms(&id("dddddddddddddddddddddddd"))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_empty_seed_sections_default() {
        // テスト項目: 省略したセクションは空として扱う
        // given (前提条件):
        let json = r#"{"servers": []}"#;

        // when (操作):
        let seed = SeedData::from_json(json).unwrap();

        // then (期待する結果):
        assert!(seed.members.is_empty());
        assert!(seed.channels.is_empty());
        assert!(seed.dm_rooms.is_empty());
    }
}
