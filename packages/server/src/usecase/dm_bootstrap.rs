//! UseCase: DM ルームのブートストラップ
//!
//! DM は片方の参加者のレコードだけが存在する状態で始まることがある。
//! 送信前に両者のレコードが揃っていることを保証し、揃ったことを
//! キャッシュのフラグ（`dm_room_exists:<room_id>`、24 時間）で覚えておく。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - DmRoomBootstrap::ensure() メソッド
//!
//! ### なぜこのテストが必要か
//! - 両参加者から同時にブートストラップしてもレコードが 2 件に収まることを保証する
//! - キャッシュ障害時にもストアだけで正しく動くことを保証する
//!
//! ### どのような状況を想定しているか
//! - 正常系：相手側・自分側のレコード作成、フラグによる省略
//! - 異常系：キャッシュ障害、重複キー
//! - エッジケース：レコードが 0 件（相手が分からないので何もしない）

use std::sync::Arc;

use tsudoi_shared::time::Clock;

use crate::domain::{Cache, DmRoom, ObjectId, RoomRepository, StoreError, cache_keys};

use super::runtime::store_call;

/// ブートストラップの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// キャッシュのフラグにより省略
    Cached,
    /// 既に 2 件揃っていた
    AlreadyComplete,
    /// 欠けていたレコードを作成した（重複キーも成功扱い）
    Completed,
    /// レコードがなく、相手を特定できない
    NoRecords,
    /// 既存レコードのどちらの参加者でもない
    NotParticipant,
}

/// DM ルームのブートストラップ
pub struct DmRoomBootstrap {
    room_repository: Arc<dyn RoomRepository>,
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
}

impl DmRoomBootstrap {
    pub fn new(
        room_repository: Arc<dyn RoomRepository>,
        cache: Arc<dyn Cache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            room_repository,
            cache,
            clock,
        }
    }

    /// 両参加者の DmRoom レコードが揃っていることを保証する
    ///
    /// # Arguments
    ///
    /// * `room_id` - DM ルームの ID
    /// * `user_id` - 送信しようとしているユーザー
    pub async fn ensure(
        &self,
        room_id: &ObjectId,
        user_id: &ObjectId,
    ) -> Result<BootstrapOutcome, StoreError> {
        let flag = cache_keys::dm_room_exists(room_id);
        match self.cache.get(&flag).await {
            Ok(Some(_)) => return Ok(BootstrapOutcome::Cached),
            Ok(None) => {}
            Err(e) => tracing::warn!(room_id = %room_id, "DM flag lookup failed, checking store: {}", e),
        }

        let repository = &self.room_repository;
        let records = store_call(|| repository.find_dm_rooms(room_id)).await?;

        let outcome = match records.as_slice() {
            [] => return Ok(BootstrapOutcome::NoRecords),
            [existing] => {
                let missing = if existing.user_id == *user_id {
                    // 相手側のレコードが欠けている
                    DmRoom::new(*room_id, existing.chat_with_user_id, *user_id, self.clock.now())
                } else if existing.chat_with_user_id == *user_id {
                    DmRoom::new(*room_id, *user_id, existing.user_id, self.clock.now())
                } else {
                    tracing::warn!(
                        room_id = %room_id,
                        user_id = %user_id,
                        "User is not a participant of this DM"
                    );
                    return Ok(BootstrapOutcome::NotParticipant);
                };
                match store_call(|| repository.create_dm_room(missing.clone())).await {
                    Ok(()) => {
                        tracing::info!(
                            room_id = %room_id,
                            "Created missing DM record for {}",
                            missing.user_id
                        );
                    }
                    Err(StoreError::DuplicateKey(_)) => {
                        tracing::debug!(room_id = %room_id, "DM record created concurrently");
                    }
                    Err(e) => return Err(e),
                }
                BootstrapOutcome::Completed
            }
            _ => BootstrapOutcome::AlreadyComplete,
        };

        if let Err(e) = self
            .cache
            .set(&flag, "1", Some(cache_keys::DM_ROOM_EXISTS_TTL))
            .await
        {
            tracing::warn!(room_id = %room_id, "Failed to set DM flag: {}", e);
        }
        Ok(outcome)
    }
}
