//! UseCase: ユーザーアクティビティの間引き更新
//!
//! 受信フレームごとに `last_active_at` をストアへ書くと負荷が高いので、
//! キャッシュのキー `user:<id>:active:throttle`（3 分）で間引く。
//! ストアの更新は投げっぱなしのタスクで行い、成功した場合のみキーを立てる。

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::task::JoinHandle;
use tsudoi_shared::time::Clock;

use crate::domain::{Cache, ObjectId, UserRepository, cache_keys};

use super::runtime::store_call;

/// 間引き付きアクティビティ更新
pub struct ActivityThrottle {
    user_repository: Arc<dyn UserRepository>,
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
    /// 更新中のユーザー。キーが立つ前の連続フレームで二重に更新しない
    in_flight: Arc<Mutex<HashSet<ObjectId>>>,
}

impl ActivityThrottle {
    pub fn new(
        user_repository: Arc<dyn UserRepository>,
        cache: Arc<dyn Cache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            user_repository,
            cache,
            clock,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// アクティビティを記録する
    ///
    /// キャッシュの確認も含めて起動したタスクで行うので、呼び出し側
    /// （read pump）はキャッシュやストアの応答を待たない。
    ///
    /// # Returns
    ///
    /// 更新タスクを起動した場合はそのハンドル、同じユーザーの更新が
    /// 実行中の場合は `None`
    pub fn touch(&self, user_id: ObjectId) -> Option<JoinHandle<()>> {
        if !self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id)
        {
            return None;
        }

        let user_repository = self.user_repository.clone();
        let cache = self.cache.clone();
        let in_flight = self.in_flight.clone();
        let now = self.clock.now_secs();
        Some(tokio::spawn(async move {
            record_activity(user_repository, cache, user_id, now).await;
            in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&user_id);
        }))
    }
}

async fn record_activity(
    user_repository: Arc<dyn UserRepository>,
    cache: Arc<dyn Cache>,
    user_id: ObjectId,
    now: i64,
) {
    let key = cache_keys::activity_throttle(&user_id);
    match cache.get(&key).await {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(e) => tracing::warn!(user_id = %user_id, "Throttle lookup failed: {}", e),
    }

    match store_call(|| user_repository.update_user_activity(&user_id, now)).await {
        Ok(()) => {
            if let Err(e) = cache
                .set(&key, "1", Some(cache_keys::ACTIVITY_THROTTLE_TTL))
                .await
            {
                tracing::warn!(user_id = %user_id, "Failed to set activity throttle: {}", e);
            }
        }
        Err(e) => {
            tracing::warn!(user_id = %user_id, "Failed to update user activity: {}", e);
        }
    }
}
