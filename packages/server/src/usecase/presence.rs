//! UseCase: プレゼンス（オンライン状態）
//!
//! 接続・切断時にストアとキャッシュのオンライン状態を更新する。
//! プロセスが落ちて切断処理が走らなかったユーザーは、定期的な
//! リコンシリエーションでオフラインに戻す。

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tsudoi_shared::time::Clock;

use crate::domain::{Cache, ObjectId, StoreError, UserRepository, cache_keys};

use super::runtime::{spawn_supervised, store_call};

/// リコンシリエーションの間隔
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// 最終アクティビティからこの時間を過ぎたオンラインユーザーはオフライン扱い
pub const STALE_AFTER: Duration = Duration::from_secs(15 * 60);

const STATUS_ONLINE: &str = "online";
const STATUS_OFFLINE: &str = "offline";

/// オンライン状態の更新
pub struct PresenceService {
    user_repository: Arc<dyn UserRepository>,
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
}

impl PresenceService {
    pub fn new(
        user_repository: Arc<dyn UserRepository>,
        cache: Arc<dyn Cache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            user_repository,
            cache,
            clock,
        }
    }

    pub async fn set_online(&self, user_id: &ObjectId) {
        self.set_status(user_id, true).await;
    }

    pub async fn set_offline(&self, user_id: &ObjectId) {
        self.set_status(user_id, false).await;
    }

    async fn set_status(&self, user_id: &ObjectId, is_online: bool) {
        let now = self.clock.now_secs();
        let repository = &self.user_repository;
        if let Err(e) =
            store_call(|| repository.set_online_status(user_id, is_online, now)).await
        {
            tracing::error!(user_id = %user_id, is_online, "Failed to store online status: {}", e);
        }

        let status = if is_online { STATUS_ONLINE } else { STATUS_OFFLINE };
        if let Err(e) = self
            .cache
            .set(
                &cache_keys::user_status(user_id),
                status,
                Some(cache_keys::USER_STATUS_TTL),
            )
            .await
        {
            tracing::warn!(user_id = %user_id, "Failed to cache online status: {}", e);
        }
        tracing::debug!(user_id = %user_id, "User is now {}", status);
    }
}

/// 取り残されたオンライン状態の定期修正
pub struct PresenceReconciler {
    user_repository: Arc<dyn UserRepository>,
    clock: Arc<dyn Clock>,
}

impl PresenceReconciler {
    pub fn new(user_repository: Arc<dyn UserRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            user_repository,
            clock,
        }
    }

    /// 一度だけ実行する
    ///
    /// # Returns
    ///
    /// オフラインに戻したユーザー数
    pub async fn run_once(&self) -> Result<u64, StoreError> {
        let cutoff = self.clock.now_secs() - STALE_AFTER.as_secs() as i64;
        let repository = &self.user_repository;
        store_call(|| repository.mark_stale_users_offline(cutoff)).await
    }

    /// `RECONCILE_INTERVAL` ごとの定期実行を開始
    pub fn run(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        spawn_supervised("presence-reconciler", async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + RECONCILE_INTERVAL, RECONCILE_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => match self.run_once().await {
                        Ok(0) => {}
                        Ok(count) => tracing::info!("Marked {} stale user(s) offline", count),
                        Err(e) => tracing::error!("Presence reconciliation failed: {}", e),
                    },
                }
            }
            tracing::debug!("Presence reconciler stopped");
        })
    }
}
