//! UseCase: ルーム管理とファンアウト
//!
//! ルームはローカルに購読者がいる間だけ存在する。各ルームは
//!
//! - pub/sub ブリッジ（`room:<key>` を購読する単一タスク）
//! - ローカル配信キュー（容量 1000）とワーカー（DM: 3 / チャンネル: 5）
//!
//! を持つ。通常の配信経路はブリッジのみで、ローカル配信キューは
//! publish に失敗したときのフォールバックとしてだけ使う。
//! ブリッジは単一タスクでブロックしない `try_send` により配信するため、
//! ノード内のルームごとの配信順は pub/sub の順序と一致する。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - init_room / join_room / leave_room / cleanup_room のライフサイクル
//! - pub/sub ブリッジ経由の配信と送信者・受信者ごとのラベル付け
//! - ローカル配信キュー経由のフォールバック配信
//! - check_user_allowed_join_room の認可判定
//!
//! ### なぜこのテストが必要か
//! - 空になったルームのキュー・購読が確実に解放されることを保証する
//! - 遅いクライアントが他のクライアントへの配信を妨げないことを保証する
//!
//! ### どのような状況を想定しているか
//! - 正常系：参加・配信・退出
//! - 異常系：送信キューが満杯のクライアント、存在しないルーム
//! - エッジケース：クリーンアップ済みルームへの参加

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex as StdMutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{
    sync::{Mutex, RwLock, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tsudoi_shared::time::Clock;
use uuid::Uuid;

use crate::{
    domain::{
        Cache, ObjectId, PubSub, RoomKey, RoomRepository, RoomType, Subscription, cache_keys,
    },
    infrastructure::dto::websocket::{MessagePayload, ServerAction, ServerFrame},
};

use super::{
    client::Client,
    error::{RoomError, SendError},
    runtime::{spawn_supervised, store_call},
};

/// ルームのローカル配信キューの容量
pub const ROOM_BROADCAST_CAPACITY: usize = 1000;

/// DM ルームの配信ワーカー数
pub const DM_ROOM_WORKERS: usize = 3;

/// チャンネルルームの配信ワーカー数
pub const CHANNEL_ROOM_WORKERS: usize = 5;

const BRIDGE_STOP_TIMEOUT: Duration = Duration::from_secs(1);

pub fn worker_count(room_type: RoomType) -> usize {
    match room_type {
        RoomType::Dm => DM_ROOM_WORKERS,
        RoomType::Channel => CHANNEL_ROOM_WORKERS,
    }
}

/// ブリッジとワーカーが共有する配信処理
#[derive(Clone)]
struct Delivery {
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
}

impl Delivery {
    /// 配信できたユーザーの `last_active` をまとめて書き込む（ベストエフォート）
    fn record_last_active(&self, room: RoomKey, users: Vec<ObjectId>, now: DateTime<Utc>) {
        if users.is_empty() {
            return;
        }
        let cache = self.cache.clone();
        let now_millis = now.timestamp_millis().to_string();
        tokio::spawn(async move {
            for user_id in users {
                let key = cache_keys::user_room_last_active(&user_id, &room);
                if let Err(e) = cache
                    .set(&key, &now_millis, Some(cache_keys::LAST_ACTIVE_TTL))
                    .await
                {
                    tracing::warn!(room = %room, "Failed to record last_active: {}", e);
                    break;
                }
            }
        });
    }
}

/// ローカル購読者を持つルーム
#[derive(Debug)]
pub struct Room {
    key: RoomKey,
    clients: RwLock<HashMap<Uuid, Arc<Client>>>,
    broadcast: StdMutex<Option<mpsc::Sender<MessagePayload>>>,
    /// クリーンアップ済み。参加を受け付けない
    closed: AtomicBool,
}

impl Room {
    fn new(key: RoomKey) -> (Self, mpsc::Receiver<MessagePayload>) {
        let (tx, rx) = mpsc::channel(ROOM_BROADCAST_CAPACITY);
        let room = Self {
            key,
            clients: RwLock::new(HashMap::new()),
            broadcast: StdMutex::new(Some(tx)),
            closed: AtomicBool::new(false),
        };
        (room, rx)
    }

    pub fn key(&self) -> RoomKey {
        self.key
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn contains(&self, connection_id: &Uuid) -> bool {
        self.clients.read().await.contains_key(connection_id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_broadcast_closed(&self) -> bool {
        self.broadcast
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn close_broadcast(&self) {
        self.broadcast
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn enqueue(&self, envelope: MessagePayload) -> Result<(), RoomError> {
        let guard = self.broadcast.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(RoomError::RoomNotFound);
        };
        tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RoomError::BroadcastQueueFull,
            mpsc::error::TrySendError::Closed(_) => RoomError::RoomNotFound,
        })
    }

    /// ルームの全クライアントに配信する
    async fn deliver(&self, envelope: &MessagePayload, delivery: &Delivery) {
        let clients: Vec<Arc<Client>> = self.clients.read().await.values().cloned().collect();
        if clients.is_empty() {
            return;
        }

        let encode = |action| serde_json::to_string(&ServerFrame::new(action, envelope));
        let (new_message, message_sent) =
            match (encode(ServerAction::NewMessage), encode(ServerAction::MessageSent)) {
                (Ok(new_message), Ok(message_sent)) => (new_message, message_sent),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!(room = %self.key, "Failed to encode envelope: {}", e);
                    return;
                }
            };

        let now = delivery.clock.now();
        let mut delivered = Vec::with_capacity(clients.len());
        for client in clients {
            let frame = match envelope.action_for(&client.user_id()) {
                ServerAction::MessageSent => message_sent.clone(),
                _ => new_message.clone(),
            };
            match client.send_text(frame) {
                Ok(()) => {
                    client.touch_room(self.key, now);
                    delivered.push(client.user_id());
                }
                Err(SendError::QueueFull) => {
                    tracing::warn!(
                        room = %self.key,
                        user_id = %client.user_id(),
                        "Send queue full, dropping frame and marking client unhealthy"
                    );
                    client.mark_unhealthy();
                }
                Err(e) => {
                    tracing::debug!(
                        room = %self.key,
                        user_id = %client.user_id(),
                        "Skipping client: {}",
                        e
                    );
                    client.mark_unhealthy();
                }
            }
        }
        delivery.record_last_active(self.key, delivered, now);
    }
}

/// `active_rooms` のスナップショット
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub key: RoomKey,
    pub clients: usize,
}

struct RoomBridge {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// ルーム管理
pub struct RoomManager {
    rooms: RwLock<HashMap<RoomKey, Arc<Room>>>,
    /// lock order: rooms → bridges
    bridges: StdMutex<HashMap<RoomKey, RoomBridge>>,
    room_repository: Arc<dyn RoomRepository>,
    pubsub: Arc<dyn PubSub>,
    delivery: Delivery,
}

impl RoomManager {
    /// 新しい RoomManager を作成
    pub fn new(
        room_repository: Arc<dyn RoomRepository>,
        cache: Arc<dyn Cache>,
        pubsub: Arc<dyn PubSub>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            bridges: StdMutex::new(HashMap::new()),
            room_repository,
            pubsub,
            delivery: Delivery { cache, clock },
        }
    }

    pub async fn get_room(&self, key: &RoomKey) -> Option<Arc<Room>> {
        self.rooms.read().await.get(key).cloned()
    }

    /// ルームを取得し、なければ作成する
    ///
    /// 作成時は pub/sub の購読を済ませてから返す。購読に失敗した場合は
    /// ローカル配信キューだけを持つルームになる。
    pub async fn init_room(&self, key: RoomKey) -> Arc<Room> {
        if let Some(room) = self.get_room(&key).await {
            return room;
        }

        // subscribe outside the index lock
        let subscription = match self.pubsub.subscribe(&key.pubsub_channel()).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                tracing::warn!(room = %key, "Pub/sub subscribe failed, room is local only: {}", e);
                None
            }
        };

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(&key) {
            return room.clone();
        }

        let (room, rx) = Room::new(key);
        let room = Arc::new(room);
        self.spawn_workers(&room, rx);
        if let Some(subscription) = subscription {
            let cancel = CancellationToken::new();
            let handle = spawn_supervised(
                "room-bridge",
                run_bridge(
                    room.clone(),
                    subscription,
                    cancel.clone(),
                    self.delivery.clone(),
                ),
            );
            self.bridges
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, RoomBridge { cancel, handle });
        }
        rooms.insert(key, room.clone());
        tracing::info!(room = %key, "Room initialized");
        room
    }

    fn spawn_workers(&self, room: &Arc<Room>, rx: mpsc::Receiver<MessagePayload>) {
        let rx = Arc::new(Mutex::new(rx));
        for _ in 0..worker_count(room.key.room_type) {
            spawn_supervised(
                "room-broadcast-worker",
                run_worker(room.clone(), rx.clone(), self.delivery.clone()),
            );
        }
    }

    /// クライアントをルームに参加させる
    ///
    /// ルームが存在しない（またはクリーンアップ済み）場合は `RoomNotFound`。
    pub async fn join_room(&self, client: &Arc<Client>, key: RoomKey) -> Result<(), RoomError> {
        {
            // cleanup removes rooms under the index write lock, so a room
            // found here stays open while its member set is locked
            let rooms = self.rooms.read().await;
            let room = rooms.get(&key).ok_or(RoomError::RoomNotFound)?;
            let mut clients = room.clients.write().await;
            if room.is_closed() {
                return Err(RoomError::RoomNotFound);
            }
            clients.insert(client.connection_id(), client.clone());
        }

        let now = self.delivery.clock.now();
        client.touch_room(key, now);

        let user_id = client.user_id();
        let cache = &self.delivery.cache;
        let writes = [
            cache
                .set_add(&cache_keys::room_members(&key), &user_id.to_hex())
                .await,
            cache
                .set_add(&cache_keys::user_rooms(&user_id), &key.to_string())
                .await,
            cache
                .set(
                    &cache_keys::user_room_last_active(&user_id, &key),
                    &now.timestamp_millis().to_string(),
                    Some(cache_keys::LAST_ACTIVE_TTL),
                )
                .await,
        ];
        if let Some(Err(e)) = writes.into_iter().find(Result::is_err) {
            tracing::warn!(room = %key, user_id = %user_id, "Cache update on join failed: {}", e);
        }

        tracing::info!(room = %key, user_id = %user_id, "Client joined room");
        Ok(())
    }

    /// ルームを用意してクライアントを参加させる
    ///
    /// 参加の直前にルームがクリーンアップされた場合は作り直して参加し直す。
    pub async fn enter_room(&self, client: &Arc<Client>, key: RoomKey) -> Result<(), RoomError> {
        loop {
            self.init_room(key).await;
            match self.join_room(client, key).await {
                Err(RoomError::RoomNotFound) => {
                    tracing::debug!(room = %key, "Room was cleaned up during join, re-creating");
                }
                result => return result,
            }
        }
    }

    /// クライアントをルームから退出させる（冪等）
    ///
    /// ルームが空になればクリーンアップする。同じユーザーの別の接続が
    /// まだ参加している場合、キャッシュのメンバー集合は変更しない。
    pub async fn leave_room(&self, client: &Arc<Client>, key: RoomKey) {
        let user_id = client.user_id();
        let mut user_still_joined = false;
        if let Some(room) = self.get_room(&key).await {
            let now_empty = {
                let mut clients = room.clients.write().await;
                clients.remove(&client.connection_id());
                user_still_joined = clients.values().any(|other| other.user_id() == user_id);
                clients.is_empty()
            };
            if now_empty {
                self.cleanup_room(&key).await;
            }
        }
        client.forget_room(&key);

        if user_still_joined {
            tracing::info!(
                room = %key,
                user_id = %user_id,
                connection_id = %client.connection_id(),
                "Superseded connection left room"
            );
            return;
        }

        let cache = &self.delivery.cache;
        let writes = [
            cache
                .set_remove(&cache_keys::room_members(&key), &user_id.to_hex())
                .await,
            cache
                .set_remove(&cache_keys::user_rooms(&user_id), &key.to_string())
                .await,
            cache
                .delete(&cache_keys::user_room_last_active(&user_id, &key))
                .await,
        ];
        if let Some(Err(e)) = writes.into_iter().find(Result::is_err) {
            tracing::warn!(room = %key, user_id = %user_id, "Cache update on leave failed: {}", e);
        }

        tracing::info!(room = %key, user_id = %user_id, "Client left room");
    }

    /// クライアントが参加している全ルームから退出させる（切断時）
    pub async fn leave_all(&self, client: &Arc<Client>) {
        for key in client.rooms() {
            self.leave_room(client, key).await;
        }
    }

    /// 空のルームを削除し、配信キューと購読を閉じる
    pub async fn cleanup_room(&self, key: &RoomKey) {
        let bridge = {
            let mut rooms = self.rooms.write().await;
            let Some(room) = rooms.get(key).cloned() else {
                return;
            };
            {
                let clients = room.clients.write().await;
                if !clients.is_empty() {
                    return;
                }
                room.mark_closed();
            }
            rooms.remove(key);
            room.close_broadcast();
            let bridge = self
                .bridges
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(key);
            if let Some(bridge) = &bridge {
                bridge.cancel.cancel();
            }
            bridge
        };

        if let Some(bridge) = bridge
            && tokio::time::timeout(BRIDGE_STOP_TIMEOUT, bridge.handle)
                .await
                .is_err()
        {
            tracing::warn!(room = %key, "Pub/sub bridge did not stop in time");
        }
        tracing::info!(room = %key, "Room cleaned up");
    }

    /// ユーザーがルームに参加できるか
    ///
    /// - DM: `(room_id, user_id)` の DmRoom が存在する
    /// - チャンネル: チャンネルとサーバーが存在し、ユーザーがサーバーのメンバーである
    pub async fn check_user_allowed_join_room(
        &self,
        user_id: &ObjectId,
        key: RoomKey,
    ) -> Result<bool, RoomError> {
        let repository = &self.room_repository;
        match key.room_type {
            RoomType::Dm => {
                let record =
                    store_call(|| repository.find_dm_room(&key.room_id, user_id)).await?;
                Ok(record.is_some())
            }
            RoomType::Channel => {
                let Some(channel) = store_call(|| repository.find_channel(&key.room_id)).await?
                else {
                    return Ok(false);
                };
                if !store_call(|| repository.server_exists(&channel.server_id)).await? {
                    return Ok(false);
                }
                Ok(store_call(|| repository.is_server_member(&channel.server_id, user_id)).await?)
            }
        }
    }

    /// 参加を認可する。拒否は `Unauthorized`
    pub async fn authorize_join(&self, user_id: &ObjectId, key: RoomKey) -> Result<(), RoomError> {
        if self.check_user_allowed_join_room(user_id, key).await? {
            Ok(())
        } else {
            Err(RoomError::Unauthorized)
        }
    }

    /// ローカル配信キューにエンベロープを積む（publish 失敗時のフォールバック）
    pub async fn enqueue_local(&self, envelope: MessagePayload) -> Result<(), RoomError> {
        let room = self
            .get_room(&envelope.room_key())
            .await
            .ok_or(RoomError::RoomNotFound)?;
        room.enqueue(envelope)
    }

    /// このノードのアクティブなルーム
    pub async fn active_rooms(&self) -> Vec<RoomSnapshot> {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(rooms.len());
        for room in rooms {
            snapshots.push(RoomSnapshot {
                key: room.key,
                clients: room.client_count().await,
            });
        }
        snapshots.sort_by_key(|s| s.key.to_string());
        snapshots
    }

    /// 全ルームの配信キューと購読を閉じる（サーバー停止時）
    pub async fn shutdown(&self) {
        let (count, bridges) = {
            let mut rooms = self.rooms.write().await;
            for room in rooms.values() {
                room.mark_closed();
                room.close_broadcast();
            }
            let count = rooms.len();
            rooms.clear();
            let bridges: Vec<RoomBridge> = self
                .bridges
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain()
                .map(|(_, bridge)| bridge)
                .collect();
            (count, bridges)
        };

        for bridge in &bridges {
            bridge.cancel.cancel();
        }
        for bridge in bridges {
            let _ = tokio::time::timeout(BRIDGE_STOP_TIMEOUT, bridge.handle).await;
        }
        tracing::info!("Room manager shut down ({} room(s) closed)", count);
    }
}

/// pub/sub の購読からルームのクライアントへ配信する
async fn run_bridge(
    room: Arc<Room>,
    mut subscription: Subscription,
    cancel: CancellationToken,
    delivery: Delivery,
) {
    loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => break,
            payload = subscription.recv() => payload,
        };
        let Some(payload) = payload else {
            tracing::warn!(room = %room.key, "Pub/sub subscription closed unexpectedly");
            break;
        };

        match serde_json::from_str::<ServerFrame<MessagePayload>>(&payload) {
            Ok(frame) if frame.data.room_key() == room.key => {
                room.deliver(&frame.data, &delivery).await;
            }
            Ok(frame) => {
                tracing::warn!(
                    room = %room.key,
                    "Ignoring envelope addressed to {}",
                    frame.data.room_key()
                );
            }
            Err(e) => {
                tracing::warn!(room = %room.key, "Dropping undecodable pub/sub payload: {}", e);
            }
        }
    }
    tracing::debug!(room = %room.key, channel = subscription.channel(), "Pub/sub bridge stopped");
    subscription.close();
}

/// ローカル配信キューを消費する
async fn run_worker(
    room: Arc<Room>,
    rx: Arc<Mutex<mpsc::Receiver<MessagePayload>>>,
    delivery: Delivery,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(envelope) = next else {
            break;
        };
        room.deliver(&envelope, &delivery).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{Channel, DmRoom, MockRoomRepository, StoreError},
        infrastructure::{cache::InMemoryCache, pubsub::InMemoryPubSub, repository::InMemoryStore},
    };
    use tsudoi_shared::time::FixedClock;

    const NOW: i64 = 1_700_000_000_000;

    fn id(c: char) -> ObjectId {
        ObjectId::parse_str(&c.to_string().repeat(24)).unwrap()
    }

    struct Fixture {
        manager: RoomManager,
        store: Arc<InMemoryStore>,
        cache: Arc<InMemoryCache>,
        pubsub: Arc<InMemoryPubSub>,
        clock: Arc<FixedClock>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let pubsub = Arc::new(InMemoryPubSub::new());
        let clock = Arc::new(FixedClock::new(NOW));
        let manager = RoomManager::new(store.clone(), cache.clone(), pubsub.clone(), clock.clone());
        Fixture {
            manager,
            store,
            cache,
            pubsub,
            clock,
        }
    }

    fn client(user: ObjectId, clock: &FixedClock) -> (Arc<Client>, mpsc::Receiver<String>) {
        let (client, rx) = Client::new(user, clock.now());
        (Arc::new(client), rx)
    }

    fn envelope(key: RoomKey, sender: ObjectId, content: &str) -> MessagePayload {
        MessagePayload {
            room_type: key.room_type,
            room_id: key.room_id,
            sender_id: sender,
            content: content.to_string(),
            timestamp: NOW,
        }
    }

    async fn next_frame(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
        let text = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("frame should arrive")
            .expect("queue should be open");
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_init_room_is_idempotent() {
        // テスト項目: 同じキーで init_room しても同じルームが返り、購読は 1 つだけ
        // given (前提条件):
        let f = fixture();
        let key = RoomKey::new(RoomType::Channel, id('c'));

        // when (操作):
        let first = f.manager.init_room(key).await;
        let second = f.manager.init_room(key).await;

        // then (期待する結果):
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(f.pubsub.subscriber_count(&key.pubsub_channel()).await, 1);
    }

    #[tokio::test]
    async fn test_bridge_delivers_with_per_recipient_label() {
        // テスト項目: pub/sub 経由の配信で、送信者には message_sent、他には new_message が届く
        // given (前提条件):
        let f = fixture();
        let key = RoomKey::new(RoomType::Channel, id('c'));
        let (sender, mut sender_rx) = client(id('a'), &f.clock);
        let (other, mut other_rx) = client(id('b'), &f.clock);
        f.manager.init_room(key).await;
        f.manager.join_room(&sender, key).await.unwrap();
        f.manager.join_room(&other, key).await.unwrap();

        // when (操作):
        let frame = ServerFrame::new(ServerAction::NewMessage, envelope(key, id('a'), "hi"));
        f.pubsub
            .publish(&key.pubsub_channel(), &serde_json::to_string(&frame).unwrap())
            .await
            .unwrap();

        // then (期待する結果):
        let to_sender = next_frame(&mut sender_rx).await;
        let to_other = next_frame(&mut other_rx).await;
        assert_eq!(to_sender["action"], "message_sent");
        assert_eq!(to_other["action"], "new_message");
        assert_eq!(to_other["data"]["content"], "hi");
    }

    #[tokio::test]
    async fn test_bridge_preserves_publish_order() {
        // テスト項目: 同じルームのメッセージは publish 順に届く
        // given (前提条件):
        let f = fixture();
        let key = RoomKey::new(RoomType::Dm, id('d'));
        let (receiver, mut rx) = client(id('b'), &f.clock);
        f.manager.init_room(key).await;
        f.manager.join_room(&receiver, key).await.unwrap();

        // when (操作):
        for i in 0..50 {
            let frame = ServerFrame::new(
                ServerAction::NewMessage,
                envelope(key, id('a'), &i.to_string()),
            );
            f.pubsub
                .publish(&key.pubsub_channel(), &serde_json::to_string(&frame).unwrap())
                .await
                .unwrap();
        }

        // then (期待する結果):
        for i in 0..50 {
            let frame = next_frame(&mut rx).await;
            assert_eq!(frame["data"]["content"], i.to_string());
        }
    }

    #[tokio::test]
    async fn test_enqueue_local_delivers_through_workers() {
        // テスト項目: ローカル配信キュー経由でもクライアントに届く
        // given (前提条件):
        let f = fixture();
        let key = RoomKey::new(RoomType::Channel, id('c'));
        let (receiver, mut rx) = client(id('b'), &f.clock);
        f.manager.init_room(key).await;
        f.manager.join_room(&receiver, key).await.unwrap();

        // when (操作):
        f.manager
            .enqueue_local(envelope(key, id('a'), "fallback"))
            .await
            .unwrap();

        // then (期待する結果):
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["action"], "new_message");
        assert_eq!(frame["data"]["content"], "fallback");
    }

    #[tokio::test]
    async fn test_enqueue_local_without_room() {
        // テスト項目: ルームがなければ RoomNotFound
        // given (前提条件):
        let f = fixture();
        let key = RoomKey::new(RoomType::Channel, id('c'));

        // when (操作):
        let result = f.manager.enqueue_local(envelope(key, id('a'), "x")).await;

        // then (期待する結果):
        assert_eq!(result, Err(RoomError::RoomNotFound));
    }

    #[tokio::test]
    async fn test_slow_client_does_not_block_others() {
        // テスト項目: 送信キューが満杯のクライアントは不健全になり、他のクライアントには届く
        // given (前提条件):
        let f = fixture();
        let key = RoomKey::new(RoomType::Channel, id('c'));
        let (slow, _slow_rx) = client(id('a'), &f.clock);
        let (fast, mut fast_rx) = client(id('b'), &f.clock);
        for i in 0..crate::usecase::client::SEND_QUEUE_CAPACITY {
            slow.send_text(i.to_string()).unwrap();
        }
        let room = f.manager.init_room(key).await;
        f.manager.join_room(&slow, key).await.unwrap();
        f.manager.join_room(&fast, key).await.unwrap();

        // when (操作):
        room.deliver(&envelope(key, id('c'), "hello"), &f.manager.delivery)
            .await;

        // then (期待する結果):
        assert!(!slow.is_active());
        assert!(fast.is_active());
        assert_eq!(next_frame(&mut fast_rx).await["data"]["content"], "hello");
    }

    #[tokio::test]
    async fn test_last_leave_cleans_up_room() {
        // テスト項目: 最後のクライアントが退出するとルームが削除され、キューと購読が閉じる
        // given (前提条件):
        let f = fixture();
        let key = RoomKey::new(RoomType::Channel, id('c'));
        let (a, _a_rx) = client(id('a'), &f.clock);
        let (b, _b_rx) = client(id('b'), &f.clock);
        let room = f.manager.init_room(key).await;
        f.manager.join_room(&a, key).await.unwrap();
        f.manager.join_room(&b, key).await.unwrap();

        // when (操作):
        f.manager.leave_room(&a, key).await;
        let after_first_leave = f.manager.get_room(&key).await.is_some();
        f.manager.leave_room(&b, key).await;

        // then (期待する結果):
        assert!(after_first_leave);
        assert!(f.manager.get_room(&key).await.is_none());
        assert!(room.is_closed());
        assert!(room.is_broadcast_closed());
        assert_eq!(f.pubsub.subscriber_count(&key.pubsub_channel()).await, 0);
        assert!(a.rooms().is_empty());
    }

    #[tokio::test]
    async fn test_join_after_cleanup_requires_reinit() {
        // テスト項目: クリーンアップ済みルームへの参加は RoomNotFound、再 init 後は参加できる
        // given (前提条件):
        let f = fixture();
        let key = RoomKey::new(RoomType::Dm, id('d'));
        let (a, _a_rx) = client(id('a'), &f.clock);
        let stale = f.manager.init_room(key).await;
        f.manager.cleanup_room(&key).await;

        // when (操作):
        let stale_join = f.manager.join_room(&a, key).await;
        let fresh = f.manager.init_room(key).await;
        let fresh_join = f.manager.join_room(&a, key).await;

        // then (期待する結果):
        assert_eq!(stale_join, Err(RoomError::RoomNotFound));
        assert!(stale.is_closed());
        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert!(fresh_join.is_ok());
        assert!(fresh.contains(&a.connection_id()).await);
    }

    #[tokio::test]
    async fn test_join_and_leave_maintain_cache_sets() {
        // テスト項目: 参加・退出でキャッシュのメンバー集合が更新される
        // given (前提条件):
        let f = fixture();
        let key = RoomKey::new(RoomType::Channel, id('c'));
        let (a, _a_rx) = client(id('a'), &f.clock);
        f.manager.init_room(key).await;

        // when (操作):
        f.manager.join_room(&a, key).await.unwrap();
        let members = f.cache.set_members(&cache_keys::room_members(&key)).await.unwrap();
        let rooms = f.cache.set_members(&cache_keys::user_rooms(&id('a'))).await.unwrap();
        let last_active = f
            .cache
            .get(&cache_keys::user_room_last_active(&id('a'), &key))
            .await
            .unwrap();
        f.manager.leave_room(&a, key).await;

        // then (期待する結果):
        assert_eq!(members, vec![id('a').to_hex()]);
        assert_eq!(rooms, vec![key.to_string()]);
        assert_eq!(last_active, Some(NOW.to_string()));
        assert!(
            f.cache
                .set_members(&cache_keys::room_members(&key))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_leave_all_on_disconnect() {
        // テスト項目: 切断時に参加中の全ルームから退出する
        // given (前提条件):
        let f = fixture();
        let channel = RoomKey::new(RoomType::Channel, id('c'));
        let dm = RoomKey::new(RoomType::Dm, id('d'));
        let (a, _a_rx) = client(id('a'), &f.clock);
        for key in [channel, dm] {
            f.manager.init_room(key).await;
            f.manager.join_room(&a, key).await.unwrap();
        }

        // when (操作):
        f.manager.leave_all(&a).await;

        // then (期待する結果):
        assert!(f.manager.active_rooms().await.is_empty());
    }

    #[tokio::test]
    async fn test_active_rooms_snapshot() {
        // テスト項目: アクティブなルームとクライアント数を列挙できる
        // given (前提条件):
        let f = fixture();
        let key = RoomKey::new(RoomType::Channel, id('c'));
        let (a, _a_rx) = client(id('a'), &f.clock);
        f.manager.init_room(key).await;
        f.manager.join_room(&a, key).await.unwrap();

        // when (操作):
        let rooms = f.manager.active_rooms().await;

        // then (期待する結果):
        assert_eq!(rooms, vec![RoomSnapshot { key, clients: 1 }]);
    }

    #[tokio::test]
    async fn test_dm_authorization() {
        // テスト項目: DM は (room_id, user_id) のレコードがある場合のみ参加できる
        // given (前提条件):
        let f = fixture();
        let key = RoomKey::new(RoomType::Dm, id('d'));
        f.store
            .create_dm_room(DmRoom::new(id('d'), id('a'), id('b'), f.clock.now()))
            .await
            .unwrap();

        // when (操作):
        let member = f.manager.check_user_allowed_join_room(&id('a'), key).await;
        let stranger = f.manager.authorize_join(&id('e'), key).await;

        // then (期待する結果):
        assert_eq!(member, Ok(true));
        assert_eq!(stranger, Err(RoomError::Unauthorized));
    }

    #[tokio::test]
    async fn test_channel_authorization() {
        // テスト項目: チャンネルはサーバーのメンバーのみ参加できる
        // given (前提条件):
        let f = fixture();
        let key = RoomKey::new(RoomType::Channel, id('c'));
        f.store.insert_server(id('e')).await;
        f.store.add_server_member(id('e'), id('a')).await;
        f.store.insert_channel(Channel::new(id('c'), id('e'), "general")).await;
        let missing = RoomKey::new(RoomType::Channel, id('f'));

        // when (操作):
        let member = f.manager.check_user_allowed_join_room(&id('a'), key).await;
        let stranger = f.manager.check_user_allowed_join_room(&id('b'), key).await;
        let no_channel = f.manager.check_user_allowed_join_room(&id('a'), missing).await;

        // then (期待する結果):
        assert_eq!(member, Ok(true));
        assert_eq!(stranger, Ok(false));
        assert_eq!(no_channel, Ok(false));
    }

    #[tokio::test]
    async fn test_authorization_store_failure() {
        // テスト項目: ストア障害は Store エラーとして返る（再試行 1 回の後）
        // given (前提条件):
        let mut repository = MockRoomRepository::new();
        repository
            .expect_find_dm_room()
            .times(2)
            .returning(|_, _| Err(StoreError::Unavailable("down".to_string())));
        let manager = RoomManager::new(
            Arc::new(repository),
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryPubSub::new()),
            Arc::new(FixedClock::new(NOW)),
        );

        // when (操作):
        let result = manager
            .check_user_allowed_join_room(&id('a'), RoomKey::new(RoomType::Dm, id('d')))
            .await;

        // then (期待する結果):
        assert_eq!(
            result,
            Err(RoomError::Store(StoreError::Unavailable("down".to_string())))
        );
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_room() {
        // テスト項目: shutdown で全ルームのキューと購読が閉じる
        // given (前提条件):
        let f = fixture();
        let key = RoomKey::new(RoomType::Channel, id('c'));
        let room = f.manager.init_room(key).await;

        // when (操作):
        f.manager.shutdown().await;

        // then (期待する結果):
        assert!(room.is_broadcast_closed());
        assert!(f.manager.active_rooms().await.is_empty());
        assert_eq!(f.pubsub.subscriber_count(&key.pubsub_channel()).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_join_and_leave_across_rooms() {
        // テスト項目: 複数タスクが複数ルームで参加・退出を繰り返しても参加は失敗せず、最終的な参加者数が一致する
        // given (前提条件):
        const TASKS: usize = 40;
        const CYCLES: usize = 50;
        let f = Arc::new(fixture());
        let keys = [
            RoomKey::new(RoomType::Channel, id('c')),
            RoomKey::new(RoomType::Channel, id('d')),
            RoomKey::new(RoomType::Dm, id('e')),
        ];

        // when (操作):
        let mut handles = Vec::with_capacity(TASKS);
        for task in 0..TASKS {
            let f = f.clone();
            handles.push(tokio::spawn(async move {
                let (member, _rx) = client(ObjectId::new(), &f.clock);
                let mut failures = 0usize;
                for cycle in 0..CYCLES {
                    let key = keys[(task + cycle) % keys.len()];
                    if f.manager.enter_room(&member, key).await.is_err() {
                        failures += 1;
                    }
                    tokio::task::yield_now().await;
                    f.manager.leave_room(&member, key).await;
                }
                let home = keys[task % keys.len()];
                if f.manager.enter_room(&member, home).await.is_err() {
                    failures += 1;
                }
                (failures, home, member)
            }));
        }
        let mut results = Vec::with_capacity(TASKS);
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        // then (期待する結果):
        let failures: usize = results.iter().map(|(failures, _, _)| failures).sum();
        assert_eq!(failures, 0);
        for key in keys {
            let expected = results.iter().filter(|(_, home, _)| *home == key).count();
            let room = f.manager.get_room(&key).await.expect("room should be active");
            assert_eq!(room.client_count().await, expected);
        }
        for (_, home, member) in &results {
            let room = f.manager.get_room(home).await.unwrap();
            assert!(room.contains(&member.connection_id()).await);
        }
    }

    #[tokio::test]
    async fn test_superseded_connection_leaving_keeps_cache_sets() {
        // テスト項目: 置き換えられた古い接続が退出しても、同じルームにいる新しい接続のキャッシュ集合は残る
        // given (前提条件):
        let f = fixture();
        let key = RoomKey::new(RoomType::Channel, id('c'));
        let (old, _old_rx) = client(id('a'), &f.clock);
        let (new, _new_rx) = client(id('a'), &f.clock);
        f.manager.enter_room(&old, key).await.unwrap();
        f.manager.enter_room(&new, key).await.unwrap();

        // when (操作):
        f.manager.leave_all(&old).await;

        // then (期待する結果):
        let room = f.manager.get_room(&key).await.expect("room should stay active");
        assert!(room.contains(&new.connection_id()).await);
        assert!(!room.contains(&old.connection_id()).await);
        assert!(old.rooms().is_empty());
        assert_eq!(
            f.cache.set_members(&cache_keys::room_members(&key)).await.unwrap(),
            vec![id('a').to_hex()]
        );
        assert_eq!(
            f.cache.set_members(&cache_keys::user_rooms(&id('a'))).await.unwrap(),
            vec![key.to_string()]
        );
    }
}
