//! 接続中のクライアント
//!
//! 1 本の WebSocket 接続に対応する。トランスポートそのものは UI 層の
//! read/write pump が所有し、ここでは送信キュー・生存監視・ルームごとの
//! アクティビティを管理する。

use std::{
    collections::HashMap,
    sync::{
        Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    domain::{ObjectId, RoomKey},
    infrastructure::dto::websocket::{ErrorPayload, ServerAction, ServerFrame},
};

use super::error::SendError;

/// 送信キューの容量
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// 最後の pong からこの時間を過ぎたクライアントは不健全とみなす
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// 送信キューに積まれる 1 フレーム（シリアライズ済み JSON）
pub type OutboundFrame = String;

#[derive(Debug)]
struct Activity {
    rooms: HashMap<RoomKey, DateTime<Utc>>,
    last_pong_at: DateTime<Utc>,
}

/// 接続中のクライアント
#[derive(Debug)]
pub struct Client {
    connection_id: Uuid,
    user_id: ObjectId,
    /// 登録解除で取り出されて drop される
    sender: Mutex<Option<mpsc::Sender<OutboundFrame>>>,
    activity: RwLock<Activity>,
    is_active: AtomicBool,
    connected_at: DateTime<Utc>,
    /// 接続の寿命。キャンセルで両 pump が終了する
    scope: CancellationToken,
}

impl Client {
    /// 新しいクライアントと送信キューの受信側を作成
    pub fn new(user_id: ObjectId, now: DateTime<Utc>) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let client = Self {
            connection_id: Uuid::new_v4(),
            user_id,
            sender: Mutex::new(Some(tx)),
            activity: RwLock::new(Activity {
                rooms: HashMap::new(),
                last_pong_at: now,
            }),
            is_active: AtomicBool::new(true),
            connected_at: now,
            scope: CancellationToken::new(),
        };
        (client, rx)
    }

    pub fn user_id(&self) -> ObjectId {
        self.user_id
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Acquire)
    }

    /// 送信キューにフレームを積む（ブロックしない）
    pub fn send_text(&self, frame: OutboundFrame) -> Result<(), SendError> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            return Err(SendError::Closed);
        };
        sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// 値を JSON にシリアライズして送信キューに積む
    pub fn send_message<T: Serialize>(&self, message: &T) -> Result<(), SendError> {
        let frame = serde_json::to_string(message).map_err(|e| SendError::Encode(e.to_string()))?;
        self.send_text(frame)
    }

    /// error フレームを送る。送れなかった場合はログのみ
    pub fn send_error(&self, original_action: &str, message: &str) {
        let frame = ServerFrame::new(
            ServerAction::Error,
            ErrorPayload {
                original_action: original_action.to_string(),
                message: message.to_string(),
            },
        );
        if let Err(e) = self.send_message(&frame) {
            tracing::warn!(
                user_id = %self.user_id,
                "Failed to send error frame for '{}': {}",
                original_action,
                e
            );
        }
    }

    /// 生存確認の時刻を更新
    pub fn update_last_seen(&self, now: DateTime<Utc>) {
        let mut activity = self.activity.write().unwrap_or_else(PoisonError::into_inner);
        activity.last_pong_at = now;
    }

    pub fn last_pong_at(&self) -> DateTime<Utc> {
        self.activity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_pong_at
    }

    /// 次のヘルスチェックで回収されるようにする
    pub fn mark_unhealthy(&self) {
        self.is_active.store(false, Ordering::Release);
    }

    pub fn is_healthy(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active() {
            return false;
        }
        let silence = now.signed_duration_since(self.last_pong_at());
        silence.to_std().map_or(true, |silence| silence <= PONG_WAIT)
    }

    pub fn touch_room(&self, room: RoomKey, now: DateTime<Utc>) {
        let mut activity = self.activity.write().unwrap_or_else(PoisonError::into_inner);
        activity.rooms.insert(room, now);
    }

    pub fn forget_room(&self, room: &RoomKey) {
        let mut activity = self.activity.write().unwrap_or_else(PoisonError::into_inner);
        activity.rooms.remove(room);
    }

    /// ルームごとの最終アクティビティのスナップショット
    pub fn room_activity(&self) -> HashMap<RoomKey, DateTime<Utc>> {
        self.activity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rooms
            .clone()
    }

    pub fn rooms(&self) -> Vec<RoomKey> {
        self.activity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rooms
            .keys()
            .copied()
            .collect()
    }

    /// 非アクティブ化・scope キャンセル・送信キューのクローズ。
    ///
    /// 初回の呼び出しでのみ true を返す。
    pub(crate) fn close(&self) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.is_active.store(false, Ordering::Release);
        self.scope.cancel();
        sender.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RoomType;
    use tsudoi_shared::time::millis_to_datetime;

    fn user() -> ObjectId {
        ObjectId::parse_str("aaaaaaaaaaaaaaaaaaaaaaaa").unwrap()
    }

    #[tokio::test]
    async fn test_send_text_reaches_receiver() {
        // テスト項目: 送信キューに積んだフレームが受信側に届く
        // given (前提条件):
        let (client, mut rx) = Client::new(user(), millis_to_datetime(0));

        // when (操作):
        client.send_text("hello".to_string()).unwrap();

        // then (期待する結果):
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }

    #[test]
    fn test_send_text_reports_full_queue() {
        // テスト項目: 送信キューが満杯なら QueueFull を返し、ブロックしない
        // given (前提条件):
        let (client, _rx) = Client::new(user(), millis_to_datetime(0));
        for i in 0..SEND_QUEUE_CAPACITY {
            client.send_text(i.to_string()).unwrap();
        }

        // when (操作):
        let result = client.send_text("overflow".to_string());

        // then (期待する結果):
        assert_eq!(result, Err(SendError::QueueFull));
    }

    #[tokio::test]
    async fn test_close_drains_and_closes_queue() {
        // テスト項目: close 後は送信できず、受信側は残りを読み切ると None になる
        // given (前提条件):
        let (client, mut rx) = Client::new(user(), millis_to_datetime(0));
        client.send_text("last".to_string()).unwrap();

        // when (操作):
        let first_close = client.close();
        let second_close = client.close();
        let send_after_close = client.send_text("late".to_string());

        // then (期待する結果):
        assert!(first_close);
        assert!(!second_close);
        assert_eq!(send_after_close, Err(SendError::Closed));
        assert!(client.scope().is_cancelled());
        assert!(!client.is_active());
        assert_eq!(rx.recv().await.as_deref(), Some("last"));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_is_healthy_follows_pong_wait() {
        // テスト項目: 最後の pong から PONG_WAIT を超えると不健全になる
        // given (前提条件):
        let start = millis_to_datetime(1_000_000);
        let (client, _rx) = Client::new(user(), start);

        // when (操作):
        let at_limit = start + chrono::Duration::seconds(60);
        let past_limit = start + chrono::Duration::seconds(61);

        // then (期待する結果):
        assert!(client.is_healthy(at_limit));
        assert!(!client.is_healthy(past_limit));

        client.update_last_seen(past_limit);
        assert!(client.is_healthy(past_limit));
    }

    #[test]
    fn test_mark_unhealthy() {
        // テスト項目: mark_unhealthy したクライアントは時刻に関係なく不健全
        // given (前提条件):
        let now = millis_to_datetime(0);
        let (client, _rx) = Client::new(user(), now);

        // when (操作):
        client.mark_unhealthy();

        // then (期待する結果):
        assert!(!client.is_healthy(now));
    }

    #[test]
    fn test_room_activity_tracking() {
        // テスト項目: ルームごとの最終アクティビティを記録・削除できる
        // given (前提条件):
        let (client, _rx) = Client::new(user(), millis_to_datetime(0));
        let room = RoomKey::new(
            RoomType::Channel,
            ObjectId::parse_str("bbbbbbbbbbbbbbbbbbbbbbbb").unwrap(),
        );

        // when (操作):
        client.touch_room(room, millis_to_datetime(5_000));
        let tracked = client.room_activity();
        client.forget_room(&room);

        // then (期待する結果):
        assert_eq!(tracked.get(&room), Some(&millis_to_datetime(5_000)));
        assert!(client.rooms().is_empty());
    }

    #[tokio::test]
    async fn test_send_error_frame() {
        // テスト項目: send_error は error アクションのフレームを積む
        // given (前提条件):
        let (client, mut rx) = Client::new(user(), millis_to_datetime(0));

        // when (操作):
        client.send_error("join_room", "not allowed");

        // then (期待する結果):
        let frame: serde_json::Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["action"], "error");
        assert_eq!(frame["data"]["original_action"], "join_room");
        assert_eq!(frame["data"]["message"], "not allowed");
    }
}
