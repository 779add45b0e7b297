//! UseCase 層のエラー型

use thiserror::Error;

use crate::domain::StoreError;

/// クライアントの送信キューへの投入エラー
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// 送信キューが満杯（遅いクライアント）
    #[error("send queue is full")]
    QueueFull,

    /// 送信キューが閉じている（登録解除済み）
    #[error("send queue is closed")]
    Closed,

    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// ConnectionRegistry のエラー
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// 登録・登録解除タスクが停止している
    #[error("connection registry is shut down")]
    ShutDown,
}

/// RoomManager のエラー
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("user is not allowed to join this room")]
    Unauthorized,

    #[error("room not found")]
    RoomNotFound,

    #[error("room broadcast queue is full")]
    BroadcastQueueFull,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// メッセージ送信のエラー
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendMessageError {
    /// 永続化に失敗した（ファンアウトは行われない）
    #[error("failed to persist message: {0}")]
    PersistFailed(StoreError),

    #[error("failed to encode message: {0}")]
    Encode(String),
}
