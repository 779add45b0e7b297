//! UseCase: 接続レジストリ
//!
//! 接続中クライアントの索引（接続 ID 別・ユーザー別）を保持する。
//! 登録と登録解除はそれぞれ専用のキューと単一タスクで直列に処理し、
//! 呼び出し側は処理完了の通知を待つ。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - register / unregister / get_client / is_user_online
//! - 同一ユーザーの再接続による置き換え（supersede）
//! - ヘルスチェックによる不健全クライアントの回収
//!
//! ### なぜこのテストが必要か
//! - 置き換えられた古い接続の遅れた登録解除が新しい接続を消してはならない
//! - 応答のないクライアントが索引に残り続けないことを保証する
//!
//! ### どのような状況を想定しているか
//! - 正常系：登録と検索
//! - 異常系：二重の登録解除、pong の途絶
//! - エッジケース：登録前に閉じられたクライアント

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::{RwLock, mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tsudoi_shared::time::Clock;
use uuid::Uuid;

use crate::domain::ObjectId;

use super::{
    client::{Client, OutboundFrame},
    error::RegistryError,
    runtime::spawn_supervised,
};

/// 登録・登録解除キューの容量
pub const REGISTRY_QUEUE_CAPACITY: usize = 1000;

/// ヘルスチェックの間隔
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct ClientIndex {
    by_connection: HashMap<Uuid, Arc<Client>>,
    by_user: HashMap<ObjectId, Arc<Client>>,
}

struct Command {
    client: Arc<Client>,
    done: oneshot::Sender<()>,
}

/// 接続レジストリ
pub struct ConnectionRegistry {
    index: Arc<RwLock<ClientIndex>>,
    register_tx: mpsc::Sender<Command>,
    unregister_tx: mpsc::Sender<Command>,
    clock: Arc<dyn Clock>,
}

impl ConnectionRegistry {
    /// 新しい ConnectionRegistry を作成し、登録・登録解除タスクを起動する
    ///
    /// Tokio ランタイム上で呼び出すこと。
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let index = Arc::new(RwLock::new(ClientIndex::default()));
        let (register_tx, register_rx) = mpsc::channel(REGISTRY_QUEUE_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(REGISTRY_QUEUE_CAPACITY);

        spawn_supervised("registry-register", run_register(index.clone(), register_rx));
        spawn_supervised(
            "registry-unregister",
            run_unregister(index.clone(), unregister_rx),
        );

        Self {
            index,
            register_tx,
            unregister_tx,
            clock,
        }
    }

    /// 新しいクライアントを作成（まだ登録はしない）
    ///
    /// # Returns
    ///
    /// クライアントと、write pump に渡す送信キューの受信側
    pub fn new_client(&self, user_id: ObjectId) -> (Arc<Client>, mpsc::Receiver<OutboundFrame>) {
        let (client, rx) = Client::new(user_id, self.clock.now());
        (Arc::new(client), rx)
    }

    /// クライアントを登録
    ///
    /// 同じユーザーの既存クライアントは先に登録解除される。
    pub async fn register(&self, client: Arc<Client>) -> Result<(), RegistryError> {
        Self::submit(&self.register_tx, client).await
    }

    /// クライアントを登録解除（冪等）
    pub async fn unregister(&self, client: Arc<Client>) -> Result<(), RegistryError> {
        Self::submit(&self.unregister_tx, client).await
    }

    async fn submit(queue: &mpsc::Sender<Command>, client: Arc<Client>) -> Result<(), RegistryError> {
        let (done, ack) = oneshot::channel();
        queue
            .send(Command { client, done })
            .await
            .map_err(|_| RegistryError::ShutDown)?;
        ack.await.map_err(|_| RegistryError::ShutDown)
    }

    pub async fn get_client(&self, user_id: &ObjectId) -> Option<Arc<Client>> {
        self.index.read().await.by_user.get(user_id).cloned()
    }

    pub async fn is_user_online(&self, user_id: &ObjectId) -> bool {
        self.index.read().await.by_user.contains_key(user_id)
    }

    pub async fn client_count(&self) -> usize {
        self.index.read().await.by_connection.len()
    }

    pub async fn all_clients(&self) -> Vec<Arc<Client>> {
        self.index
            .read()
            .await
            .by_connection
            .values()
            .cloned()
            .collect()
    }

    /// 不健全なクライアントを登録解除する
    ///
    /// # Returns
    ///
    /// 登録解除したクライアント数
    pub async fn check_clients_health(&self) -> usize {
        let now = self.clock.now();
        let unhealthy: Vec<Arc<Client>> = self
            .index
            .read()
            .await
            .by_connection
            .values()
            .filter(|client| !client.is_healthy(now))
            .cloned()
            .collect();

        for client in &unhealthy {
            tracing::warn!(
                user_id = %client.user_id(),
                connection_id = %client.connection_id(),
                "Unhealthy client (last pong at {}), unregistering",
                client.last_pong_at()
            );
            if let Err(e) = self.unregister(client.clone()).await {
                tracing::error!("Failed to unregister unhealthy client: {}", e);
            }
        }
        unhealthy.len()
    }

    /// ヘルスチェックの定期実行を開始
    pub fn start_health_checker(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        spawn_supervised("health-checker", async move {
            let mut ticker = tokio::time::interval_at(
                Instant::now() + HEALTH_CHECK_INTERVAL,
                HEALTH_CHECK_INTERVAL,
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let reaped = registry.check_clients_health().await;
                        if reaped > 0 {
                            tracing::info!("Health check reaped {} client(s)", reaped);
                        }
                    }
                }
            }
            tracing::debug!("Health checker stopped");
        })
    }

    /// 全クライアントを登録解除する（サーバー停止時）
    pub async fn shutdown(&self) {
        let clients = self.all_clients().await;
        tracing::info!("Unregistering {} client(s) for shutdown", clients.len());
        for client in clients {
            if let Err(e) = self.unregister(client).await {
                tracing::error!("Failed to unregister client during shutdown: {}", e);
            }
        }
    }
}

async fn run_register(index: Arc<RwLock<ClientIndex>>, mut rx: mpsc::Receiver<Command>) {
    while let Some(Command { client, done }) = rx.recv().await {
        apply_register(&index, &client).await;
        let _ = done.send(());
    }
}

async fn run_unregister(index: Arc<RwLock<ClientIndex>>, mut rx: mpsc::Receiver<Command>) {
    while let Some(Command { client, done }) = rx.recv().await {
        apply_unregister(&index, &client).await;
        let _ = done.send(());
    }
}

async fn apply_register(index: &RwLock<ClientIndex>, client: &Arc<Client>) {
    if client.is_closed() {
        tracing::debug!(
            user_id = %client.user_id(),
            "Client closed before registration, skipping"
        );
        return;
    }

    // the successor is indexed before the predecessor is closed, so the
    // predecessor's teardown already sees the user as online
    let (superseded, total) = {
        let mut index = index.write().await;
        let previous = index
            .by_user
            .insert(client.user_id(), client.clone())
            .filter(|previous| previous.connection_id() != client.connection_id());
        if let Some(previous) = &previous {
            index.by_connection.remove(&previous.connection_id());
        }
        index
            .by_connection
            .insert(client.connection_id(), client.clone());
        (previous, index.by_connection.len())
    };

    if let Some(previous) = superseded {
        previous.close();
        tracing::info!(
            user_id = %client.user_id(),
            connection_id = %previous.connection_id(),
            "Client superseded by a new connection"
        );
    }
    tracing::info!(
        user_id = %client.user_id(),
        connection_id = %client.connection_id(),
        "Client registered (total: {})",
        total
    );
}

async fn apply_unregister(index: &RwLock<ClientIndex>, client: &Arc<Client>) {
    client.close();

    let (removed, total) = {
        let mut index = index.write().await;
        let removed = index
            .by_connection
            .remove(&client.connection_id())
            .is_some();
        let owns_user_slot = index
            .by_user
            .get(&client.user_id())
            .is_some_and(|current| current.connection_id() == client.connection_id());
        if owns_user_slot {
            index.by_user.remove(&client.user_id());
        }
        (removed, index.by_connection.len())
    };

    if removed {
        tracing::info!(
            user_id = %client.user_id(),
            connection_id = %client.connection_id(),
            "Client unregistered (total: {})",
            total
        );
    }
}
