//! WebSocket connection handlers.
//!
//! 1 接続につき read pump と write pump の 2 タスクを起動する。
//! どちらかが終了すると client の scope がキャンセルされ、接続ハンドラが
//! 登録解除・ルーム退出・プレゼンス更新を行う。

use std::{fmt::Display, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{
    sink::{Sink, SinkExt},
    stream::{Stream, StreamExt},
};
use serde::Deserialize;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};

use crate::{
    domain::ObjectId,
    ui::state::AppState,
    usecase::{Client, OutboundFrame, spawn_supervised},
};

use crate::usecase::PONG_WAIT;

/// 受信フレームの最大サイズ
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// 1 回の書き込みの制限時間
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// トランスポート ping の間隔（PONG_WAIT の 9/10）
pub const PING_PERIOD: Duration = Duration::from_secs(54);

/// scope キャンセル後に pump の終了を待つ時間
pub const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub user_id: String,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    // Convert String -> ObjectId (Domain Model)
    let user_id = match ObjectId::parse_str(&query.user_id) {
        Ok(id) => id,
        Err(_) => {
            tracing::warn!("Invalid user_id format: '{}'", query.user_id);
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, user_id)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: ObjectId) {
    let (client, queue) = state.registry.new_client(user_id);
    if let Err(e) = state.registry.register(client.clone()).await {
        tracing::error!(user_id = %user_id, "Failed to register client: {}", e);
        return;
    }
    tracing::info!(
        user_id = %user_id,
        connection_id = %client.connection_id(),
        "Client connected"
    );
    state.presence.set_online(&user_id).await;

    let (sink, stream) = socket.split();
    let write_task = spawn_supervised("write-pump", write_pump(sink, queue, client.clone()));
    let read_task = spawn_supervised(
        "read-pump",
        read_pump(stream, client.clone(), state.clone()),
    );

    client.scope().cancelled().await;

    // closing the send queue makes the write pump send CLOSE and exit
    if let Err(e) = state.registry.unregister(client.clone()).await {
        tracing::warn!(user_id = %user_id, "Unregister failed, closing directly: {}", e);
        client.close();
    }
    await_pump("read-pump", read_task).await;
    await_pump("write-pump", write_task).await;

    state.room_manager.leave_all(&client).await;
    // a newer connection of the same user keeps the user online
    if !state.registry.is_user_online(&user_id).await {
        state.presence.set_offline(&user_id).await;
    }
    let connected_for = state.clock.now() - client.connected_at();
    tracing::info!(
        user_id = %user_id,
        connection_id = %client.connection_id(),
        connected_secs = connected_for.num_seconds(),
        "Client disconnected"
    );
}

async fn await_pump(name: &'static str, mut task: JoinHandle<()>) {
    if tokio::time::timeout(CLOSE_GRACE_PERIOD, &mut task)
        .await
        .is_err()
    {
        tracing::warn!(task = name, "Pump did not stop within grace period, aborting");
        task.abort();
    }
}

/// Reads frames from the transport and dispatches them in order.
///
/// Exiting for any reason cancels the client scope.
pub(crate) async fn read_pump<St, E>(mut stream: St, client: Arc<Client>, state: Arc<AppState>)
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let _cancel_on_exit = client.scope().clone().drop_guard();
    let user_id = client.user_id();

    loop {
        let next = tokio::select! {
            _ = client.scope().cancelled() => break,
            next = tokio::time::timeout(PONG_WAIT, stream.next()) => next,
        };
        let message = match next {
            Err(_) => {
                tracing::warn!(user_id = %user_id, "Read timed out after {:?}", PONG_WAIT);
                break;
            }
            Ok(None) => {
                tracing::debug!(user_id = %user_id, "Transport stream ended");
                break;
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(user_id = %user_id, "WebSocket read error: {}", e);
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        client.update_last_seen(state.clock.now());

        match message {
            Message::Text(text) => {
                if text.as_str().len() > MAX_MESSAGE_SIZE {
                    client.send_error("unknown", "invalid data");
                    continue;
                }
                state.activity.touch(user_id);
                state.dispatcher.dispatch(&client, text.as_str()).await;
            }
            Message::Binary(_) => {
                tracing::debug!(user_id = %user_id, "Binary frame rejected");
                client.send_error("binary", "invalid data");
            }
            Message::Ping(_) | Message::Pong(_) => {
                // ping への応答はトランスポートが行う
            }
            Message::Close(frame) => {
                log_close(&user_id, frame.as_ref());
                break;
            }
        }
    }
}

fn log_close(user_id: &ObjectId, frame: Option<&CloseFrame>) {
    match frame {
        None => tracing::debug!(user_id = %user_id, "Client closed connection"),
        Some(frame) if frame.code == close_code::NORMAL || frame.code == close_code::AWAY => {
            tracing::debug!(user_id = %user_id, code = frame.code, "Client closed connection")
        }
        Some(frame) => tracing::warn!(
            user_id = %user_id,
            code = frame.code,
            "Client closed connection unexpectedly: {}",
            frame.reason.as_str()
        ),
    }
}

#[derive(Debug, Error)]
enum WriteError {
    #[error("write timed out")]
    Timeout,

    #[error("{0}")]
    Transport(String),
}

async fn write_frame<Si>(sink: &mut Si, message: Message) -> Result<(), WriteError>
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    match tokio::time::timeout(WRITE_WAIT, sink.send(message)).await {
        Err(_) => Err(WriteError::Timeout),
        Ok(Err(e)) => Err(WriteError::Transport(e.to_string())),
        Ok(Ok(())) => Ok(()),
    }
}

/// Drains the client's send queue into the transport and pings periodically.
///
/// A closed queue means the client was unregistered: a CLOSE frame is written
/// and the pump exits.
pub(crate) async fn write_pump<Si>(
    mut sink: Si,
    mut queue: mpsc::Receiver<OutboundFrame>,
    client: Arc<Client>,
) where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let _cancel_on_exit = client.scope().clone().drop_guard();
    let user_id = client.user_id();
    let mut ticker = tokio::time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    loop {
        tokio::select! {
            frame = queue.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = write_frame(&mut sink, Message::Text(frame.into())).await {
                        tracing::warn!(user_id = %user_id, "Failed to write frame: {}", e);
                        break;
                    }
                }
                None => {
                    if let Err(e) = write_frame(&mut sink, Message::Close(None)).await {
                        tracing::debug!(user_id = %user_id, "Failed to write close frame: {}", e);
                    }
                    break;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = write_frame(&mut sink, Message::Ping(Bytes::new())).await {
                    tracing::warn!(user_id = %user_id, "Failed to write ping: {}", e);
                    break;
                }
            }
        }
    }
}
