//! Server execution logic.

use std::{future::Future, sync::Arc, time::Duration};

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::{
    handler::{get_room_messages, get_rooms, health_check, websocket_handler},
    signal::shutdown_signal,
    state::{AppState, Dependencies},
};

/// Deadline for background tasks once the listener has stopped
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Build the HTTP/WebSocket router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // WebSocket エンドポイント
        .route("/ws", get(websocket_handler))
        // HTTP エンドポイント
        .route("/api/health", get(health_check))
        .route("/api/rooms", get(get_rooms))
        .route(
            "/api/rooms/{room_type}/{room_id}/messages",
            get(get_room_messages),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Realtime messaging server
///
/// # Example
///
/// ```ignore
/// let server = Server::new(Dependencies::in_memory(Arc::new(SystemClock)));
/// server.run("127.0.0.1".to_string(), 8080).await?;
/// ```
pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    /// Create a new Server instance
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(dependencies: Dependencies) -> Self {
        Self {
            state: Arc::new(AppState::new(dependencies)),
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Run the server until SIGINT or SIGTERM
    ///
    /// # Arguments
    ///
    /// * `host` - The host address to bind to (e.g., "127.0.0.1")
    /// * `port` - The port number to bind to (e.g., 8080)
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the specified address or
    /// if there's an error during server execution.
    pub async fn run(self, host: String, port: u16) -> Result<(), Box<dyn std::error::Error>> {
        // Bind the server to the host and port
        let bind_addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&bind_addr).await?;

        tracing::info!("Realtime server listening on {}", listener.local_addr()?);
        tracing::info!("Connect to: ws://{}/ws?user_id=<id>", bind_addr);
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        self.serve(listener, shutdown_signal()).await?;
        Ok(())
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// On shutdown the background tasks are cancelled, every client is
    /// unregistered (each receives a CLOSE frame) and every room is closed.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = self.state;
        let root = CancellationToken::new();
        let background = [
            state.registry.start_health_checker(root.child_token()),
            state.reconciler.clone().run(root.child_token()),
        ];

        let shutdown_state = state.clone();
        let shutdown_root = root.clone();
        axum::serve(listener, router(state.clone()))
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutting down: closing client connections");
                shutdown_root.cancel();
                shutdown_state.registry.shutdown().await;
            })
            .await?;

        // --- Post-shutdown cleanup ---
        tracing::info!("Server stopped accepting connections, cleaning up");
        root.cancel();
        let drain = async {
            for handle in background {
                let _ = handle.await;
            }
            state.room_manager.shutdown().await;
        };
        if tokio::time::timeout(SHUTDOWN_DEADLINE, drain).await.is_err() {
            tracing::warn!("Background tasks did not stop within {:?}", SHUTDOWN_DEADLINE);
        }

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}
