//! Server state and dependency wiring.

use std::sync::Arc;

use tsudoi_shared::time::Clock;

use crate::{
    domain::{Cache, MessageRepository, PubSub, RoomRepository, UserRepository},
    infrastructure::{
        cache::InMemoryCache, pubsub::InMemoryPubSub, repository::InMemoryStore,
    },
    usecase::{
        ActivityThrottle, ConnectionRegistry, DmRoomBootstrap, MessageHandler, PresenceReconciler,
        PresenceService, RoomManager,
    },
};

use super::handler::ActionDispatcher;

/// Ports the server is built from
#[derive(Clone)]
pub struct Dependencies {
    pub message_repository: Arc<dyn MessageRepository>,
    pub room_repository: Arc<dyn RoomRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub cache: Arc<dyn Cache>,
    pub pubsub: Arc<dyn PubSub>,
    pub clock: Arc<dyn Clock>,
}

impl Dependencies {
    /// 単一プロセス構成（インメモリのストア・キャッシュ・pub/sub）
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            message_repository: store.clone(),
            room_repository: store.clone(),
            user_repository: store,
            cache: Arc::new(InMemoryCache::with_clock(clock.clone())),
            pubsub: Arc::new(InMemoryPubSub::new()),
            clock,
        }
    }
}

/// Shared application state
pub struct AppState {
    /// 接続中クライアントの索引
    pub registry: Arc<ConnectionRegistry>,
    /// ルームとファンアウト
    pub room_manager: Arc<RoomManager>,
    pub dispatcher: ActionDispatcher,
    pub activity: ActivityThrottle,
    pub presence: PresenceService,
    pub reconciler: Arc<PresenceReconciler>,
    /// 履歴 API 用
    pub message_repository: Arc<dyn MessageRepository>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Build every usecase from the given ports.
    ///
    /// Must be called inside a Tokio runtime: the registry spawns its
    /// register and unregister tasks here.
    pub fn new(deps: Dependencies) -> Self {
        let Dependencies {
            message_repository,
            room_repository,
            user_repository,
            cache,
            pubsub,
            clock,
        } = deps;

        let registry = Arc::new(ConnectionRegistry::new(clock.clone()));
        let room_manager = Arc::new(RoomManager::new(
            room_repository.clone(),
            cache.clone(),
            pubsub.clone(),
            clock.clone(),
        ));
        let message_handler = Arc::new(MessageHandler::new(
            message_repository.clone(),
            room_repository.clone(),
            pubsub,
            room_manager.clone(),
            clock.clone(),
        ));
        let dm_bootstrap = Arc::new(DmRoomBootstrap::new(
            room_repository,
            cache.clone(),
            clock.clone(),
        ));
        let dispatcher = ActionDispatcher::new(
            room_manager.clone(),
            message_handler,
            dm_bootstrap,
            clock.clone(),
        );

        Self {
            registry,
            room_manager,
            dispatcher,
            activity: ActivityThrottle::new(user_repository.clone(), cache.clone(), clock.clone()),
            presence: PresenceService::new(user_repository.clone(), cache, clock.clone()),
            reconciler: Arc::new(PresenceReconciler::new(user_repository, clock.clone())),
            message_repository,
            clock,
        }
    }
}
