//! Realtime messaging server.
//!
//! Clients connect over WebSocket, join channel / DM rooms and exchange
//! messages. With `--redis-url` the cache and pub/sub go through Redis so
//! several nodes can share rooms; otherwise everything stays in process.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin tsudoi-server
//! cargo run --bin tsudoi-server -- --host 0.0.0.0 --port 3000 --redis-url redis://127.0.0.1:6379
//! cargo run --bin tsudoi-server -- --seed demos/seed.json
//! ```

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tsudoi_server::{
    domain::{Cache, PubSub},
    infrastructure::{
        cache::{InMemoryCache, RedisCache},
        pubsub::{InMemoryPubSub, RedisPubSub},
        repository::{InMemoryStore, SeedData},
    },
    ui::{Dependencies, Server},
};
use tsudoi_shared::{
    logger::setup_logger,
    time::{Clock, SystemClock},
};

#[derive(Parser, Debug)]
#[command(name = "tsudoi-server")]
#[command(about = "Realtime messaging server (WebSocket rooms with pub/sub fan-out)", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Redis URL for the shared cache and pub/sub (in-process when omitted)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// JSON file with servers, members, channels and DM rooms to load at startup
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Default log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), &args.log_level);

    // Initialize dependencies in order:
    // 1. Clock
    // 2. Store (repositories)
    // 3. Cache and pub/sub
    // 4. Server

    // 1. Clock
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // 2. Store (in-memory document store)
    let store = Arc::new(InMemoryStore::new());
    if let Some(path) = &args.seed {
        let seed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|json| SeedData::from_json(&json).map_err(|e| e.to_string()))
            .unwrap_or_else(|e| {
                tracing::error!("Failed to read seed file {}: {}", path.display(), e);
                std::process::exit(1);
            });
        if let Err(e) = store.load_seed(seed, clock.now()).await {
            tracing::error!("Failed to load seed data: {}", e);
            std::process::exit(1);
        }
        tracing::info!("Loaded seed data from {}", path.display());
    }

    // 3. Cache and pub/sub
    let (cache, pubsub): (Arc<dyn Cache>, Arc<dyn PubSub>) = match &args.redis_url {
        Some(url) => {
            let cache = RedisCache::open(url).unwrap_or_else(|e| {
                tracing::error!("Invalid Redis URL: {}", e);
                std::process::exit(1);
            });
            let pubsub = RedisPubSub::open(url).unwrap_or_else(|e| {
                tracing::error!("Invalid Redis URL: {}", e);
                std::process::exit(1);
            });
            tracing::info!("Using Redis cache and pub/sub at {}", url);
            (Arc::new(cache), Arc::new(pubsub))
        }
        None => {
            tracing::info!("No Redis URL given, using in-process cache and pub/sub");
            (
                Arc::new(InMemoryCache::with_clock(clock.clone())),
                Arc::new(InMemoryPubSub::new()),
            )
        }
    };

    // 4. Create and run the server
    let server = Server::new(Dependencies {
        message_repository: store.clone(),
        room_repository: store.clone(),
        user_repository: store,
        cache,
        pubsub,
        clock,
    });
    if let Err(e) = server.run(args.host, args.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
