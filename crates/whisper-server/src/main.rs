//! # Whisper Relay Server
//!
//! Main binary that wires the relay together:
//! - WebSocket relay (auth, routing, groups, signaling)
//! - Admin HTTP surface (health, stats, moderation)
//! - Cross-instance pub/sub fan-in and the background sweeps
//!
//! The server holds no decryption keys, logs no plaintext, and persists
//! no message payload beyond its 72-hour queue TTL.

use std::net::SocketAddr;
use std::sync::Arc;

use whisper_admin::AdminState;
use whisper_push::PushDispatcher;
use whisper_relay::{RelaySettings, RelayState};
use whisper_store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = whisper_common::config::init()?;

    // Initialize tracing (structured logging)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisper=debug,tower_http=info".into()),
        )
        .with_target(true)
        .init();

    tracing::info!("🚀 Starting Whisper relay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("   Zero-knowledge. Keys stay on devices.");

    // === KV store ===
    let store = Store::connect(&config.redis_url).await?;
    tracing::info!("📦 Presence store ready at {}", config.redis_url);

    // === Push dispatcher ===
    let push = PushDispatcher::new(config.apns())?;

    // === Relay components ===
    let settings = RelaySettings {
        turn_secret: config.turn_secret.clone(),
        turn_urls: config.turn_url_list(),
        turn_ttl_secs: config.turn_ttl_secs,
        queue_group_messages: config.queue_group_messages,
    };
    if settings.queue_group_messages {
        tracing::info!("Group messages will be queued for offline members");
    }
    let state = Arc::new(RelayState::new(store, push, settings));

    // Cross-instance fan-in and periodic sweeps.
    tokio::spawn(whisper_relay::pubsub::run(
        state.clone(),
        config.redis_url.clone(),
    ));
    whisper_relay::sweep::spawn_all(state.clone());

    // === Routers ===
    let relay_router = whisper_relay::build_router(state.clone());
    let relay_addr = SocketAddr::new(config.host.parse()?, config.port);

    let admin_router = whisper_admin::build_router(AdminState {
        relay: state,
        api_key: config.admin_api_key.clone(),
    });
    let admin_addr = SocketAddr::new(config.host.parse()?, config.admin_port);

    tracing::info!("🔌 Relay listening on ws://{relay_addr}/ws");
    tracing::info!("🩺 Admin surface on http://{admin_addr}");

    // Run both servers concurrently
    tokio::try_join!(
        async {
            let listener = tokio::net::TcpListener::bind(relay_addr).await?;
            axum::serve(listener, relay_router).await?;
            Ok::<_, anyhow::Error>(())
        },
        async {
            let listener = tokio::net::TcpListener::bind(admin_addr).await?;
            axum::serve(listener, admin_router).await?;
            Ok::<_, anyhow::Error>(())
        },
    )?;

    Ok(())
}
