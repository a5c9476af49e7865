//! # whisper-relay
//!
//! Real-time WebSocket relay for Whisper. Handles:
//! - challenge-response authentication (Ed25519 proof of key possession)
//! - 1:1 routing with offline queueing and paginated backfill
//! - group membership and fan-out
//! - WebRTC call signaling and TURN credential minting
//! - blocks, typing throttles, and push wake-ups for offline peers
//!
//! The server never sees plaintext: every content field is an opaque
//! base64 blob relayed or queued verbatim.
//!
//! Components are explicit values created at startup and shared through
//! [`RelayState`]; there is no global mutable state, and cross-component
//! notifications flow through the store's pub/sub channels.

pub mod account;
pub mod auth;
pub mod groups;
pub mod handler;
pub mod protocol;
pub mod pubsub;
pub mod ratelimit;
pub mod router;
pub mod session;
pub mod signaling;
pub mod sweep;

use std::sync::Arc;

use axum::{routing::get, Router};
use whisper_push::PushDispatcher;
use whisper_store::blocks::BlockRegistry;
use whisper_store::calls::CallOfferQueue;
use whisper_store::Store;

use crate::auth::ChallengeStore;
use crate::ratelimit::TypingLimiter;
use crate::session::ConnectionManager;
use crate::signaling::ActiveCalls;

/// Relay-level knobs resolved from configuration at startup.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Shared HMAC secret for TURN credential minting; empty disables it.
    pub turn_secret: String,
    pub turn_urls: Vec<String>,
    pub turn_ttl_secs: u64,
    /// Queue group ciphertext for offline members (default: best-effort
    /// real-time only).
    pub queue_group_messages: bool,
}

/// Everything a socket handler needs, wired once at startup.
pub struct RelayState {
    pub store: Store,
    pub blocks: BlockRegistry,
    pub connections: ConnectionManager,
    pub challenges: ChallengeStore,
    pub offers: CallOfferQueue,
    pub calls: ActiveCalls,
    pub typing: TypingLimiter,
    pub push: PushDispatcher,
    pub settings: RelaySettings,
}

impl RelayState {
    pub fn new(store: Store, push: PushDispatcher, settings: RelaySettings) -> Self {
        Self {
            blocks: BlockRegistry::new(store.clone()),
            connections: ConnectionManager::new(),
            challenges: ChallengeStore::new(),
            offers: CallOfferQueue::new(),
            calls: ActiveCalls::new(),
            typing: TypingLimiter::new(),
            store,
            push,
            settings,
        }
    }
}

/// Build the relay WebSocket router.
pub fn build_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/ws", get(handler::ws_handler))
        .with_state(state)
}

/// Close a user's live socket (if bound here) and run the disconnect
/// cleanup. Used by the admin surface for bans and forced deletions.
pub async fn force_disconnect(
    state: &RelayState,
    wid: &whisper_common::ids::WhisperId,
    code: u16,
    reason: &'static str,
) {
    if let Some(session) = state.connections.get(wid).await {
        session.out.close(code, reason);
        handler::cleanup_session(state, wid, &session.socket_id).await;
    }
}

/// Server clock, Unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
