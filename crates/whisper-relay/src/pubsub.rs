//! Cross-instance fan-in.
//!
//! The in-memory socket table is local to one instance, so the router
//! publishes `{to, frame}` on the `messages`/`calls` channels and every
//! instance forwards to its local sockets. The `presence` channel carries
//! online/offline events used for cross-instance supersession and cache
//! invalidation.

use std::sync::Arc;

use futures_util::StreamExt;
use whisper_store::{CHANNEL_CALLS, CHANNEL_MESSAGES, CHANNEL_PRESENCE};

use crate::protocol::{PresenceEvent, RoutedFrame};
use crate::RelayState;

/// Run the subscriber loop forever, reconnecting with backoff on failure.
pub async fn run(state: Arc<RelayState>, redis_url: String) {
    loop {
        if let Err(e) = subscribe_and_forward(&state, &redis_url).await {
            tracing::warn!("Pub/sub connection lost: {e}; reconnecting");
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}

async fn subscribe_and_forward(state: &RelayState, redis_url: &str) -> anyhow::Result<()> {
    let client = redis::Client::open(redis_url)?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub
        .subscribe(&[CHANNEL_MESSAGES, CHANNEL_CALLS, CHANNEL_PRESENCE])
        .await?;
    tracing::info!("Subscribed to cross-instance channels");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let channel = msg.get_channel_name().to_owned();
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(channel, "Undecodable pub/sub payload: {e}");
                continue;
            }
        };
        handle_message(state, &channel, &payload).await;
    }
    Ok(())
}

async fn handle_message(state: &RelayState, channel: &str, payload: &str) {
    match channel {
        CHANNEL_MESSAGES | CHANNEL_CALLS => {
            let routed: RoutedFrame = match serde_json::from_str(payload) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(channel, "Dropping undecodable routed frame: {e}");
                    return;
                }
            };
            // Forward only if the target is bound locally; other
            // instances do the same for their sockets.
            state.connections.send(&routed.to, routed.frame).await;
        }
        CHANNEL_PRESENCE => {
            let event: PresenceEvent = match serde_json::from_str(payload) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Dropping undecodable presence event: {e}");
                    return;
                }
            };
            handle_presence(state, event).await;
        }
        other => tracing::debug!(channel = other, "Ignoring unexpected channel"),
    }
}

async fn handle_presence(state: &RelayState, event: PresenceEvent) {
    match event {
        // A user authenticated somewhere. If we hold an older socket for
        // them, it has been superseded.
        PresenceEvent::Online {
            whisper_id,
            socket_id,
        } => {
            let Some(session) = state.connections.get(&whisper_id).await else {
                return;
            };
            if session.socket_id != socket_id {
                tracing::info!(user = %whisper_id, "Session superseded by another instance");
                session.out.close(1000, "New connection established");
                state
                    .connections
                    .remove_if_current(&whisper_id, &session.socket_id)
                    .await;
            }
        }
        // Read-through caches are invalidated on presence changes.
        PresenceEvent::Offline { whisper_id, .. } => {
            state.blocks.forget(&whisper_id).await;
        }
    }
}
