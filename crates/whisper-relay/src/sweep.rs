//! Periodic maintenance tasks.
//!
//! | sweep | interval | what it drops |
//! |---|---|---|
//! | challenges | 60 s | expired pending challenges |
//! | stale sockets | 60 s | sessions without a ping for 2 minutes |
//! | call offers | 10 s | pending offers past their 60-second TTL |
//! | queues | 1 h | queue ids whose envelope TTL already expired |

use std::sync::Arc;
use std::time::Duration;

use crate::{handler, now_ms, RelayState};

/// Spawn every background sweep. Each one is detached and runs for the
/// life of the process.
pub fn spawn_all(state: Arc<RelayState>) {
    tokio::spawn(challenge_sweep(state.clone()));
    tokio::spawn(stale_socket_sweep(state.clone()));
    tokio::spawn(call_offer_sweep(state.clone()));
    tokio::spawn(queue_sweep(state));
}

async fn challenge_sweep(state: Arc<RelayState>) {
    let mut tick = tokio::time::interval(Duration::from_secs(60));
    loop {
        tick.tick().await;
        let dropped = state.challenges.sweep(now_ms()).await;
        if dropped > 0 {
            tracing::debug!(dropped, "Expired pending challenges");
        }
    }
}

async fn stale_socket_sweep(state: Arc<RelayState>) {
    let mut tick = tokio::time::interval(Duration::from_secs(60));
    loop {
        tick.tick().await;
        let now = now_ms();
        for session in state.connections.stale_sessions(now).await {
            tracing::info!(user = %session.whisper_id, "Closing stale connection");
            session.out.close(1000, "stale connection");
            // Cleanup here rather than waiting on the reader: the
            // disconnect path is idempotent and may run again later.
            handler::cleanup_session(&state, &session.whisper_id, &session.socket_id).await;
        }
    }
}

async fn call_offer_sweep(state: Arc<RelayState>) {
    let mut tick = tokio::time::interval(Duration::from_secs(10));
    loop {
        tick.tick().await;
        let dropped = state.offers.sweep(now_ms()).await;
        if dropped > 0 {
            tracing::debug!(dropped, "Expired pending call offers");
        }
    }
}

async fn queue_sweep(state: Arc<RelayState>) {
    let mut tick = tokio::time::interval(Duration::from_secs(60 * 60));
    loop {
        tick.tick().await;
        match state.store.sweep_queues().await {
            Ok(removed) if removed > 0 => {
                tracing::info!(removed, "Swept expired queue entries");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Queue sweep failed: {e}"),
        }
    }
}
