//! Live session tracking.
//!
//! One socket per Whisper ID: a new authenticated registration evicts any
//! prior session with close code 1000 and reason "New connection
//! established". The map is local to this instance; cross-instance
//! visibility goes through the presence store and pub/sub.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use whisper_common::ids::WhisperId;

use crate::protocol::{PrivacyPrefs, ServerFrame};

/// Outbound frames buffered per socket. A saturated buffer means the
/// client is not draining; the writer's per-frame timeout then culls it.
pub const OUTBOUND_BUFFER: usize = 256;

/// Close after this long without a ping.
pub const PING_CUTOFF_MS: i64 = 2 * 60 * 1000;

/// What the per-socket writer task consumes.
#[derive(Debug)]
pub enum Outbound {
    Frame(ServerFrame),
    Close { code: u16, reason: &'static str },
}

/// Cheap handle for pushing frames at a socket from any task.
#[derive(Clone, Debug)]
pub struct OutboundHandle {
    tx: mpsc::Sender<Outbound>,
}

impl OutboundHandle {
    pub fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self { tx }
    }

    /// Queue a frame. Returns false when the socket is gone or its buffer
    /// is saturated; the frame is dropped, never buffered unboundedly.
    pub fn send(&self, frame: ServerFrame) -> bool {
        match self.tx.try_send(Outbound::Frame(frame)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Outbound buffer full; dropping frame for slow socket");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a close. The writer stops after transmitting it.
    pub fn close(&self, code: u16, reason: &'static str) {
        let _ = self.tx.try_send(Outbound::Close { code, reason });
    }
}

/// A live authenticated WebSocket.
#[derive(Clone)]
pub struct Session {
    pub socket_id: String,
    pub whisper_id: WhisperId,
    pub connected_at: i64,
    last_ping_ms: Arc<AtomicI64>,
    pub prefs: PrivacyPrefs,
    pub platform: Option<String>,
    pub push_token: Option<String>,
    pub voip_token: Option<String>,
    pub out: OutboundHandle,
}

impl Session {
    pub fn touch_ping(&self, now_ms: i64) {
        self.last_ping_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn last_ping_ms(&self) -> i64 {
        self.last_ping_ms.load(Ordering::Relaxed)
    }
}

/// Builder-ish constructor keeping the field list in one place.
#[allow(clippy::too_many_arguments)]
pub fn new_session(
    socket_id: String,
    whisper_id: WhisperId,
    now_ms: i64,
    prefs: PrivacyPrefs,
    platform: Option<String>,
    push_token: Option<String>,
    voip_token: Option<String>,
    out: OutboundHandle,
) -> Session {
    Session {
        socket_id,
        whisper_id,
        connected_at: now_ms,
        last_ping_ms: Arc::new(AtomicI64::new(now_ms)),
        prefs,
        platform,
        push_token,
        voip_token,
        out,
    }
}

/// Tracks all sessions bound on this instance.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    sessions: Arc<RwLock<HashMap<WhisperId, Session>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a freshly authenticated session. Any prior session for the
    /// same user is returned so the caller can close it ("superseded").
    pub async fn register(&self, session: Session) -> Option<Session> {
        self.sessions
            .write()
            .await
            .insert(session.whisper_id.clone(), session)
    }

    /// Remove a binding, but only if it still belongs to `socket_id`. A
    /// superseded socket's late disconnect must not unbind its successor.
    pub async fn remove_if_current(&self, wid: &WhisperId, socket_id: &str) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        if sessions.get(wid).is_some_and(|s| s.socket_id == socket_id) {
            sessions.remove(wid)
        } else {
            None
        }
    }

    pub async fn get(&self, wid: &WhisperId) -> Option<Session> {
        self.sessions.read().await.get(wid).cloned()
    }

    /// Whether this instance holds a live socket for the user.
    pub async fn is_local(&self, wid: &WhisperId) -> bool {
        self.sessions.read().await.contains_key(wid)
    }

    /// Queue a frame for a locally bound user. Returns false when the user
    /// is not bound here or the socket is saturated.
    pub async fn send(&self, wid: &WhisperId, frame: ServerFrame) -> bool {
        match self.sessions.read().await.get(wid) {
            Some(session) => session.out.send(frame),
            None => false,
        }
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Sessions whose last ping is older than the cutoff.
    pub async fn stale_sessions(&self, now_ms: i64) -> Vec<Session> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| now_ms - s.last_ping_ms() > PING_CUTOFF_MS)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(wid: &str, socket: &str) -> (Session, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let s = new_session(
            socket.into(),
            WhisperId::parse(wid).unwrap(),
            0,
            PrivacyPrefs::default(),
            None,
            None,
            None,
            OutboundHandle::new(tx),
        );
        (s, rx)
    }

    #[tokio::test]
    async fn register_returns_evicted_prior_session() {
        let manager = ConnectionManager::new();
        let (old, _old_rx) = session("WSP-AAAA-BBBB-CCCC", "s1");
        let (new, _new_rx) = session("WSP-AAAA-BBBB-CCCC", "s2");

        assert!(manager.register(old).await.is_none());
        let evicted = manager.register(new).await.expect("old session evicted");
        assert_eq!(evicted.socket_id, "s1");
        assert_eq!(manager.active_count().await, 1);
    }

    #[tokio::test]
    async fn late_disconnect_of_superseded_socket_keeps_successor() {
        let manager = ConnectionManager::new();
        let wid = WhisperId::parse("WSP-AAAA-BBBB-CCCC").unwrap();
        let (old, _old_rx) = session("WSP-AAAA-BBBB-CCCC", "s1");
        let (new, _new_rx) = session("WSP-AAAA-BBBB-CCCC", "s2");
        manager.register(old).await;
        manager.register(new).await;

        assert!(manager.remove_if_current(&wid, "s1").await.is_none());
        assert!(manager.is_local(&wid).await);
        assert!(manager.remove_if_current(&wid, "s2").await.is_some());
        assert!(!manager.is_local(&wid).await);
    }

    #[tokio::test]
    async fn stale_sessions_filters_on_ping_age() {
        let manager = ConnectionManager::new();
        let (fresh, _rx1) = session("WSP-AAAA-AAAA-AAAA", "s1");
        let (stale, _rx2) = session("WSP-BBBB-BBBB-BBBB", "s2");
        fresh.touch_ping(PING_CUTOFF_MS + 1000);
        manager.register(fresh).await;
        manager.register(stale).await;

        let found = manager.stale_sessions(PING_CUTOFF_MS + 1001).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].socket_id, "s2");
    }

    #[tokio::test]
    async fn send_reports_delivery_to_bound_sockets_only() {
        let manager = ConnectionManager::new();
        let wid = WhisperId::parse("WSP-AAAA-BBBB-CCCC").unwrap();
        let other = WhisperId::parse("WSP-XXXX-YYYY-ZZZZ").unwrap();
        let (s, mut rx) = session("WSP-AAAA-BBBB-CCCC", "s1");
        manager.register(s).await;

        assert!(manager.send(&wid, ServerFrame::Pong { timestamp: 1 }).await);
        assert!(!manager.send(&other, ServerFrame::Pong { timestamp: 2 }).await);
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Frame(ServerFrame::Pong { timestamp: 1 }))
        ));
    }
}
