//! Pending call offers.
//!
//! At most one per callee, 60-second TTL, superseded by a newer offer,
//! consumed exactly once when the callee comes online. Instance-local and
//! in-memory: the offer's lifetime is shorter than any failover window, so
//! it never touches the KV store.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use whisper_common::ids::WhisperId;

/// How long an undelivered offer survives.
pub const OFFER_TTL_MS: i64 = 60_000;

/// A queued incoming-call offer for an offline callee.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOffer {
    pub call_id: String,
    pub from: WhisperId,
    /// Opaque SDP offer blob.
    pub offer: serde_json::Value,
    pub is_video: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_name: Option<String>,
    pub timestamp: i64,
    pub expires_at: i64,
}

impl CallOffer {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }
}

/// Keyed by callee; a new offer supersedes the previous one.
#[derive(Clone, Default)]
pub struct CallOfferQueue {
    inner: Arc<RwLock<HashMap<WhisperId, CallOffer>>>,
}

impl CallOfferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an offer, superseding any previous offer for this callee.
    pub async fn put(&self, callee: WhisperId, offer: CallOffer) {
        self.inner.write().await.insert(callee, offer);
    }

    /// Consume the pending offer for a callee, if one is still live.
    pub async fn take(&self, callee: &WhisperId, now_ms: i64) -> Option<CallOffer> {
        let offer = self.inner.write().await.remove(callee)?;
        if offer.is_expired(now_ms) {
            None
        } else {
            Some(offer)
        }
    }

    /// Drop expired offers. Runs every 10 seconds.
    pub async fn sweep(&self, now_ms: i64) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.len();
        inner.retain(|_, offer| !offer.is_expired(now_ms));
        before - inner.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(call_id: &str, now_ms: i64) -> CallOffer {
        CallOffer {
            call_id: call_id.into(),
            from: WhisperId::parse("WSP-CALL-ERAA-0001").unwrap(),
            offer: serde_json::json!({"sdp": "v=0..."}),
            is_video: false,
            caller_name: None,
            timestamp: now_ms,
            expires_at: now_ms + OFFER_TTL_MS,
        }
    }

    #[tokio::test]
    async fn take_consumes_exactly_once() {
        let q = CallOfferQueue::new();
        let callee = WhisperId::parse("WSP-AAAA-BBBB-CCCC").unwrap();
        q.put(callee.clone(), offer("c1", 0)).await;
        assert_eq!(q.take(&callee, 1).await.unwrap().call_id, "c1");
        assert!(q.take(&callee, 1).await.is_none());
    }

    #[tokio::test]
    async fn newer_offer_supersedes() {
        let q = CallOfferQueue::new();
        let callee = WhisperId::parse("WSP-AAAA-BBBB-CCCC").unwrap();
        q.put(callee.clone(), offer("c1", 0)).await;
        q.put(callee.clone(), offer("c2", 5)).await;
        assert_eq!(q.take(&callee, 10).await.unwrap().call_id, "c2");
    }

    #[tokio::test]
    async fn expired_offer_is_discarded() {
        let q = CallOfferQueue::new();
        let callee = WhisperId::parse("WSP-AAAA-BBBB-CCCC").unwrap();
        q.put(callee.clone(), offer("c1", 0)).await;
        assert!(q.take(&callee, OFFER_TTL_MS + 1).await.is_none());
    }

    #[tokio::test]
    async fn sweep_drops_only_expired() {
        let q = CallOfferQueue::new();
        let a = WhisperId::parse("WSP-AAAA-AAAA-AAAA").unwrap();
        let b = WhisperId::parse("WSP-BBBB-BBBB-BBBB").unwrap();
        q.put(a.clone(), offer("c1", 0)).await;
        let mut late = offer("c2", 30_000);
        late.expires_at = 30_000 + OFFER_TTL_MS;
        q.put(b.clone(), late).await;

        assert_eq!(q.sweep(OFFER_TTL_MS + 1).await, 1);
        assert_eq!(q.len().await, 1);
        assert!(q.take(&b, OFFER_TTL_MS + 2).await.is_some());
    }
}
