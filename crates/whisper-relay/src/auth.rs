//! Challenge-response authentication.
//!
//! `register` binds a pending challenge (32 random bytes, 30-second
//! expiry) to the socket; `register_proof` must present an Ed25519
//! detached signature over those bytes by the claimed signing key. The
//! challenge is socket-bound and single-use, so a replayed signature
//! cannot hijack a different connection.

use std::collections::HashMap;
use std::sync::Arc;

use rand::RngCore;
use tokio::sync::RwLock;
use whisper_common::ids::WhisperId;
use whisper_common::keys;

use crate::protocol::PrivacyPrefs;

/// Challenge lifetime.
pub const CHALLENGE_TTL_MS: i64 = 30_000;

/// The byte string signed for account deletion is
/// `DELETE_ACCOUNT_PREFIX + timestamp`.
pub const DELETE_CONFIRMATION: &str = "DELETE_MY_ACCOUNT";

/// A claimed identity waiting for its proof.
#[derive(Debug, Clone)]
pub struct PendingChallenge {
    pub whisper_id: WhisperId,
    pub encryption_key: String,
    pub signing_key: String,
    /// Raw challenge bytes the client must sign.
    pub challenge: Vec<u8>,
    pub expires_at: i64,
    // Registration fields carried through to the session on success.
    pub push_token: Option<String>,
    pub voip_token: Option<String>,
    pub platform: Option<String>,
    pub prefs: PrivacyPrefs,
}

impl PendingChallenge {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }

    /// Verify a proof signature against the challenge bytes.
    pub fn verify(&self, signature_b64: &str) -> bool {
        keys::verify_signature(&self.signing_key, signature_b64, &self.challenge).is_ok()
    }
}

/// Pending challenges keyed by socket id.
#[derive(Clone, Default)]
pub struct ChallengeStore {
    inner: Arc<RwLock<HashMap<String, PendingChallenge>>>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh challenge for a socket, replacing any previous one.
    /// Returns the base64 the client is asked to sign.
    #[allow(clippy::too_many_arguments)]
    pub async fn issue(
        &self,
        socket_id: &str,
        whisper_id: WhisperId,
        encryption_key: String,
        signing_key: String,
        now_ms: i64,
        push_token: Option<String>,
        voip_token: Option<String>,
        platform: Option<String>,
        prefs: PrivacyPrefs,
    ) -> String {
        let mut challenge = vec![0u8; 32];
        rand::rng().fill_bytes(&mut challenge);
        let encoded = keys::to_base64(&challenge);

        let pending = PendingChallenge {
            whisper_id,
            encryption_key,
            signing_key,
            challenge,
            expires_at: now_ms + CHALLENGE_TTL_MS,
            push_token,
            voip_token,
            platform,
            prefs,
        };
        self.inner
            .write()
            .await
            .insert(socket_id.to_owned(), pending);
        encoded
    }

    /// Remove and return the pending challenge for a socket. The challenge
    /// is consumed in every terminal case, success or failure.
    pub async fn take(&self, socket_id: &str) -> Option<PendingChallenge> {
        self.inner.write().await.remove(socket_id)
    }

    /// Drop a pending challenge on socket close.
    pub async fn discard(&self, socket_id: &str) {
        self.inner.write().await.remove(socket_id);
    }

    /// Drop expired challenges. Runs every 60 seconds.
    pub async fn sweep(&self, now_ms: i64) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.len();
        inner.retain(|_, c| !c.is_expired(now_ms));
        before - inner.len()
    }
}

/// The exact byte string signed for account deletion.
pub fn deletion_message(timestamp: i64) -> String {
    format!("{DELETE_CONFIRMATION}:{timestamp}")
}

/// Window either side of server time inside which a deletion timestamp is
/// accepted.
pub const DELETE_TIMESTAMP_WINDOW_MS: i64 = 5 * 60 * 1000;

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
    use ed25519_dalek::{Signer, SigningKey};
    use rand_core::OsRng;

    fn wid() -> WhisperId {
        WhisperId::parse("WSP-AAAA-BBBB-CCCC").unwrap()
    }

    async fn issue(store: &ChallengeStore, sk: &SigningKey, now_ms: i64) -> String {
        store
            .issue(
                "sock-1",
                wid(),
                B64.encode([0u8; 32]),
                B64.encode(sk.verifying_key().as_bytes()),
                now_ms,
                None,
                None,
                None,
                PrivacyPrefs::default(),
            )
            .await
    }

    #[tokio::test]
    async fn valid_proof_verifies() {
        let store = ChallengeStore::new();
        let sk = SigningKey::generate(&mut OsRng);
        let challenge_b64 = issue(&store, &sk, 0).await;

        let challenge = B64.decode(&challenge_b64).unwrap();
        assert_eq!(challenge.len(), 32);
        let sig = B64.encode(sk.sign(&challenge).to_bytes());

        let pending = store.take("sock-1").await.unwrap();
        assert!(!pending.is_expired(CHALLENGE_TTL_MS));
        assert!(pending.verify(&sig));
        assert!(store.take("sock-1").await.is_none(), "challenge is single-use");
    }

    #[tokio::test]
    async fn wrong_key_or_tampered_signature_fails() {
        let store = ChallengeStore::new();
        let sk = SigningKey::generate(&mut OsRng);
        let challenge_b64 = issue(&store, &sk, 0).await;
        let challenge = B64.decode(&challenge_b64).unwrap();

        let other = SigningKey::generate(&mut OsRng);
        let wrong_key_sig = B64.encode(other.sign(&challenge).to_bytes());
        let mut tampered = sk.sign(&challenge).to_bytes();
        tampered[10] ^= 0x80;

        let pending = store.take("sock-1").await.unwrap();
        assert!(!pending.verify(&wrong_key_sig));
        assert!(!pending.verify(&B64.encode(tampered)));
    }

    #[tokio::test]
    async fn reissue_supersedes_and_sweep_expires() {
        let store = ChallengeStore::new();
        let sk = SigningKey::generate(&mut OsRng);
        let first = issue(&store, &sk, 0).await;
        let second = issue(&store, &sk, 1_000).await;
        assert_ne!(first, second);

        // The surviving challenge is the second one.
        assert_eq!(store.sweep(1_000 + CHALLENGE_TTL_MS).await, 0);
        assert_eq!(store.sweep(1_001 + CHALLENGE_TTL_MS).await, 1);
        assert!(store.take("sock-1").await.is_none());
    }

    #[test]
    fn deletion_message_is_wire_exact() {
        assert_eq!(deletion_message(1700000000000), "DELETE_MY_ACCOUNT:1700000000000");
    }
}
