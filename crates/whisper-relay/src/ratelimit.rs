//! Typing-indicator throttle.
//!
//! At most one typing frame per (sender, recipient) pair per 2 seconds.
//! The window is instance-local, like the session it throttles.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use whisper_common::ids::WhisperId;

/// Minimum spacing between accepted typing frames for one pair.
pub const TYPING_WINDOW_MS: i64 = 2_000;

#[derive(Clone, Default)]
pub struct TypingLimiter {
    last_sent: Arc<Mutex<HashMap<(WhisperId, WhisperId), i64>>>,
}

impl TypingLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt. Returns true when the frame is inside the
    /// allowance and updates the window start.
    pub async fn allow(&self, sender: &WhisperId, recipient: &WhisperId, now_ms: i64) -> bool {
        let mut map = self.last_sent.lock().await;
        let key = (sender.clone(), recipient.clone());
        match map.get(&key) {
            Some(last) if now_ms - last < TYPING_WINDOW_MS => false,
            _ => {
                map.insert(key, now_ms);
                true
            }
        }
    }

    /// Drop all pairs involving a disconnected user.
    pub async fn prune_user(&self, wid: &WhisperId) {
        self.last_sent
            .lock()
            .await
            .retain(|(from, to), _| from != wid && to != wid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wid(s: &str) -> WhisperId {
        WhisperId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn second_frame_inside_window_is_rejected() {
        let limiter = TypingLimiter::new();
        let (a, b) = (wid("WSP-AAAA-AAAA-AAAA"), wid("WSP-BBBB-BBBB-BBBB"));

        assert!(limiter.allow(&a, &b, 0).await);
        assert!(!limiter.allow(&a, &b, 1_000).await);
        // 2.5s after the first accepted frame: allowed again.
        assert!(limiter.allow(&a, &b, 2_500).await);
    }

    #[tokio::test]
    async fn rejected_frame_does_not_restart_the_window() {
        let limiter = TypingLimiter::new();
        let (a, b) = (wid("WSP-AAAA-AAAA-AAAA"), wid("WSP-BBBB-BBBB-BBBB"));

        assert!(limiter.allow(&a, &b, 0).await);
        assert!(!limiter.allow(&a, &b, 1_999).await);
        assert!(limiter.allow(&a, &b, 2_000).await, "window counts from the accepted frame");
    }

    #[tokio::test]
    async fn pairs_are_directional_and_independent() {
        let limiter = TypingLimiter::new();
        let (a, b) = (wid("WSP-AAAA-AAAA-AAAA"), wid("WSP-BBBB-BBBB-BBBB"));

        assert!(limiter.allow(&a, &b, 0).await);
        assert!(limiter.allow(&b, &a, 0).await, "reverse direction unthrottled");
    }

    #[tokio::test]
    async fn prune_clears_both_directions() {
        let limiter = TypingLimiter::new();
        let (a, b) = (wid("WSP-AAAA-AAAA-AAAA"), wid("WSP-BBBB-BBBB-BBBB"));
        limiter.allow(&a, &b, 0).await;
        limiter.allow(&b, &a, 0).await;
        limiter.prune_user(&a).await;
        assert!(limiter.allow(&a, &b, 1).await, "window cleared by prune");
    }
}
