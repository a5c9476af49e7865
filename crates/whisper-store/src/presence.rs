//! Presence tiers and socket bindings.
//!
//! Two levels of presence:
//! - **Active**: a live WebSocket with a recent ping. 5-minute TTL refreshed
//!   on every ping; drives real-time routing.
//! - **Registered**: authenticated within the last 24 hours. Admin counts
//!   only; does not affect routing.

use redis::AsyncCommands;
use whisper_common::ids::WhisperId;

use crate::Store;

/// TTL for the active-presence entry, refreshed on every ping.
pub const ACTIVE_TTL_SECS: u64 = 300;
/// TTL for the registered marker, refreshed on every authentication.
pub const REGISTERED_TTL_SECS: u64 = 24 * 60 * 60;

fn presence_key(wid: &WhisperId) -> String {
    format!("presence:{wid}")
}

fn socket_key(socket_id: &str) -> String {
    format!("socket:{socket_id}")
}

fn registered_key(wid: &WhisperId) -> String {
    format!("registered:{wid}")
}

fn lastseen_key(wid: &WhisperId) -> String {
    format!("lastseen:{wid}")
}

impl Store {
    /// Mark a user active and bind the socket-id reverse mapping.
    pub async fn mark_active(
        &self,
        wid: &WhisperId,
        socket_id: &str,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(presence_key(wid), socket_id, ACTIVE_TTL_SECS)
            .await?;
        let _: () = conn
            .set_ex(socket_key(socket_id), wid.as_str(), ACTIVE_TTL_SECS)
            .await?;
        Ok(())
    }

    /// Refresh the active-presence TTL on ping.
    pub async fn refresh_active(
        &self,
        wid: &WhisperId,
        socket_id: &str,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        let _: () = conn
            .expire(presence_key(wid), ACTIVE_TTL_SECS as i64)
            .await?;
        let _: () = conn
            .expire(socket_key(socket_id), ACTIVE_TTL_SECS as i64)
            .await?;
        Ok(())
    }

    /// Remove the active entry and socket binding on disconnect.
    pub async fn clear_active(
        &self,
        wid: &WhisperId,
        socket_id: &str,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        let _: () = conn.del(presence_key(wid)).await?;
        let _: () = conn.del(socket_key(socket_id)).await?;
        Ok(())
    }

    /// Whether any instance currently holds a live socket for this user.
    pub async fn is_active(&self, wid: &WhisperId) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn();
        conn.exists(presence_key(wid)).await
    }

    /// Refresh the 24-hour registered marker on authentication.
    pub async fn mark_registered(&self, wid: &WhisperId) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        conn.set_ex(registered_key(wid), 1, REGISTERED_TTL_SECS)
            .await
    }

    /// Count of users authenticated within the last 24 hours.
    pub async fn registered_count(&self) -> Result<usize, redis::RedisError> {
        Ok(self.keys_matching("registered:*").await?.len())
    }

    /// Record the last time this user was seen, in Unix milliseconds.
    pub async fn touch_last_seen(
        &self,
        wid: &WhisperId,
        now_ms: i64,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        conn.set(lastseen_key(wid), now_ms).await
    }

    /// Drop every presence-related key for a user (account deletion).
    pub async fn purge_presence(&self, wid: &WhisperId) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        let _: () = conn
            .del(&[
                presence_key(wid),
                registered_key(wid),
                lastseen_key(wid),
            ])
            .await?;
        Ok(())
    }
}
