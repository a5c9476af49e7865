//! # whisper-store
//!
//! The one thin adapter every other component consumes the KV store
//! through. Holds presence, identity and push-token directories, the
//! offline message queue, group membership, the durable block mirror, and
//! moderation state. The pending-call queue is in-memory (60-second
//! lifetime, instance-local) and lives here too so the relay and admin
//! crates share it.
//!
//! Keyspace, prefixed for isolation:
//!
//! | key | value |
//! |---|---|
//! | `presence:<wid>` | socket id, 5-minute TTL |
//! | `socket:<sid>` | whisper id reverse binding |
//! | `registered:<wid>` | auth marker, 24-hour TTL |
//! | `push:<wid>` | JSON `{token, platform}` |
//! | `voip:<wid>` | iOS VoIP token |
//! | `lastseen:<wid>` | Unix milliseconds |
//! | `pubkey:<wid>` / `signkey:<wid>` | base64 public keys |
//! | `queue:<wid>` | LIST of message ids, FIFO |
//! | `msg:<mid>` | JSON envelope, 72-hour TTL |
//! | `group:<gid>` / `gmembers:<gid>` / `ugroups:<wid>` | group store |
//! | `ginvite:<wid>:<gid>` | pending group invite |
//! | `blocks:<wid>` | SET, durable mirror of the block registry |
//! | `banned:<wid>` | moderation flag |
//! | `reports` | LIST, moderation inbox |
//!
//! Pub/sub channels: `messages`, `calls`, `presence`.

pub mod blocks;
pub mod calls;
pub mod directory;
pub mod groups;
pub mod moderation;
pub mod presence;
pub mod queue;

use redis::aio::ConnectionManager;

/// Cross-instance pub/sub channel for 1:1 and group message frames.
pub const CHANNEL_MESSAGES: &str = "messages";
/// Cross-instance pub/sub channel for call signaling frames.
pub const CHANNEL_CALLS: &str = "calls";
/// Cross-instance pub/sub channel for presence and session-control frames.
pub const CHANNEL_PRESENCE: &str = "presence";

/// Handle to the KV store. Cheap to clone; all methods multiplex over one
/// managed connection.
#[derive(Clone)]
pub struct Store {
    conn: ConnectionManager,
}

impl Store {
    /// Connect and start the reconnecting connection manager.
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    /// A fresh handle on the underlying multiplexed connection.
    pub(crate) fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Liveness probe for the health endpoint.
    pub async fn ping(&self) -> bool {
        let mut conn = self.conn();
        let pong: Result<String, redis::RedisError> =
            redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }

    /// Publish a routed frame on a cross-instance channel.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        redis::AsyncCommands::publish(&mut conn, channel, payload).await
    }

    /// Collect keys matching a pattern. SCAN-based, never blocks the server.
    pub(crate) async fn keys_matching(
        &self,
        pattern: &str,
    ) -> Result<Vec<String>, redis::RedisError> {
        use redis::AsyncCommands;
        let mut conn = self.conn();
        let mut iter = conn.scan_match::<_, String>(pattern).await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}
