//! Block registry: in-memory read-through cache over a durable KV mirror.
//!
//! The KV SET `blocks:<wid>` is the source of truth. The local map is
//! filled on first check per user and dropped on disconnect, so
//! cross-instance block changes surface at the next session at latest,
//! and the hot path (every routed frame) stays off the network.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use redis::AsyncCommands;
use tokio::sync::RwLock;
use whisper_common::ids::WhisperId;

use crate::Store;

fn blocks_key(wid: &WhisperId) -> String {
    format!("blocks:{wid}")
}

/// Per-user block sets with a durable mirror.
#[derive(Clone)]
pub struct BlockRegistry {
    store: Store,
    cache: Arc<RwLock<HashMap<WhisperId, HashSet<WhisperId>>>>,
}

impl BlockRegistry {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Whether `blocker` has blocked `other`.
    pub async fn is_blocked(
        &self,
        blocker: &WhisperId,
        other: &WhisperId,
    ) -> Result<bool, redis::RedisError> {
        if let Some(set) = self.cache.read().await.get(blocker) {
            return Ok(set.contains(other));
        }
        let set = self.load(blocker).await?;
        let contains = set.contains(other);
        self.cache.write().await.insert(blocker.clone(), set);
        Ok(contains)
    }

    /// Persist a block and update the cache.
    pub async fn block(
        &self,
        blocker: &WhisperId,
        blocked: &WhisperId,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.store.conn();
        let _: () = conn.sadd(blocks_key(blocker), blocked.as_str()).await?;
        if let Some(set) = self.cache.write().await.get_mut(blocker) {
            set.insert(blocked.clone());
        }
        Ok(())
    }

    /// Remove a block and update the cache.
    pub async fn unblock(
        &self,
        blocker: &WhisperId,
        blocked: &WhisperId,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.store.conn();
        let _: () = conn.srem(blocks_key(blocker), blocked.as_str()).await?;
        if let Some(set) = self.cache.write().await.get_mut(blocker) {
            set.remove(blocked);
        }
        Ok(())
    }

    /// Drop the cached set for a user (disconnect).
    pub async fn forget(&self, wid: &WhisperId) {
        self.cache.write().await.remove(wid);
    }

    /// Clear all blocks involving a user in either direction
    /// (account deletion). The reverse direction walks every mirror set.
    pub async fn purge_user(&self, wid: &WhisperId) -> Result<(), redis::RedisError> {
        let mut conn = self.store.conn();
        let _: () = conn.del(blocks_key(wid)).await?;
        for key in self.store.keys_matching("blocks:*").await? {
            let _: () = conn.srem(&key, wid.as_str()).await?;
        }
        let mut cache = self.cache.write().await;
        cache.remove(wid);
        for set in cache.values_mut() {
            set.remove(wid);
        }
        Ok(())
    }

    async fn load(&self, blocker: &WhisperId) -> Result<HashSet<WhisperId>, redis::RedisError> {
        let mut conn = self.store.conn();
        let raw: Vec<String> = conn.smembers(blocks_key(blocker)).await?;
        Ok(raw
            .into_iter()
            .filter_map(|s| WhisperId::parse(&s).ok())
            .collect())
    }
}
