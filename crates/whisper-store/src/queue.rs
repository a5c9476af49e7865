//! Offline message queue.
//!
//! Per-recipient LIST of message ids (FIFO by insertion) pointing at
//! `msg:<mid>` JSON envelopes that expire with the 72-hour TTL. Reads are
//! cursor-paginated; the queue key is deleted only after a fully-delivered
//! final page, so partial backfills keep their place.

use redis::AsyncCommands;
use whisper_common::envelope::{QueuedEnvelope, QUEUE_TTL_SECS};
use whisper_common::ids::WhisperId;

use crate::Store;

/// Default backfill page size.
pub const PAGE_SIZE: usize = 50;

fn queue_key(wid: &WhisperId) -> String {
    format!("queue:{wid}")
}

fn msg_key(message_id: &str) -> String {
    format!("msg:{message_id}")
}

/// One page of a cursor-paginated backfill read.
#[derive(Debug)]
pub struct QueuePage {
    pub messages: Vec<QueuedEnvelope>,
    pub cursor: usize,
    pub next_cursor: usize,
    pub has_more: bool,
}

impl Store {
    /// Append an envelope to the recipient's queue.
    pub async fn enqueue(
        &self,
        recipient: &WhisperId,
        queued: &QueuedEnvelope,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        let json = serde_json::to_string(queued).map_err(|e| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "envelope encode", e.to_string()))
        })?;
        let _: () = conn
            .set_ex(
                msg_key(&queued.envelope.message_id),
                json,
                QUEUE_TTL_SECS as u64,
            )
            .await?;
        let _: () = conn
            .rpush(queue_key(recipient), &queued.envelope.message_id)
            .await?;
        Ok(())
    }

    /// Read one page starting at `cursor` (FIFO by insertion). Expired or
    /// missing envelopes are skipped but still advance the cursor.
    pub async fn queue_page(
        &self,
        recipient: &WhisperId,
        cursor: usize,
        page_size: usize,
    ) -> Result<QueuePage, redis::RedisError> {
        let mut conn = self.conn();
        let key = queue_key(recipient);
        let total: usize = conn.llen(&key).await?;

        let stop = cursor + page_size;
        let ids: Vec<String> = if cursor >= total {
            Vec::new()
        } else {
            conn.lrange(&key, cursor as isize, stop as isize - 1).await?
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut messages = Vec::with_capacity(ids.len());
        for id in &ids {
            let raw: Option<String> = conn.get(msg_key(id)).await?;
            let Some(raw) = raw else { continue };
            match serde_json::from_str::<QueuedEnvelope>(&raw) {
                Ok(env) if !env.is_expired(now_ms) => messages.push(env),
                Ok(_) => {}
                Err(e) => tracing::warn!(message_id = %id, "Dropping undecodable queued envelope: {e}"),
            }
        }

        let next_cursor = (cursor + ids.len()).min(total);
        Ok(QueuePage {
            messages,
            cursor,
            next_cursor,
            has_more: next_cursor < total,
        })
    }

    /// Number of ids currently queued for a recipient.
    pub async fn queue_len(&self, recipient: &WhisperId) -> Result<usize, redis::RedisError> {
        let mut conn = self.conn();
        conn.llen(queue_key(recipient)).await
    }

    /// Drop the whole queue and its envelopes. Called after a
    /// fully-delivered final backfill page and on account deletion.
    pub async fn clear_queue(&self, recipient: &WhisperId) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        let key = queue_key(recipient);
        let ids: Vec<String> = conn.lrange(&key, 0, -1).await?;
        for id in &ids {
            let _: () = conn.del(msg_key(id)).await?;
        }
        let _: () = conn.del(&key).await?;
        Ok(())
    }

    /// Hourly garbage pass: drop queue entries whose `msg:<mid>` TTL has
    /// already expired, so backfill pages stay dense.
    pub async fn sweep_queues(&self) -> Result<usize, redis::RedisError> {
        let mut removed = 0;
        for key in self.keys_matching("queue:*").await? {
            let mut conn = self.conn();
            let ids: Vec<String> = conn.lrange(&key, 0, -1).await?;
            for id in ids {
                let alive: bool = conn.exists(msg_key(&id)).await?;
                if !alive {
                    let n: usize = conn.lrem(&key, 0, &id).await?;
                    removed += n;
                }
            }
        }
        Ok(removed)
    }
}
