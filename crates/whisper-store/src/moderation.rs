//! Moderation state: bans and the report inbox.

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use whisper_common::ids::WhisperId;

use crate::Store;

const REPORTS_KEY: &str = "reports";

fn banned_key(wid: &WhisperId) -> String {
    format!("banned:{wid}")
}

/// A user report queued for moderator review.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub reporter: WhisperId,
    pub reported: WhisperId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: i64,
}

impl Store {
    pub async fn ban(&self, wid: &WhisperId) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        conn.set(banned_key(wid), 1).await
    }

    pub async fn unban(&self, wid: &WhisperId) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        conn.del(banned_key(wid)).await
    }

    pub async fn is_banned(&self, wid: &WhisperId) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn();
        conn.exists(banned_key(wid)).await
    }

    /// Append a report to the moderation inbox.
    pub async fn add_report(&self, report: &Report) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        let json = serde_json::to_string(report).unwrap_or_default();
        conn.rpush(REPORTS_KEY, json).await
    }

    /// Drain the moderation inbox (admin surface).
    pub async fn drain_reports(&self) -> Result<Vec<Report>, redis::RedisError> {
        let mut conn = self.conn();
        let raw: Vec<String> = conn.lrange(REPORTS_KEY, 0, -1).await?;
        let _: () = conn.del(REPORTS_KEY).await?;
        Ok(raw
            .into_iter()
            .filter_map(|s| serde_json::from_str(&s).ok())
            .collect())
    }
}
