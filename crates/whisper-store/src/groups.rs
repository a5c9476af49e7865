//! Group membership store.
//!
//! `group:<gid>` holds the metadata JSON, `gmembers:<gid>` the member set,
//! and `ugroups:<wid>` the reverse index used for teardown. Pending
//! invites for members that were offline at creation are single-shot:
//! read once, then deleted.

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use whisper_common::ids::{GroupId, WhisperId};

use crate::Store;

fn group_key(gid: &GroupId) -> String {
    format!("group:{gid}")
}

fn members_key(gid: &GroupId) -> String {
    format!("gmembers:{gid}")
}

fn ugroups_key(wid: &WhisperId) -> String {
    format!("ugroups:{wid}")
}

fn invite_key(wid: &WhisperId, gid: &GroupId) -> String {
    format!("ginvite:{wid}:{gid}")
}

/// Group metadata. The member set lives in its own key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMeta {
    pub group_id: GroupId,
    pub name: String,
    pub creator: WhisperId,
    pub created_at: i64,
}

impl Store {
    /// Store a new group: metadata, member set, and reverse indexes.
    pub async fn create_group(
        &self,
        meta: &GroupMeta,
        members: &[WhisperId],
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        let json = serde_json::to_string(meta).unwrap_or_default();
        let _: () = conn.set(group_key(&meta.group_id), json).await?;
        for member in members {
            let _: () = conn
                .sadd(members_key(&meta.group_id), member.as_str())
                .await?;
            let _: () = conn
                .sadd(ugroups_key(member), meta.group_id.as_str())
                .await?;
        }
        Ok(())
    }

    pub async fn group(&self, gid: &GroupId) -> Result<Option<GroupMeta>, redis::RedisError> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.get(group_key(gid)).await?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    /// Rewrite group metadata (rename).
    pub async fn put_group_meta(&self, meta: &GroupMeta) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        let json = serde_json::to_string(meta).unwrap_or_default();
        conn.set(group_key(&meta.group_id), json).await
    }

    /// Current member set.
    pub async fn group_members(&self, gid: &GroupId) -> Result<Vec<WhisperId>, redis::RedisError> {
        let mut conn = self.conn();
        let raw: Vec<String> = conn.smembers(members_key(gid)).await?;
        Ok(raw.into_iter().filter_map(|s| WhisperId::parse(&s).ok()).collect())
    }

    pub async fn is_group_member(
        &self,
        gid: &GroupId,
        wid: &WhisperId,
    ) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn();
        conn.sismember(members_key(gid), wid.as_str()).await
    }

    pub async fn add_group_member(
        &self,
        gid: &GroupId,
        wid: &WhisperId,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        let _: () = conn.sadd(members_key(gid), wid.as_str()).await?;
        let _: () = conn.sadd(ugroups_key(wid), gid.as_str()).await?;
        Ok(())
    }

    pub async fn remove_group_member(
        &self,
        gid: &GroupId,
        wid: &WhisperId,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        let _: () = conn.srem(members_key(gid), wid.as_str()).await?;
        let _: () = conn.srem(ugroups_key(wid), gid.as_str()).await?;
        let _: () = conn.del(invite_key(wid, gid)).await?;
        Ok(())
    }

    /// Destroy a group entirely, clearing every member's reverse index and
    /// any undelivered invites. Returns the pre-destroy member set.
    pub async fn destroy_group(&self, gid: &GroupId) -> Result<Vec<WhisperId>, redis::RedisError> {
        let members = self.group_members(gid).await?;
        let mut conn = self.conn();
        for member in &members {
            let _: () = conn.srem(ugroups_key(member), gid.as_str()).await?;
            let _: () = conn.del(invite_key(member, gid)).await?;
        }
        let _: () = conn.del(&[group_key(gid), members_key(gid)]).await?;
        Ok(members)
    }

    /// Groups a user belongs to (reverse index).
    pub async fn groups_of(&self, wid: &WhisperId) -> Result<Vec<GroupId>, redis::RedisError> {
        let mut conn = self.conn();
        let raw: Vec<String> = conn.smembers(ugroups_key(wid)).await?;
        Ok(raw.into_iter().filter_map(|s| GroupId::parse(&s).ok()).collect())
    }

    /// Queue a group-created notification for a member that was offline at
    /// creation time. The payload is the exact `group_created` frame JSON.
    pub async fn queue_group_invite(
        &self,
        wid: &WhisperId,
        gid: &GroupId,
        payload: &str,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        conn.set(invite_key(wid, gid), payload).await
    }

    /// Drain pending invites for a user. Single-shot: entries are deleted
    /// as they are read.
    pub async fn take_group_invites(
        &self,
        wid: &WhisperId,
    ) -> Result<Vec<String>, redis::RedisError> {
        let keys = self
            .keys_matching(&format!("ginvite:{wid}:*"))
            .await?;
        let mut conn = self.conn();
        let mut payloads = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn.get(&key).await?;
            let _: () = conn.del(&key).await?;
            if let Some(payload) = raw {
                payloads.push(payload);
            }
        }
        Ok(payloads)
    }

    /// Queue a group frame for an offline member. Only used when offline
    /// group delivery is enabled; shares the message queue's TTL.
    pub async fn queue_group_frame(
        &self,
        wid: &WhisperId,
        payload: &str,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        let key = format!("gqueue:{wid}");
        let _: () = conn.rpush(&key, payload).await?;
        let _: () = conn
            .expire(&key, whisper_common::envelope::QUEUE_TTL_SECS)
            .await?;
        Ok(())
    }

    /// Drain queued group frames for a user, FIFO.
    pub async fn take_group_frames(
        &self,
        wid: &WhisperId,
    ) -> Result<Vec<String>, redis::RedisError> {
        let mut conn = self.conn();
        let key = format!("gqueue:{wid}");
        let payloads: Vec<String> = conn.lrange(&key, 0, -1).await?;
        let _: () = conn.del(&key).await?;
        Ok(payloads)
    }
}
