//! Public-key and push-token directories.
//!
//! Identity material is immutable for the life of an account; every
//! successful auth rewrites the same values. Re-registering with a
//! different pair is a new user as far as this directory is concerned.

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use whisper_common::ids::WhisperId;

use crate::Store;

fn pubkey_key(wid: &WhisperId) -> String {
    format!("pubkey:{wid}")
}

fn signkey_key(wid: &WhisperId) -> String {
    format!("signkey:{wid}")
}

fn push_key(wid: &WhisperId) -> String {
    format!("push:{wid}")
}

fn voip_key(wid: &WhisperId) -> String {
    format!("voip:{wid}")
}

/// A general push token plus the platform it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTokenEntry {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl Store {
    /// Store both directory keys for a user.
    pub async fn put_identity(
        &self,
        wid: &WhisperId,
        encryption_key: &str,
        signing_key: &str,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        let _: () = conn.set(pubkey_key(wid), encryption_key).await?;
        let _: () = conn.set(signkey_key(wid), signing_key).await?;
        Ok(())
    }

    /// X25519 encryption public key, if the user is known.
    pub async fn encryption_key(
        &self,
        wid: &WhisperId,
    ) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.conn();
        conn.get(pubkey_key(wid)).await
    }

    /// Ed25519 signing public key, if the user is known.
    pub async fn signing_key(&self, wid: &WhisperId) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.conn();
        conn.get(signkey_key(wid)).await
    }

    /// Update push tokens carried on a register frame. `None` leaves the
    /// stored value untouched so a re-auth without tokens does not wipe
    /// them.
    pub async fn put_push_tokens(
        &self,
        wid: &WhisperId,
        push: Option<&PushTokenEntry>,
        voip_token: Option<&str>,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        if let Some(entry) = push {
            let json = serde_json::to_string(entry).unwrap_or_default();
            let _: () = conn.set(push_key(wid), json).await?;
        }
        if let Some(token) = voip_token {
            let _: () = conn.set(voip_key(wid), token).await?;
        }
        Ok(())
    }

    /// General push token and platform tag.
    pub async fn push_token(
        &self,
        wid: &WhisperId,
    ) -> Result<Option<PushTokenEntry>, redis::RedisError> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.get(push_key(wid)).await?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    /// iOS VoIP token, if one is registered.
    pub async fn voip_token(&self, wid: &WhisperId) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.conn();
        conn.get(voip_key(wid)).await
    }

    /// Drop all directory entries for a user (account deletion).
    pub async fn purge_directory(&self, wid: &WhisperId) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        let _: () = conn
            .del(&[pubkey_key(wid), signkey_key(wid), push_key(wid), voip_key(wid)])
            .await?;
        Ok(())
    }
}
