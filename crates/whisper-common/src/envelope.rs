//! Encrypted message envelopes.
//!
//! The envelope is the unit the router moves around: opaque ciphertext plus
//! the routing headers the server is allowed to see. All cryptographic
//! fields are base64 strings the server never decodes.
//!
//! Optional media and quote fields live in an [`Attachments`] record that is
//! flattened into the wire object, so the JSON stays flat while the Rust
//! type keeps the header/attachment split.

use crate::ids::WhisperId;
use serde::{Deserialize, Serialize};

/// How long a queued envelope survives before expiry.
pub const QUEUE_TTL_SECS: i64 = 72 * 60 * 60;

/// An opaque encrypted 1:1 message plus server-visible routing headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Client-chosen opaque id. Uniqueness is the sender's responsibility;
    /// the server does not deduplicate.
    pub message_id: String,
    pub from_whisper_id: WhisperId,
    pub to_whisper_id: WhisperId,
    /// Base64 ciphertext. Never decoded server-side.
    pub encrypted_content: String,
    /// Base64 nonce.
    pub nonce: String,
    /// Server-stamped Unix milliseconds. Overwritten on receipt.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(flatten)]
    pub attachments: Attachments,
}

/// Optional opaque media and quote fields attached to an envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachments {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_metadata: Option<ImageMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_metadata: Option<FileMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_forwarded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyTo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

/// Quote block for replies. Content is client-rendered preview text the
/// sender chose to include; the server treats it as opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyTo {
    pub message_id: String,
    pub content: String,
    pub sender_id: String,
}

/// An envelope held in the offline queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedEnvelope {
    #[serde(flatten)]
    pub envelope: Envelope,
    /// Unix milliseconds after which this envelope is dropped.
    pub expires_at: i64,
    /// Cached sender encryption key, so recipients who don't know the
    /// sender can decrypt without a directory round-trip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_public_key: Option<String>,
}

impl Envelope {
    /// Stamp the server receive time and compute the queue expiry.
    pub fn into_queued(mut self, now_ms: i64, sender_public_key: Option<String>) -> QueuedEnvelope {
        self.timestamp = now_ms;
        QueuedEnvelope {
            envelope: self,
            expires_at: now_ms + QUEUE_TTL_SECS * 1000,
            sender_public_key,
        }
    }
}

impl QueuedEnvelope {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_json() -> serde_json::Value {
        serde_json::json!({
            "messageId": "m1",
            "fromWhisperId": "WSP-AAAA-BBBB-CCCC",
            "toWhisperId": "WSP-RRRR-RRRR-RRRR",
            "encryptedContent": "CT",
            "nonce": "N",
            "encryptedVoice": "VV",
            "voiceDuration": 2.5,
            "replyTo": {"messageId": "m0", "content": "quoted", "senderId": "WSP-RRRR-RRRR-RRRR"}
        })
    }

    #[test]
    fn attachments_flatten_into_wire_object() {
        let env: Envelope = serde_json::from_value(envelope_json()).unwrap();
        assert_eq!(env.message_id, "m1");
        assert_eq!(env.attachments.encrypted_voice.as_deref(), Some("VV"));
        assert_eq!(env.attachments.reply_to.as_ref().unwrap().message_id, "m0");

        let back = serde_json::to_value(&env).unwrap();
        assert_eq!(back["encryptedVoice"], "VV");
        assert!(back.get("encryptedImage").is_none(), "absent fields stay absent");
    }

    #[test]
    fn queueing_stamps_timestamp_and_expiry() {
        let env: Envelope = serde_json::from_value(envelope_json()).unwrap();
        let queued = env.into_queued(1_000_000, Some("PK".into()));
        assert_eq!(queued.envelope.timestamp, 1_000_000);
        assert_eq!(queued.expires_at, 1_000_000 + QUEUE_TTL_SECS * 1000);
        assert!(!queued.is_expired(queued.expires_at));
        assert!(queued.is_expired(queued.expires_at + 1));

        let wire = serde_json::to_value(&queued).unwrap();
        assert_eq!(wire["messageId"], "m1", "queued form keeps a flat shape");
        assert_eq!(wire["senderPublicKey"], "PK");
    }
}
