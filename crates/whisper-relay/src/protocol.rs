//! Wire protocol: tagged JSON frames.
//!
//! Every frame is `{type: <tag>, payload: <object>}` in both directions.
//! The tags form a closed set; the dispatcher matches them exhaustively, so
//! a new frame type is a compile-time event, not a stringly-typed surprise.
//!
//! Identifier fields on *inbound* payloads are plain strings: shape
//! validation happens in the handlers so a malformed id yields its named
//! error (`INVALID_ID` / `INVALID_GROUP_ID`) rather than a parse failure.
//! Outbound frames carry validated [`WhisperId`]/[`GroupId`] values.

use serde::{Deserialize, Serialize};
use whisper_common::envelope::{Attachments, Envelope, QueuedEnvelope};
use whisper_common::ids::{GroupId, WhisperId};
use whisper_common::turn::TurnCredentials;

/// Frames the client sends to the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Register(RegisterPayload),
    RegisterProof {
        signature: String,
    },
    SendMessage(OutgoingMessage),
    DeliveryReceipt {
        message_id: String,
        to_whisper_id: String,
        status: String,
    },
    FetchPending {
        #[serde(default)]
        cursor: usize,
    },
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Reaction {
        message_id: String,
        to_whisper_id: String,
        /// `None` means "remove my reaction".
        emoji: Option<String>,
    },
    Typing {
        to_whisper_id: String,
        is_typing: bool,
    },
    BlockUser {
        whisper_id: String,
    },
    UnblockUser {
        whisper_id: String,
    },
    DeleteAccount {
        confirmation: String,
        timestamp: i64,
        signature: String,
    },
    CallInitiate {
        to_whisper_id: String,
        call_id: String,
        /// Opaque SDP blob, relayed verbatim.
        offer: serde_json::Value,
        #[serde(default)]
        is_video: bool,
        #[serde(default)]
        caller_name: Option<String>,
    },
    CallAnswer {
        to_whisper_id: String,
        call_id: String,
        answer: serde_json::Value,
    },
    CallIceCandidate {
        to_whisper_id: String,
        call_id: String,
        candidate: serde_json::Value,
    },
    CallEnd {
        to_whisper_id: String,
        call_id: String,
    },
    GetTurnCredentials {},
    CreateGroup {
        group_id: String,
        name: String,
        members: Vec<String>,
    },
    SendGroupMessage {
        group_id: String,
        #[serde(default)]
        message_id: Option<String>,
        encrypted_content: String,
        nonce: String,
        #[serde(default)]
        sender_name: Option<String>,
    },
    UpdateGroup {
        group_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        add_members: Option<Vec<String>>,
        #[serde(default)]
        remove_members: Option<Vec<String>>,
    },
    LeaveGroup {
        group_id: String,
    },
    LookupPublicKey {
        whisper_id: String,
    },
    ReportUser {
        whisper_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
}

/// `register` payload: claimed identity plus connection metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub whisper_id: String,
    /// X25519 encryption public key, base64.
    pub public_key: String,
    /// Ed25519 signing public key, base64.
    pub signing_public_key: String,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub voip_token: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub prefs: PrivacyPrefs,
}

/// Per-session privacy preferences, re-sent by the client on each connect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrivacyPrefs {
    pub send_read_receipts: bool,
    pub send_typing_indicator: bool,
    pub hide_online_status: bool,
}

impl Default for PrivacyPrefs {
    fn default() -> Self {
        Self {
            send_read_receipts: true,
            send_typing_indicator: true,
            hide_online_status: false,
        }
    }
}

/// `send_message` payload. The sender identity comes from the session, not
/// the frame; the server stamps it into the routed envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub message_id: String,
    pub to_whisper_id: String,
    pub encrypted_content: String,
    pub nonce: String,
    #[serde(flatten)]
    pub attachments: Attachments,
}

/// A live-delivered envelope, with the sender's cached encryption key when
/// the directory knows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_public_key: Option<String>,
}

/// `group_created` payload; also the stored shape of a pending invite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCreatedPayload {
    pub group_id: GroupId,
    pub name: String,
    pub creator: WhisperId,
    pub members: Vec<WhisperId>,
    pub created_at: i64,
}

/// Frames the server sends to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerFrame {
    RegisterChallenge {
        challenge: String,
    },
    RegisterAck {
        success: bool,
    },
    MessageReceived(DeliveredMessage),
    MessageDelivered {
        message_id: String,
        /// "delivered" when a live socket took the frame, "pending" when
        /// the envelope was queued.
        status: String,
        to_whisper_id: WhisperId,
    },
    DeliveryStatus {
        message_id: String,
        status: String,
        from_whisper_id: WhisperId,
    },
    PendingMessages {
        messages: Vec<QueuedEnvelope>,
        cursor: usize,
        next_cursor: usize,
        has_more: bool,
    },
    Pong {
        timestamp: i64,
    },
    ReactionReceived {
        message_id: String,
        from_whisper_id: WhisperId,
        emoji: Option<String>,
    },
    TypingStatus {
        from_whisper_id: WhisperId,
        is_typing: bool,
    },
    BlockAck {
        whisper_id: WhisperId,
        success: bool,
    },
    UnblockAck {
        whisper_id: WhisperId,
        success: bool,
    },
    AccountDeleted {
        success: bool,
    },
    IncomingCall {
        from_whisper_id: WhisperId,
        call_id: String,
        offer: serde_json::Value,
        is_video: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        caller_name: Option<String>,
    },
    CallRinging {
        call_id: String,
        to_whisper_id: WhisperId,
    },
    CallAnswered {
        from_whisper_id: WhisperId,
        call_id: String,
        answer: serde_json::Value,
    },
    CallIceCandidate {
        from_whisper_id: WhisperId,
        call_id: String,
        candidate: serde_json::Value,
    },
    CallEnded {
        from_whisper_id: WhisperId,
        call_id: String,
    },
    TurnCredentials(TurnCredentials),
    GroupCreated(GroupCreatedPayload),
    GroupMessageReceived {
        group_id: GroupId,
        from_whisper_id: WhisperId,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        encrypted_content: String,
        nonce: String,
        timestamp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
    },
    GroupUpdated {
        group_id: GroupId,
        name: String,
        creator: WhisperId,
        members: Vec<WhisperId>,
    },
    MemberLeftGroup {
        group_id: GroupId,
        whisper_id: WhisperId,
        /// True when the creator left and the whole group was destroyed.
        group_destroyed: bool,
    },
    PublicKeyResponse {
        whisper_id: String,
        public_key: Option<String>,
        signing_public_key: Option<String>,
        exists: bool,
    },
    ReportAck {
        success: bool,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerFrame {
    /// Build an error frame from a relay error.
    pub fn error(err: &whisper_common::error::RelayError) -> Self {
        Self::Error {
            code: err.code().to_owned(),
            message: err.client_message(),
        }
    }
}

/// The closed set of inbound tags, used to tell an unknown `type` apart
/// from a malformed payload.
pub const CLIENT_FRAME_TAGS: &[&str] = &[
    "register",
    "register_proof",
    "send_message",
    "delivery_receipt",
    "fetch_pending",
    "ping",
    "reaction",
    "typing",
    "block_user",
    "unblock_user",
    "delete_account",
    "call_initiate",
    "call_answer",
    "call_ice_candidate",
    "call_end",
    "get_turn_credentials",
    "create_group",
    "send_group_message",
    "update_group",
    "leave_group",
    "lookup_public_key",
    "report_user",
];

/// Cross-instance routed frame published on the `messages`/`calls`
/// channels: deliver `frame` to `to` if that socket is bound locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedFrame {
    pub to: WhisperId,
    pub frame: ServerFrame,
}

/// Presence notifications published on the `presence` channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum PresenceEvent {
    /// A user authenticated somewhere; instances holding an older socket
    /// for them evict it.
    Online {
        whisper_id: WhisperId,
        socket_id: String,
    },
    Offline {
        whisper_id: WhisperId,
        socket_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_tags_match_wire_names() {
        let frame: ClientFrame = serde_json::from_value(serde_json::json!({
            "type": "register",
            "payload": {
                "whisperId": "WSP-AAAA-BBBB-CCCC",
                "publicKey": "pk",
                "signingPublicKey": "spk"
            }
        }))
        .unwrap();
        let ClientFrame::Register(reg) = frame else {
            panic!("wrong variant");
        };
        assert_eq!(reg.whisper_id, "WSP-AAAA-BBBB-CCCC");
        assert!(reg.prefs.send_read_receipts, "prefs default on");
        assert!(!reg.prefs.hide_online_status);

        let frame: ClientFrame = serde_json::from_value(serde_json::json!({
            "type": "call_ice_candidate",
            "payload": {
                "toWhisperId": "WSP-AAAA-BBBB-CCCC",
                "callId": "c1",
                "candidate": {"sdpMid": "0"}
            }
        }))
        .unwrap();
        assert!(matches!(frame, ClientFrame::CallIceCandidate { .. }));
    }

    #[test]
    fn every_client_tag_is_listed_exactly_once() {
        let mut tags = CLIENT_FRAME_TAGS.to_vec();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), CLIENT_FRAME_TAGS.len());
        // Spot-check the multi-word tags against serde's rename.
        for tag in ["register_proof", "get_turn_credentials", "lookup_public_key"] {
            assert!(CLIENT_FRAME_TAGS.contains(&tag));
        }
    }

    #[test]
    fn server_frames_serialize_with_type_and_payload() {
        let frame = ServerFrame::MessageDelivered {
            message_id: "m1".into(),
            status: "pending".into(),
            to_whisper_id: WhisperId::parse("WSP-RRRR-RRRR-RRRR").unwrap(),
        };
        let wire = serde_json::to_value(&frame).unwrap();
        assert_eq!(wire["type"], "message_delivered");
        assert_eq!(wire["payload"]["messageId"], "m1");
        assert_eq!(wire["payload"]["status"], "pending");
        assert_eq!(wire["payload"]["toWhisperId"], "WSP-RRRR-RRRR-RRRR");
    }

    #[test]
    fn error_frame_carries_code_and_message() {
        let err = whisper_common::error::RelayError::RateLimited;
        let wire = serde_json::to_value(ServerFrame::error(&err)).unwrap();
        assert_eq!(wire["type"], "error");
        assert_eq!(wire["payload"]["code"], "RATE_LIMITED");
        assert!(wire["payload"]["message"].is_string());
    }

    #[test]
    fn outgoing_message_flattens_attachments() {
        let msg: OutgoingMessage = serde_json::from_value(serde_json::json!({
            "messageId": "m1",
            "toWhisperId": "WSP-RRRR-RRRR-RRRR",
            "encryptedContent": "CT",
            "nonce": "N",
            "isForwarded": true
        }))
        .unwrap();
        assert_eq!(msg.attachments.is_forwarded, Some(true));
        assert!(msg.attachments.encrypted_voice.is_none());
    }

    #[test]
    fn presence_events_round_trip() {
        let ev = PresenceEvent::Online {
            whisper_id: WhisperId::parse("WSP-AAAA-BBBB-CCCC").unwrap(),
            socket_id: "s1".into(),
        };
        let wire = serde_json::to_value(&ev).unwrap();
        assert_eq!(wire["event"], "online");
        assert_eq!(wire["whisperId"], "WSP-AAAA-BBBB-CCCC");
        let back: PresenceEvent = serde_json::from_value(wire).unwrap();
        assert!(matches!(back, PresenceEvent::Online { .. }));
    }
}
