//! Expo push client.
//!
//! One POST per notification to the Expo push API. Bodies are
//! content-free; the `data` object carries only routing hints the client
//! app needs to deep-link (sender id, call id), never ciphertext.

use reqwest::Client;
use serde_json::json;
use whisper_common::ids::WhisperId;

use crate::token::is_valid_expo_token;
use crate::PushError;

const EXPO_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

pub(crate) struct ExpoClient {
    http: Client,
}

impl ExpoClient {
    pub(crate) fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    pub(crate) async fn send_message(&self, token: &str, from: &WhisperId) -> Result<(), PushError> {
        let body = json!({
            "to": token,
            "title": "Whisper",
            "body": format!("New message from {}", from.short()),
            "priority": "high",
            "data": { "type": "message", "fromWhisperId": from },
        });
        self.post(token, body).await
    }

    pub(crate) async fn send_call(
        &self,
        token: &str,
        from: &WhisperId,
        call_id: &str,
        is_video: bool,
    ) -> Result<(), PushError> {
        let call_id = normalize_call_id(call_id)?;
        let kind = if is_video { "Video call" } else { "Voice call" };
        let body = json!({
            "to": token,
            "title": "Whisper",
            "body": format!("{kind} from {}", from.short()),
            "priority": "high",
            "channelId": "calls",
            "data": {
                "type": "call",
                "fromWhisperId": from,
                "callId": call_id,
                "isVideo": is_video,
            },
        });
        self.post(token, body).await
    }

    pub(crate) async fn send_group_invite(
        &self,
        token: &str,
        group_name: &str,
    ) -> Result<(), PushError> {
        let body = json!({
            "to": token,
            "title": "Group Invite",
            "body": format!("You were added to \"{group_name}\""),
            "priority": "high",
            "data": { "type": "group_invite" },
        });
        self.post(token, body).await
    }

    async fn post(&self, token: &str, body: serde_json::Value) -> Result<(), PushError> {
        if !is_valid_expo_token(token) {
            return Err(PushError::InvalidToken);
        }
        let response = self
            .http
            .post(EXPO_PUSH_URL)
            .json(&body)
            .send()
            .await
            .map_err(|e| PushError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(PushError::Rejected(format!("{status}: {detail}")))
        }
    }
}

/// Call ids are opaque on the relay path but validated as UUIDs before
/// they enter a notification payload.
fn normalize_call_id(call_id: &str) -> Result<String, PushError> {
    uuid::Uuid::parse_str(call_id)
        .map(|u| u.to_string())
        .map_err(|_| PushError::InvalidCallId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_id_must_be_a_uuid() {
        assert!(normalize_call_id("b1b2a2f0-9f68-4b7e-8f6a-0a1b2c3d4e5f").is_ok());
        assert!(normalize_call_id("not-a-uuid").is_err());
    }
}
