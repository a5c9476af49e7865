//! # whisper-push
//!
//! Push dispatch for offline (or backgrounded) recipients. Every
//! notification is content-free: the visible body carries at most the
//! sender's Whisper ID prefix, never message content.
//!
//! Two providers:
//! - **Expo** for general message/call/group-invite pushes on both
//!   platforms.
//! - **APNs VoIP** for incoming calls on iOS, which wakes the native call
//!   UI even when the app is killed or the device is locked. Requires the
//!   `APNS_*` configuration; absent that, the dispatcher silently falls
//!   back to regular push only.
//!
//! Dispatch is fire-and-forget: a slow or failing provider never blocks
//! message delivery. Failures are logged and dropped.

mod apns;
mod expo;
mod token;

use std::sync::Arc;

use whisper_common::config::ApnsConfig;
use whisper_common::ids::WhisperId;

use crate::apns::ApnsClient;
use crate::expo::ExpoClient;
pub use crate::token::{is_valid_expo_token, is_valid_voip_token};

/// Errors surfaced by the providers. Logged, never propagated to the
/// routing path.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("malformed push token")]
    InvalidToken,
    #[error("malformed call id (not a UUID)")]
    InvalidCallId,
    #[error("provider JWT creation failed: {0}")]
    Jwt(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("provider rejected the request: {0}")]
    Rejected(String),
}

struct Inner {
    expo: ExpoClient,
    apns: Option<ApnsClient>,
}

/// Shared handle for firing pushes from any task.
#[derive(Clone)]
pub struct PushDispatcher {
    inner: Arc<Inner>,
}

impl PushDispatcher {
    /// Build the dispatcher. `apns: None` disables VoIP push entirely.
    pub fn new(apns: Option<ApnsConfig>) -> anyhow::Result<Self> {
        let apns = match apns {
            Some(config) => {
                let client = ApnsClient::new(&config)?;
                tracing::info!(
                    production = config.production,
                    "APNs VoIP push enabled"
                );
                Some(client)
            }
            None => {
                tracing::info!("APNs credentials absent; VoIP push disabled");
                None
            }
        };
        Ok(Self {
            inner: Arc::new(Inner {
                expo: ExpoClient::new(),
                apns,
            }),
        })
    }

    /// Message-arrival push. Visible body names only the sender prefix.
    pub fn send_message_push(&self, token: &str, from: &WhisperId) {
        let inner = self.inner.clone();
        let token = token.to_owned();
        let from = from.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.expo.send_message(&token, &from).await {
                tracing::warn!(from = %from, "Message push failed: {e}");
            }
        });
    }

    /// Incoming-call push on the high-priority "calls" channel.
    pub fn send_call_push(&self, token: &str, from: &WhisperId, call_id: &str, is_video: bool) {
        let inner = self.inner.clone();
        let token = token.to_owned();
        let from = from.clone();
        let call_id = call_id.to_owned();
        tokio::spawn(async move {
            if let Err(e) = inner.expo.send_call(&token, &from, &call_id, is_video).await {
                tracing::warn!(from = %from, "Call push failed: {e}");
            }
        });
    }

    /// VoIP push: iOS-native incoming call UI, killed/locked included.
    pub fn send_voip_push(
        &self,
        voip_token: &str,
        from: &WhisperId,
        call_id: &str,
        is_video: bool,
        caller_name: Option<&str>,
    ) {
        if self.inner.apns.is_none() {
            tracing::debug!("VoIP push requested but APNs is disabled");
            return;
        }
        let inner = self.inner.clone();
        let voip_token = voip_token.to_owned();
        let from = from.clone();
        let call_id = call_id.to_owned();
        let caller_name = caller_name.map(str::to_owned);
        tokio::spawn(async move {
            let Some(apns) = inner.apns.as_ref() else { return };
            if let Err(e) = apns
                .send_voip(&voip_token, &from, &call_id, is_video, caller_name.as_deref())
                .await
            {
                tracing::warn!(from = %from, "VoIP push failed: {e}");
            }
        });
    }

    /// Group-invite push carrying only the group name.
    pub fn send_group_invite_push(&self, token: &str, group_name: &str) {
        let inner = self.inner.clone();
        let token = token.to_owned();
        let group_name = group_name.to_owned();
        tokio::spawn(async move {
            if let Err(e) = inner.expo.send_group_invite(&token, &group_name).await {
                tracing::warn!("Group invite push failed: {e}");
            }
        });
    }
}
