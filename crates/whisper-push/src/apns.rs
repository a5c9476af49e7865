//! APNs VoIP push over HTTP/2.
//!
//! Authenticates with an ES256-signed provider token (JWT). Apple accepts
//! tokens between 20 and 60 minutes old, so the JWT is cached and reissued
//! after ~50 minutes of its 1-hour validity.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use whisper_common::config::ApnsConfig;
use whisper_common::ids::WhisperId;

use crate::token::is_valid_voip_token;
use crate::PushError;

/// Reissue the provider JWT after this many seconds.
const JWT_REFRESH_SECS: u64 = 50 * 60;

#[derive(Serialize)]
struct ApnsClaims {
    iss: String,
    iat: u64,
}

struct CachedJwt {
    jwt: String,
    issued_at: u64,
}

pub(crate) struct ApnsClient {
    http: Client,
    key_id: String,
    team_id: String,
    /// `.p8` private key bytes, read once at startup.
    private_key: Vec<u8>,
    /// `apns-topic` is the app bundle id plus the `.voip` suffix.
    voip_topic: String,
    host: &'static str,
    jwt: Mutex<Option<CachedJwt>>,
}

impl ApnsClient {
    pub(crate) fn new(config: &ApnsConfig) -> anyhow::Result<Self> {
        let private_key = std::fs::read(&config.key_path)?;
        // Fail fast on an undecodable key instead of at first push.
        EncodingKey::from_ec_pem(&private_key)?;
        Ok(Self {
            http: Client::builder().http2_prior_knowledge().build()?,
            key_id: config.key_id.clone(),
            team_id: config.team_id.clone(),
            private_key,
            voip_topic: format!("{}.voip", config.bundle_id),
            host: if config.production {
                "https://api.push.apple.com"
            } else {
                "https://api.sandbox.push.apple.com"
            },
            jwt: Mutex::new(None),
        })
    }

    /// Return the cached provider JWT, reissuing after 50 minutes.
    async fn provider_jwt(&self) -> Result<String, PushError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| PushError::Jwt(e.to_string()))?
            .as_secs();

        let mut cached = self.jwt.lock().await;
        if let Some(entry) = &*cached {
            if now < entry.issued_at + JWT_REFRESH_SECS {
                return Ok(entry.jwt.clone());
            }
        }

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());
        let claims = ApnsClaims {
            iss: self.team_id.clone(),
            iat: now,
        };
        let key = EncodingKey::from_ec_pem(&self.private_key)
            .map_err(|e| PushError::Jwt(e.to_string()))?;
        let jwt = encode(&header, &claims, &key).map_err(|e| PushError::Jwt(e.to_string()))?;

        *cached = Some(CachedJwt {
            jwt: jwt.clone(),
            issued_at: now,
        });
        Ok(jwt)
    }

    /// Send a VoIP push. The payload wakes the native call UI; it carries
    /// routing hints only, never content.
    pub(crate) async fn send_voip(
        &self,
        voip_token: &str,
        from: &WhisperId,
        call_id: &str,
        is_video: bool,
        caller_name: Option<&str>,
    ) -> Result<(), PushError> {
        if !is_valid_voip_token(voip_token) {
            return Err(PushError::InvalidToken);
        }
        let call_id = uuid::Uuid::parse_str(call_id).map_err(|_| PushError::InvalidCallId)?;

        let jwt = self.provider_jwt().await?;
        let url = format!("{}/3/device/{voip_token}", self.host);
        let payload = json!({
            "aps": { "content-available": 1 },
            "type": "call",
            "fromWhisperId": from,
            "callId": call_id,
            "isVideo": is_video,
            "callerName": caller_name,
        });

        let response = self
            .http
            .post(url)
            .bearer_auth(jwt)
            .header("apns-topic", &self.voip_topic)
            .header("apns-push-type", "voip")
            .header("apns-priority", "10")
            .header("apns-expiration", "0")
            .json(&payload)
            .send()
            .await
            .map_err(|e| PushError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(()),
            // 410 Gone: the token is no longer valid for this device.
            StatusCode::GONE => Err(PushError::InvalidToken),
            status => {
                let detail = response.text().await.unwrap_or_default();
                Err(PushError::Rejected(format!("{status}: {detail}")))
            }
        }
    }
}
