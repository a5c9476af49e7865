//! Application configuration loaded from environment variables.
//!
//! Supports `.env` files for development and plain environment variables in
//! production. The recognized variable names are part of the deployment
//! contract (`REDIS_URL`, `TURN_SECRET`, `APNS_*`, `ADMIN_API_KEY`, ...),
//! so the config keys are flat rather than nested.

use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global application configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static AppConfig {
    CONFIG
        .get()
        .expect("Config not initialized. Call whisper_common::config::init() first.")
}

/// Initialize the global configuration from environment.
///
/// Should be called once at application startup, before any other code
/// accesses config.
pub fn init() -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        // Defaults
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("admin_port", 8081)?
        .set_default("redis_url", "redis://127.0.0.1:6379")?
        .set_default("turn_secret", "")?
        .set_default(
            "turn_urls",
            "stun:stun.l.google.com:19302,stun:stun1.l.google.com:19302",
        )?
        .set_default("turn_ttl_secs", 86_400)?
        .set_default("apns_production", false)?
        .set_default("admin_api_key", "")?
        .set_default("queue_group_messages", false)?
        // Environment variables, flat: REDIS_URL → redis_url, etc.
        .add_source(config::Environment::default().try_parsing(true))
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;
    Ok(CONFIG.get_or_init(|| app_config))
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Bind address for both listeners.
    pub host: String,
    /// WebSocket relay port.
    pub port: u16,
    /// Admin HTTP surface port.
    pub admin_port: u16,

    /// Presence/queue store endpoint.
    pub redis_url: String,

    /// Shared HMAC key for TURN credential minting. Empty disables the
    /// `get_turn_credentials` operation.
    pub turn_secret: String,
    /// Comma-separated STUN/TURN URLs handed to clients.
    pub turn_urls: String,
    /// Lifetime of minted TURN credentials, in seconds.
    pub turn_ttl_secs: u64,

    /// APNs VoIP push credentials. When any of the four identifiers is
    /// absent, VoIP push is disabled and the dispatcher falls back to
    /// regular push only.
    pub apns_key_id: Option<String>,
    pub apns_team_id: Option<String>,
    pub apns_key_path: Option<String>,
    pub apns_bundle_id: Option<String>,
    /// true → api.push.apple.com, false → the sandbox gateway.
    pub apns_production: bool,

    /// Gates the admin HTTP surface. Empty rejects every admin request.
    pub admin_api_key: String,

    /// When true, group ciphertext is also enqueued for offline members
    /// through the 72-hour message queue. Default false: group messaging
    /// is best-effort real-time.
    pub queue_group_messages: bool,
}

impl AppConfig {
    /// TURN URL list split out of the comma-separated env value.
    pub fn turn_url_list(&self) -> Vec<String> {
        self.turn_urls
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// APNs settings, if fully configured.
    pub fn apns(&self) -> Option<ApnsConfig> {
        Some(ApnsConfig {
            key_id: self.apns_key_id.clone()?,
            team_id: self.apns_team_id.clone()?,
            key_path: self.apns_key_path.clone()?,
            bundle_id: self.apns_bundle_id.clone()?,
            production: self.apns_production,
        })
    }
}

/// Fully-resolved APNs VoIP push configuration.
#[derive(Debug, Clone)]
pub struct ApnsConfig {
    pub key_id: String,
    pub team_id: String,
    pub key_path: String,
    pub bundle_id: String,
    pub production: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_url_list_splits_and_trims() {
        let cfg = AppConfig {
            host: "0.0.0.0".into(),
            port: 8080,
            admin_port: 8081,
            redis_url: "redis://localhost".into(),
            turn_secret: String::new(),
            turn_urls: "stun:a.example.com:3478, turn:b.example.com:3478 ,".into(),
            turn_ttl_secs: 600,
            apns_key_id: None,
            apns_team_id: None,
            apns_key_path: None,
            apns_bundle_id: None,
            apns_production: false,
            admin_api_key: String::new(),
            queue_group_messages: false,
        };
        assert_eq!(
            cfg.turn_url_list(),
            vec!["stun:a.example.com:3478", "turn:b.example.com:3478"]
        );
        assert!(cfg.apns().is_none());
    }
}
