//! Time-limited TURN credentials.
//!
//! The relay never proxies media; it only mints REST-style ephemeral
//! credentials for the external TURN/STUN deployment:
//!
//! ```text
//! username   = "<unix-expiry-seconds>:<whisperId>"
//! credential = base64(HMAC-SHA1(secret, username))
//! ```
//!
//! The shared secret is config-only and never leaves the server; a fresh
//! credential is minted per request.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;

use crate::ids::WhisperId;
use crate::keys::to_base64;

type HmacSha1 = Hmac<Sha1>;

/// Credentials handed to a client for the external TURN/STUN servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnCredentials {
    pub username: String,
    pub credential: String,
    /// Remaining validity in seconds.
    pub ttl: u64,
    pub urls: Vec<String>,
}

/// Mint credentials valid for `ttl_secs` from `now_secs`.
pub fn mint(
    secret: &str,
    whisper_id: &WhisperId,
    now_secs: i64,
    ttl_secs: u64,
    urls: Vec<String>,
) -> TurnCredentials {
    let username = format!("{}:{}", now_secs + ttl_secs as i64, whisper_id);
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(username.as_bytes());
    let credential = to_base64(&mac.finalize().into_bytes());
    TurnCredentials {
        username,
        credential,
        ttl: ttl_secs,
        urls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_carries_expiry_and_id() {
        let id = WhisperId::parse("WSP-AAAA-BBBB-CCCC").unwrap();
        let creds = mint("s3cret", &id, 1_700_000_000, 600, vec!["stun:s.example.com".into()]);
        assert_eq!(creds.username, "1700000600:WSP-AAAA-BBBB-CCCC");
        assert_eq!(creds.ttl, 600);
        assert_eq!(creds.urls, vec!["stun:s.example.com"]);
    }

    #[test]
    fn credential_is_hmac_sha1_of_username() {
        // RFC 2202 test case 2: HMAC-SHA1("Jefe", "what do ya want for nothing?")
        let mut mac = HmacSha1::new_from_slice(b"Jefe").unwrap();
        mac.update(b"what do ya want for nothing?");
        let expected = to_base64(&mac.finalize().into_bytes());
        assert_eq!(expected, "7/zfauXrL6LSdBbV8YTfnCWafHk=");

        // Same minting path, deterministic for a fixed clock.
        let id = WhisperId::parse("WSP-AAAA-BBBB-CCCC").unwrap();
        let a = mint("Jefe", &id, 1_700_000_000, 600, vec![]);
        let b = mint("Jefe", &id, 1_700_000_000, 600, vec![]);
        assert_eq!(a.credential, b.credential);

        // A different secret yields a different credential.
        let c = mint("other", &id, 1_700_000_000, 600, vec![]);
        assert_ne!(a.credential, c.credential);
    }
}
