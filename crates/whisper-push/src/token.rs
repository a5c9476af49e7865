//! Push-token shape validation.
//!
//! Obviously malformed tokens are rejected before any HTTP request is
//! issued, so a garbage token never costs a provider round-trip.

/// Expo push tokens look like `ExponentPushToken[xxxxxxxx]` (the legacy
/// `ExpoPushToken[...]` prefix is also accepted).
pub fn is_valid_expo_token(token: &str) -> bool {
    let inner = token
        .strip_prefix("ExponentPushToken[")
        .or_else(|| token.strip_prefix("ExpoPushToken["))
        .and_then(|rest| rest.strip_suffix(']'));
    match inner {
        Some(body) => !body.is_empty() && body.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
        None => false,
    }
}

/// APNs device tokens are 32 bytes hex-encoded (64 hex chars).
pub fn is_valid_voip_token(token: &str) -> bool {
    token.len() == 64 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_wellformed_expo_tokens() {
        assert!(is_valid_expo_token("ExponentPushToken[AbC123-_xyz]"));
        assert!(is_valid_expo_token("ExpoPushToken[AbC123]"));
    }

    #[test]
    fn rejects_malformed_expo_tokens() {
        for bad in [
            "",
            "ExponentPushToken[]",
            "ExponentPushToken[abc",
            "abc]",
            "FcmToken[abc]",
            "ExponentPushToken[ab c]",
        ] {
            assert!(!is_valid_expo_token(bad), "accepted {bad:?}");
        }
    }

    #[test]
    fn voip_tokens_are_64_hex_chars() {
        let good = "a".repeat(64);
        assert!(is_valid_voip_token(&good));
        assert!(!is_valid_voip_token(&"a".repeat(63)));
        assert!(!is_valid_voip_token(&("g".repeat(64))));
    }
}
