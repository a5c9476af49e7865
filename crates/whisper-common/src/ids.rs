//! Whisper and group identifiers.
//!
//! The server never generates these — clients mint them and the server only
//! validates shape and uses them as opaque keys. Wire shape:
//! `WSP-XXXX-XXXX-XXXX` / `GRP-XXXX-XXXX-XXXX` where each group is four
//! uppercase ASCII alphanumerics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque user identifier of shape `WSP-XXXX-XXXX-XXXX`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WhisperId(String);

/// Opaque group identifier of shape `GRP-XXXX-XXXX-XXXX`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupId(String);

/// Error for malformed identifiers.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("malformed {kind} id")]
pub struct IdParseError {
    kind: &'static str,
}

/// Check `XXXX-XXXX-XXXX` after the prefix: three dash-separated groups of
/// four uppercase ASCII alphanumerics.
fn valid_shape(s: &str, prefix: &str) -> bool {
    let Some(tail) = s.strip_prefix(prefix) else {
        return false;
    };
    let groups: Vec<&str> = tail.split('-').collect();
    groups.len() == 3
        && groups.iter().all(|g| {
            g.len() == 4
                && g.bytes()
                    .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        })
}

impl WhisperId {
    pub fn parse(s: &str) -> Result<Self, IdParseError> {
        if valid_shape(s, "WSP-") {
            Ok(Self(s.to_owned()))
        } else {
            Err(IdParseError { kind: "whisper" })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First identifier group, for content-free push bodies
    /// (e.g. `WSP-AB12…`).
    pub fn short(&self) -> String {
        format!("{}\u{2026}", &self.0[..8])
    }
}

impl GroupId {
    pub fn parse(s: &str) -> Result<Self, IdParseError> {
        if valid_shape(s, "GRP-") {
            Ok(Self(s.to_owned()))
        } else {
            Err(IdParseError { kind: "group" })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! impl_id_conversions {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $ty {
            type Err = IdParseError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = IdParseError;
            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(&s)
            }
        }

        impl From<$ty> for String {
            fn from(id: $ty) -> String {
                id.0
            }
        }
    };
}

impl_id_conversions!(WhisperId);
impl_id_conversions!(GroupId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_wellformed_ids() {
        assert!(WhisperId::parse("WSP-AAAA-BBBB-CCCC").is_ok());
        assert!(WhisperId::parse("WSP-0000-9999-ZZZZ").is_ok());
        assert!(GroupId::parse("GRP-1111-2222-3333").is_ok());
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in [
            "",
            "WSP-AAAA-BBBB",             // too few groups
            "WSP-AAAA-BBBB-CCCC-DDDD",   // too many groups
            "WSP-aaaa-BBBB-CCCC",        // lowercase
            "WSP-AAA-BBBB-CCCC",         // short group
            "WSP-AAAAA-BBB-CCCC",        // long group
            "GRP-AAAA-BBBB-CCCC",        // wrong prefix
            "WSP-AAAA-BBBB-CC C",        // whitespace
            "WSP-AAAA-BBBB-CCC\u{00c9}", // non-ascii
        ] {
            assert!(WhisperId::parse(bad).is_err(), "accepted {bad:?}");
        }
        assert!(GroupId::parse("WSP-AAAA-BBBB-CCCC").is_err());
    }

    #[test]
    fn serde_round_trip_enforces_shape() {
        let id: WhisperId = serde_json::from_str("\"WSP-AAAA-BBBB-CCCC\"").unwrap();
        assert_eq!(id.as_str(), "WSP-AAAA-BBBB-CCCC");
        assert!(serde_json::from_str::<WhisperId>("\"nope\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"WSP-AAAA-BBBB-CCCC\"");
    }

    #[test]
    fn short_form_is_prefix_only() {
        let id = WhisperId::parse("WSP-AB12-CD34-EF56").unwrap();
        assert_eq!(id.short(), "WSP-AB12\u{2026}");
    }
}
