//! Centralized error types for the Whisper relay.
//!
//! Uses `thiserror` for ergonomic error definitions. Every variant maps to a
//! stable machine-readable code that clients switch on; the human-readable
//! message is advisory only.

/// Core application error type used across all relay services.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    // === Validation errors ===
    #[error("Malformed JSON frame")]
    ParseError,

    #[error("Unknown frame type")]
    UnknownType,

    #[error("Invalid Whisper ID")]
    InvalidId,

    #[error("Invalid Group ID")]
    InvalidGroupId,

    #[error("Validation failed: {message}")]
    Validation { message: String },

    // === Authorization errors ===
    #[error("Socket is not registered")]
    NotRegistered,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Sender is blocked by the recipient")]
    Blocked,

    #[error("Account is banned")]
    Banned,

    // === Auth protocol errors ===
    #[error("No pending challenge for this socket")]
    NoChallenge,

    #[error("Challenge expired")]
    ChallengeExpired,

    #[error("Signature verification failed")]
    AuthFailed,

    // === Rate limiting ===
    #[error("Rate limited")]
    RateLimited,

    // === Availability ===
    #[error("Recipient is offline and has no push token")]
    RecipientOffline,

    // === Infrastructure errors ===
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RelayError {
    /// Stable error code string for programmatic handling by clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::UnknownType => "UNKNOWN_TYPE",
            Self::InvalidId => "INVALID_ID",
            Self::InvalidGroupId => "INVALID_GROUP_ID",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotRegistered => "NOT_REGISTERED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Blocked => "BLOCKED",
            Self::Banned => "BANNED",
            Self::NoChallenge => "NO_CHALLENGE",
            Self::ChallengeExpired => "CHALLENGE_EXPIRED",
            Self::AuthFailed => "AUTH_FAILED",
            Self::RateLimited => "RATE_LIMITED",
            Self::RecipientOffline => "RECIPIENT_OFFLINE",
            Self::Redis(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to surface to clients. Infrastructure details are logged
    /// server-side and replaced with a generic string.
    pub fn client_message(&self) -> String {
        match self {
            Self::Redis(e) => {
                tracing::error!("Redis error: {e}");
                "An internal error occurred".to_string()
            }
            Self::Internal(e) => {
                tracing::error!("Internal error: {e}");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether this error should close the socket after the error frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Banned)
    }
}

/// Convenience type alias for Results using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;
