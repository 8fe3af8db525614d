use thiserror::Error;

use crate::types::NotificationType;

/// Result type alias for wire codec operations
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors raised while decoding or encoding protocol messages
///
/// Decoding only ever reports structural problems. Semantic checks (empty
/// names, expired signatures) belong to the query engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Structural violation: truncated input, bad length, unknown key or
    /// discriminator, invalid UTF-8, field over its bound
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Message exceeds the configured size ceiling
    #[error("message too large: {size} bytes exceeds maximum {max}")]
    TooLarge {
        /// Size of the offending input or field
        size: usize,
        /// Configured ceiling
        max: usize,
    },

    /// CBOR serialization failed while encoding
    #[error("failed to encode CBOR: {0}")]
    Encode(String),
}

impl WireError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Notification code a peer should receive for this error
    #[must_use]
    pub const fn notification_type(&self) -> NotificationType {
        match self {
            Self::TooLarge { .. } => NotificationType::TooLarge,
            Self::Malformed(_) => NotificationType::MalformedMessage,
            Self::Encode(_) => NotificationType::ServerError,
        }
    }
}

/// A zonefile that could not be compiled
///
/// Zonefiles are local configuration, so this never reaches a peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("zonefile error at token {position}: {message}")]
pub struct ZonefileError {
    /// Index of the offending token
    pub position: usize,
    /// What was wrong
    pub message: String,
}
