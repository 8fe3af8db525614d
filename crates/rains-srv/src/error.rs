//! Error types for the rains-srv server core.

use rains_core::{NotificationType, WireError};
use thiserror::Error;

/// Errors that can occur in rains-srv operations.
#[derive(Error, Debug)]
pub enum SrvError {
    /// Wire decode or encode failed.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Well-formed but semantically invalid input.
    #[error("inconsistent message: {0}")]
    Inconsistent(String),

    /// A requested feature is not supported by this server.
    #[error("not capable: {0}")]
    NotCapable(String),

    /// No signature window ends after the current time.
    #[error("assertion has no current or future signature window")]
    Expired,

    /// Peer transport failure (unknown peer, full or closed queue).
    #[error("switchboard error: {0}")]
    Switchboard(String),

    /// Configuration is invalid or unreadable.
    #[error("config error: {0}")]
    Config(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SrvError {
    /// Notification code sent back to a peer whose section caused this error.
    #[must_use]
    pub const fn notification_type(&self) -> NotificationType {
        match self {
            Self::Wire(e) => e.notification_type(),
            Self::Inconsistent(_) | Self::Expired => NotificationType::InconsistentMessage,
            Self::NotCapable(_) => NotificationType::NotCapable,
            Self::Switchboard(_) | Self::Config(_) | Self::Internal(_) | Self::Io(_) => {
                NotificationType::ServerError
            }
        }
    }

    pub(crate) fn inconsistent(msg: impl Into<String>) -> Self {
        Self::Inconsistent(msg.into())
    }
}
