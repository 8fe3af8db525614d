use std::collections::BTreeSet;

use super::{Assertion, AssertionSet, Query, Token};

/// Notification codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum NotificationType {
    /// Connection heartbeat
    Heartbeat = 100,
    /// Capability hash not understood
    UnknownCapability = 399,
    /// Malformed message received
    MalformedMessage = 400,
    /// Inconsistent message received
    InconsistentMessage = 403,
    /// No assertion exists
    NoAssertion = 404,
    /// Message too large
    TooLarge = 413,
    /// Unspecified server error
    ServerError = 500,
    /// Server not capable
    NotCapable = 501,
    /// No assertion available
    NotAvailable = 504,
}

impl NotificationType {
    #[must_use]
    pub const fn code(self) -> u64 {
        self as u64
    }

    #[must_use]
    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            100 => Some(Self::Heartbeat),
            399 => Some(Self::UnknownCapability),
            400 => Some(Self::MalformedMessage),
            403 => Some(Self::InconsistentMessage),
            404 => Some(Self::NoAssertion),
            413 => Some(Self::TooLarge),
            500 => Some(Self::ServerError),
            501 => Some(Self::NotCapable),
            504 => Some(Self::NotAvailable),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Heartbeat => "heartbeat",
            Self::UnknownCapability => "unknown capability",
            Self::MalformedMessage => "malformed message",
            Self::InconsistentMessage => "inconsistent message",
            Self::NoAssertion => "no assertion",
            Self::TooLarge => "too large",
            Self::ServerError => "server error",
            Self::NotCapable => "not capable",
            Self::NotAvailable => "not available",
        };
        write!(f, "{} {label}", self.code())
    }
}

/// A status report correlated to an earlier query or message by token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Notification {
    pub kind: NotificationType,
    /// Free-form detail, may be empty
    pub data: String,
    pub token: Token,
}

impl Notification {
    #[must_use]
    pub fn new(kind: NotificationType, token: Token, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
            token,
        }
    }
}

/// Section kind constants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SectionKind {
    Assertion = 1,
    Shard = 2,
    Zone = 3,
    Query = 4,
    Notification = 23,
}

impl SectionKind {
    #[must_use]
    pub const fn code(self) -> u64 {
        self as u64
    }

    #[must_use]
    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(Self::Assertion),
            2 => Some(Self::Shard),
            3 => Some(Self::Zone),
            4 => Some(Self::Query),
            23 => Some(Self::Notification),
            _ => None,
        }
    }
}

/// One independently processed unit inside a message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Section {
    Assertion(Assertion),
    /// Shard or zone, told apart by `zone_complete`
    AssertionSet(AssertionSet),
    Query(Query),
    Notification(Notification),
}

impl Section {
    #[must_use]
    pub const fn kind(&self) -> SectionKind {
        match self {
            Self::Assertion(_) => SectionKind::Assertion,
            Self::AssertionSet(set) if set.zone_complete => SectionKind::Zone,
            Self::AssertionSet(_) => SectionKind::Shard,
            Self::Query(_) => SectionKind::Query,
            Self::Notification(_) => SectionKind::Notification,
        }
    }
}

/// The unit of transmission between peers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub token: Token,
    pub capabilities: BTreeSet<String>,
    /// Processed in order
    pub sections: Vec<Section>,
}

impl Message {
    #[must_use]
    pub fn new(token: Token, sections: Vec<Section>) -> Self {
        Self {
            token,
            capabilities: BTreeSet::new(),
            sections,
        }
    }

    /// A message carrying a single notification
    #[must_use]
    pub fn notification(kind: NotificationType, token: Token, data: impl Into<String>) -> Self {
        Self::new(
            token,
            vec![Section::Notification(Notification::new(kind, token, data))],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_codes() {
        assert_eq!(NotificationType::MalformedMessage.code(), 400);
        assert_eq!(NotificationType::from_code(504), Some(NotificationType::NotAvailable));
        assert_eq!(NotificationType::from_code(200), None);
        assert_eq!(NotificationType::NoAssertion.to_string(), "404 no assertion");
    }

    #[test]
    fn test_section_kind_follows_zone_complete() {
        let shard = Section::AssertionSet(AssertionSet::shard("example.", ".", None));
        let zone = Section::AssertionSet(AssertionSet::zone("example.", "."));
        assert_eq!(shard.kind(), SectionKind::Shard);
        assert_eq!(zone.kind(), SectionKind::Zone);
        assert_eq!(SectionKind::from_code(23), Some(SectionKind::Notification));
        assert_eq!(SectionKind::from_code(5), None);
    }
}
