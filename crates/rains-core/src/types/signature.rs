use chrono::{DateTime, SubsecRound, Utc};

/// Signature algorithm identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Algorithm {
    /// ECDSA over P-256
    Ecdsa256 = 2,
    /// ECDSA over P-384
    Ecdsa384 = 3,
}

impl Algorithm {
    /// Wire discriminator
    #[must_use]
    pub const fn code(self) -> u64 {
        self as u64
    }

    /// Parse a wire discriminator
    #[must_use]
    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            2 => Some(Self::Ecdsa256),
            3 => Some(Self::Ecdsa384),
            _ => None,
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ecdsa256 => write!(f, "ecdsa-256"),
            Self::Ecdsa384 => write!(f, "ecdsa-384"),
        }
    }
}

/// An opaque, validity-windowed signature
///
/// The content is never interpreted here; only the window matters to the
/// cache and the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Signing algorithm
    pub algorithm: Algorithm,
    /// Start of the validity window (inclusive)
    pub valid_from: DateTime<Utc>,
    /// End of the validity window (exclusive)
    pub valid_until: DateTime<Utc>,
    /// Token used to revoke this signature
    pub revocation_token: Vec<u8>,
    /// Signature bytes
    pub content: Vec<u8>,
}

impl Signature {
    /// Create a signature with empty revocation token and content
    ///
    /// Window bounds are truncated to whole seconds, the resolution the wire
    /// format carries.
    #[must_use]
    pub fn new(
        algorithm: Algorithm,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Self {
        Self {
            algorithm,
            valid_from: valid_from.trunc_subsecs(0),
            valid_until: valid_until.trunc_subsecs(0),
            revocation_token: Vec::new(),
            content: Vec::new(),
        }
    }

    /// `valid_from <= t < valid_until`
    #[must_use]
    pub fn is_valid_at(&self, t: DateTime<Utc>) -> bool {
        self.valid_from <= t && t < self.valid_until
    }

    /// True when the window is empty or inverted
    #[must_use]
    pub fn is_inverted(&self) -> bool {
        self.valid_from >= self.valid_until
    }
}
