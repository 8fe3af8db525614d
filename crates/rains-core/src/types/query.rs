use std::collections::BTreeSet;

use super::ObjectKindSet;

/// 16-byte correlation token; all zeroes means "no token"
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Token(pub [u8; 16]);

impl Token {
    pub const ZERO: Self = Self([0; 16]);

    #[must_use]
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token({self})")
    }
}

/// Query options a client can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum QueryOption {
    MinE2ELatency = 1,
    MinLastHopAnswerSize = 2,
    MinInfoLeakage = 3,
    /// Answer from cache only; never forward
    CachedAnswersOnly = 4,
    ExpiredAssertionsOk = 5,
    TokenTracing = 6,
    NoVerificationDelegation = 7,
    NoProactiveCaching = 8,
}

impl QueryOption {
    #[must_use]
    pub const fn code(self) -> u64 {
        self as u64
    }

    #[must_use]
    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(Self::MinE2ELatency),
            2 => Some(Self::MinLastHopAnswerSize),
            3 => Some(Self::MinInfoLeakage),
            4 => Some(Self::CachedAnswersOnly),
            5 => Some(Self::ExpiredAssertionsOk),
            6 => Some(Self::TokenTracing),
            7 => Some(Self::NoVerificationDelegation),
            8 => Some(Self::NoProactiveCaching),
            _ => None,
        }
    }
}

/// A lookup request for a name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    /// Subject name, relative or fully qualified
    pub name: String,
    /// Contexts to search
    pub contexts: BTreeSet<String>,
    /// Correlation token, zero when the caller did not ask for one
    pub token: Token,
    /// Acceptable object kinds; empty accepts any kind
    pub object_types: ObjectKindSet,
    pub options: BTreeSet<QueryOption>,
}

impl Query {
    /// Query `name` in a single context
    #[must_use]
    pub fn new(name: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contexts: BTreeSet::from([context.into()]),
            token: Token::ZERO,
            object_types: ObjectKindSet::empty(),
            options: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_types(mut self, types: ObjectKindSet) -> Self {
        self.object_types = types;
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = token;
        self
    }

    #[must_use]
    pub fn with_option(mut self, option: QueryOption) -> Self {
        self.options.insert(option);
        self
    }

    #[must_use]
    pub fn has_option(&self, option: QueryOption) -> bool {
        self.options.contains(&option)
    }
}
