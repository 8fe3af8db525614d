use std::net::{Ipv4Addr, Ipv6Addr};

use super::Algorithm;

/// Object kinds with their protocol-fixed discriminators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ObjectKind {
    /// Name associated with the subject
    Name = 1,
    /// IPv6 address of the subject
    Ip6Address = 2,
    /// IPv4 address of the subject
    Ip4Address = 3,
    /// Name of a zone authority server
    Redirection = 4,
    /// Public key for zone delegation
    Delegation = 5,
    /// Nameset expression for a zone
    Nameset = 6,
    /// Certificate information
    Certificate = 7,
    /// Service information
    Service = 8,
    /// Registrar information
    Registrar = 9,
    /// Registrant information
    Registrant = 10,
    /// Public key for infrastructure
    InfraKey = 11,
}

impl ObjectKind {
    /// Every kind, in discriminator order
    pub const ALL: [Self; 11] = [
        Self::Name,
        Self::Ip6Address,
        Self::Ip4Address,
        Self::Redirection,
        Self::Delegation,
        Self::Nameset,
        Self::Certificate,
        Self::Service,
        Self::Registrar,
        Self::Registrant,
        Self::InfraKey,
    ];

    /// Wire discriminator
    #[must_use]
    pub const fn code(self) -> u64 {
        self as u64
    }

    /// Parse a wire discriminator
    #[must_use]
    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }

    const fn bit(self) -> u16 {
        1 << (self as u8)
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Name => "name",
            Self::Ip6Address => "ip6",
            Self::Ip4Address => "ip4",
            Self::Redirection => "redir",
            Self::Delegation => "deleg",
            Self::Nameset => "nameset",
            Self::Certificate => "cert",
            Self::Service => "srv",
            Self::Registrar => "regr",
            Self::Registrant => "regt",
            Self::InfraKey => "infra",
        };
        f.write_str(label)
    }
}

/// A set of object kinds, stored as a bitmask
///
/// Used as the bucket key inside a subject's cache entry and as the
/// requested-types filter of a query. Iteration is in discriminator order,
/// which keeps the wire encoding canonical.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectKindSet(u16);

impl ObjectKindSet {
    /// The empty set
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Add a kind
    pub fn insert(&mut self, kind: ObjectKind) {
        self.0 |= kind.bit();
    }

    /// Builder-style insert
    #[must_use]
    pub const fn with(self, kind: ObjectKind) -> Self {
        Self(self.0 | kind.bit())
    }

    #[must_use]
    pub const fn contains(self, kind: ObjectKind) -> bool {
        self.0 & kind.bit() != 0
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Kinds in discriminator order
    pub fn iter(self) -> impl Iterator<Item = ObjectKind> {
        ObjectKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }

    /// Query semantics: an empty filter accepts every kind
    #[must_use]
    pub const fn accepts(self, kinds: Self) -> bool {
        self.is_empty() || self.intersects(kinds)
    }
}

impl FromIterator<ObjectKind> for ObjectKindSet {
    fn from_iter<I: IntoIterator<Item = ObjectKind>>(iter: I) -> Self {
        let mut set = Self::empty();
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

impl std::fmt::Debug for ObjectKindSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// A public key carried by delegation and infrastructure-key objects
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    pub algorithm: Algorithm,
    pub key: Vec<u8>,
}

/// Service location information
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceInfo {
    pub hostname: String,
    pub port: u16,
    pub priority: u16,
}

/// A typed object bound to an assertion's subject
///
/// The variant set is closed: the encoder and decoder match on it
/// exhaustively, so a new kind cannot be added without handling it on
/// the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Object {
    Name(String),
    Ip6(Ipv6Addr),
    Ip4(Ipv4Addr),
    Redirection(String),
    Delegation(PublicKey),
    Nameset(String),
    /// Opaque certificate information
    Certificate(Vec<u8>),
    Service(ServiceInfo),
    Registrar(String),
    Registrant(String),
    InfraKey(PublicKey),
}

impl Object {
    /// Kind discriminator of this object
    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        match self {
            Self::Name(_) => ObjectKind::Name,
            Self::Ip6(_) => ObjectKind::Ip6Address,
            Self::Ip4(_) => ObjectKind::Ip4Address,
            Self::Redirection(_) => ObjectKind::Redirection,
            Self::Delegation(_) => ObjectKind::Delegation,
            Self::Nameset(_) => ObjectKind::Nameset,
            Self::Certificate(_) => ObjectKind::Certificate,
            Self::Service(_) => ObjectKind::Service,
            Self::Registrar(_) => ObjectKind::Registrar,
            Self::Registrant(_) => ObjectKind::Registrant,
            Self::InfraKey(_) => ObjectKind::InfraKey,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_are_protocol_fixed() {
        assert_eq!(ObjectKind::Name.code(), 1);
        assert_eq!(ObjectKind::Service.code(), 8);
        assert_eq!(ObjectKind::InfraKey.code(), 11);
        assert_eq!(ObjectKind::from_code(4), Some(ObjectKind::Redirection));
        assert_eq!(ObjectKind::from_code(0), None);
        assert_eq!(ObjectKind::from_code(12), None);
    }

    #[test]
    fn test_kind_set_operations() {
        let set: ObjectKindSet = [ObjectKind::Ip4Address, ObjectKind::Name].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(ObjectKind::Name));
        assert!(!set.contains(ObjectKind::Ip6Address));
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![ObjectKind::Name, ObjectKind::Ip4Address]
        );

        let other = ObjectKindSet::empty().with(ObjectKind::Ip4Address);
        assert!(set.intersects(other));
        assert!(!other.intersects(ObjectKindSet::empty().with(ObjectKind::Name)));
    }

    #[test]
    fn test_empty_filter_accepts_everything() {
        let kinds = ObjectKindSet::empty().with(ObjectKind::Service);
        assert!(ObjectKindSet::empty().accepts(kinds));
        assert!(!ObjectKindSet::empty().with(ObjectKind::Name).accepts(kinds));
    }

    #[test]
    fn test_object_kind() {
        let obj = Object::Ip4(Ipv4Addr::new(192, 0, 2, 33));
        assert_eq!(obj.kind(), ObjectKind::Ip4Address);
        let srv = Object::Service(ServiceInfo {
            hostname: "mx".into(),
            port: 25,
            priority: 10,
        });
        assert_eq!(srv.kind(), ObjectKind::Service);
    }
}
