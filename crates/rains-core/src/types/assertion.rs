use chrono::{DateTime, Utc};

use super::{Object, ObjectKindSet, Signature};

/// Qualify a subject name with its zone: `www` in `example.` is `www.example.`
#[must_use]
pub fn qualify(subject: &str, zone: &str) -> String {
    if subject.is_empty() {
        zone.to_string()
    } else if zone == "." {
        format!("{subject}.")
    } else {
        format!("{subject}.{zone}")
    }
}

/// Inverse of [`qualify`]: the subject `name` denotes inside `zone`, if any
///
/// The zone apex itself is the empty subject.
#[must_use]
pub fn relative_to<'a>(name: &'a str, zone: &str) -> Option<&'a str> {
    if name == zone {
        return Some("");
    }
    let inner = if zone == "." {
        name.strip_suffix('.')
    } else {
        name.strip_suffix(zone)?.strip_suffix('.')
    };
    inner.filter(|s| !s.is_empty())
}

/// A signed statement binding a subject in a zone and context to objects
///
/// An assertion is valid at `t` while at least one of its signatures is
/// valid at `t`; with no signatures it is never valid. Values are never
/// mutated once cached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Assertion {
    /// Subject name, relative to the zone
    pub subject: String,
    /// Zone the subject lives in
    pub zone: String,
    /// Context qualifier
    pub context: String,
    /// Objects bound to the subject, in wire order
    pub objects: Vec<Object>,
    /// Signatures attesting the binding, in wire order
    pub signatures: Vec<Signature>,
}

impl Assertion {
    /// Create an unsigned assertion with no objects
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        zone: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            zone: zone.into(),
            context: context.into(),
            objects: Vec::new(),
            signatures: Vec::new(),
        }
    }

    /// Builder-style object append
    #[must_use]
    pub fn with_object(mut self, object: Object) -> Self {
        self.objects.push(object);
        self
    }

    /// Builder-style signature append
    #[must_use]
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signatures.push(signature);
        self
    }

    /// Set of object kinds present
    #[must_use]
    pub fn kinds(&self) -> ObjectKindSet {
        self.objects.iter().map(Object::kind).collect()
    }

    /// Fully qualified subject name
    #[must_use]
    pub fn qualified_name(&self) -> String {
        qualify(&self.subject, &self.zone)
    }

    #[must_use]
    pub fn is_valid_at(&self, t: DateTime<Utc>) -> bool {
        self.signatures.iter().any(|s| s.is_valid_at(t))
    }

    /// End of the last signature window, `None` when unsigned
    #[must_use]
    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.signatures.iter().map(|s| s.valid_until).max()
    }

    /// Distinct signature expiry times, ascending
    #[must_use]
    pub fn expiry_times(&self) -> Vec<DateTime<Utc>> {
        let mut times: Vec<_> = self.signatures.iter().map(|s| s.valid_until).collect();
        times.sort_unstable();
        times.dedup();
        times
    }

    /// True when `name` refers to this assertion's subject, either as the
    /// bare subject or fully qualified by the zone
    #[must_use]
    pub fn answers(&self, name: &str) -> bool {
        name == self.subject || relative_to(name, &self.zone) == Some(self.subject.as_str())
    }
}

/// Lexical bounds of a shard; an absent bound is unbounded on that side
///
/// The range is half-open: a shard `[a, m)` speaks for every name `n` with
/// `a <= n < m`, so adjacent shards split a zone without gap or overlap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ShardRange {
    pub lower: Option<String>,
    pub upper: Option<String>,
}

impl ShardRange {
    #[must_use]
    pub fn new(lower: Option<&str>, upper: Option<&str>) -> Self {
        Self {
            lower: lower.map(ToString::to_string),
            upper: upper.map(ToString::to_string),
        }
    }

    /// The range covering every name
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            lower: None,
            upper: None,
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        let above = self.lower.as_deref().map_or(true, |l| l <= name);
        let below = self.upper.as_deref().map_or(true, |u| name < u);
        above && below
    }

    /// True when both bounds are present and the lower is not below the
    /// upper, which leaves the range empty
    #[must_use]
    pub fn is_inverted(&self) -> bool {
        matches!((&self.lower, &self.upper), (Some(l), Some(u)) if l >= u)
    }
}

/// A shard (partial, lexically bounded) or a complete zone snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssertionSet {
    pub zone: String,
    pub context: String,
    pub assertions: Vec<Assertion>,
    pub signatures: Vec<Signature>,
    /// Only ever present when `zone_complete` is false
    pub shard_range: Option<ShardRange>,
    pub zone_complete: bool,
}

impl AssertionSet {
    /// An empty shard over `range`
    #[must_use]
    pub fn shard(
        zone: impl Into<String>,
        context: impl Into<String>,
        range: Option<ShardRange>,
    ) -> Self {
        Self {
            zone: zone.into(),
            context: context.into(),
            assertions: Vec::new(),
            signatures: Vec::new(),
            shard_range: range,
            zone_complete: false,
        }
    }

    /// An empty complete zone
    #[must_use]
    pub fn zone(zone: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            context: context.into(),
            assertions: Vec::new(),
            signatures: Vec::new(),
            shard_range: None,
            zone_complete: true,
        }
    }

    /// Names this set speaks for authoritatively
    ///
    /// A zone covers everything; a shard covers its range; a shard without
    /// a range makes no completeness claim.
    #[must_use]
    pub fn coverage(&self) -> Option<ShardRange> {
        if self.zone_complete {
            Some(ShardRange::unbounded())
        } else {
            self.shard_range.clone()
        }
    }

    #[must_use]
    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.signatures.iter().map(|s| s.valid_until).max()
    }

    /// Contained assertions as they should be cached
    ///
    /// Zone and context always come from the set. Unsigned assertions are
    /// protected by the set's own signatures, so they inherit them.
    #[must_use]
    pub fn resolved_assertions(&self) -> Vec<Assertion> {
        self.assertions
            .iter()
            .map(|a| {
                let mut a = a.clone();
                a.zone.clone_from(&self.zone);
                a.context.clone_from(&self.context);
                if a.signatures.is_empty() {
                    a.signatures.clone_from(&self.signatures);
                }
                a
            })
            .collect()
    }
}
