//! Assertion cache: an expiring store indexed by context, zone and subject.
//!
//! Every cached assertion, coverage record and delegation key pushes an
//! [`ExpiryEvent`](expiry::ExpiryEvent) per distinct end of validity onto a
//! min-heap. [`AssertionCache::reap`] pops only the events that are due, so
//! a reap pass costs time proportional to what actually expires.

mod expiry;
mod zone;

use chrono::{DateTime, Utc};
use rains_core::{relative_to, Assertion, AssertionSet, Object, ObjectKindSet, PublicKey};
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

use crate::error::SrvError;
use expiry::{EntryPath, ReapQueue, Target};
use zone::ZoneCache;

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// Currently valid assertions matching the request.
    Hit(Vec<Assertion>),
    /// Nothing matches, and a valid shard or zone proves nothing exists.
    AuthoritativeNegative,
    /// Nothing matches and nothing is known; ask elsewhere.
    Unknown,
}

impl LookupOutcome {
    fn from_parts(hits: Vec<Assertion>, covered: bool) -> Self {
        if !hits.is_empty() {
            Self::Hit(hits)
        } else if covered {
            Self::AuthoritativeNegative
        } else {
            Self::Unknown
        }
    }
}

/// Hierarchical expiring store: context -> zone -> [`ZoneCache`].
#[derive(Debug, Default)]
pub struct AssertionCache {
    contexts: HashMap<String, BTreeMap<String, ZoneCache>>,
    reap_queue: ReapQueue,
    len: usize,
}

impl AssertionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached assertions.
    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn zone_mut(&mut self, context: &str, zone: &str) -> &mut ZoneCache {
        self.contexts
            .entry(context.to_string())
            .or_default()
            .entry(zone.to_string())
            .or_default()
    }

    fn zone(&self, context: &str, zone: &str) -> Option<&ZoneCache> {
        self.contexts.get(context)?.get(zone)
    }

    /// Cache `assertion` under `context`.
    ///
    /// Returns `Ok(false)` when an identical assertion is already cached and
    /// [`SrvError::Expired`] when no signature window ends after `now`.
    /// Delegation objects also record their key on the delegated zone.
    pub fn insert(
        &mut self,
        context: &str,
        assertion: Assertion,
        now: DateTime<Utc>,
    ) -> crate::Result<bool> {
        let valid_until = assertion
            .valid_until()
            .filter(|t| now < *t)
            .ok_or(SrvError::Expired)?;

        let subject = assertion.subject.clone();
        let zone = assertion.zone.clone();
        let delegated_zone = assertion.qualified_name();
        let expiries: Vec<_> = assertion
            .expiry_times()
            .into_iter()
            .filter(|t| now < *t)
            .collect();
        let keys: Vec<PublicKey> = assertion
            .objects
            .iter()
            .filter_map(|o| match o {
                Object::Delegation(key) => Some(key.clone()),
                _ => None,
            })
            .collect();

        if !self.zone_mut(context, &zone).insert(assertion) {
            return Ok(false);
        }
        self.len += 1;

        for t in expiries {
            self.reap_queue.push(
                t,
                EntryPath {
                    context: context.to_string(),
                    zone: zone.clone(),
                    target: Target::Subject(subject.clone()),
                },
            );
        }
        for key in keys {
            if self
                .zone_mut(context, &delegated_zone)
                .add_delegation_key(key, valid_until)
            {
                self.reap_queue.push(
                    valid_until,
                    EntryPath {
                        context: context.to_string(),
                        zone: delegated_zone.clone(),
                        target: Target::DelegationKeys,
                    },
                );
            }
        }
        trace!(context, zone = %zone, subject = %subject, "cached assertion");
        Ok(true)
    }

    /// Record the range a shard or zone speaks for, so later misses inside
    /// it are answered negatively. Contained assertions are not inserted.
    ///
    /// Returns `Ok(false)` for a shard without a range (no completeness
    /// claim) or a coverage record already held.
    pub fn insert_shard(
        &mut self,
        context: &str,
        set: &AssertionSet,
        now: DateTime<Utc>,
    ) -> crate::Result<bool> {
        let valid_until = set
            .valid_until()
            .filter(|t| now < *t)
            .ok_or(SrvError::Expired)?;
        let Some(range) = set.coverage() else {
            return Ok(false);
        };
        let valid_from = set
            .signatures
            .iter()
            .map(|s| s.valid_from)
            .min()
            .unwrap_or(valid_until);

        if !self
            .zone_mut(context, &set.zone)
            .add_coverage(range, valid_from, valid_until)
        {
            return Ok(false);
        }
        self.reap_queue.push(
            valid_until,
            EntryPath {
                context: context.to_string(),
                zone: set.zone.clone(),
                target: Target::Coverage,
            },
        );
        Ok(true)
    }

    /// Look up `subject` in a known zone.
    ///
    /// An empty `kinds` filter accepts every object kind.
    pub fn lookup(
        &self,
        context: &str,
        zone: &str,
        subject: &str,
        kinds: ObjectKindSet,
        now: DateTime<Utc>,
    ) -> LookupOutcome {
        let Some(cache) = self.zone(context, zone) else {
            return LookupOutcome::Unknown;
        };
        let hits = cache.matching(subject, kinds, now).cloned().collect();
        LookupOutcome::from_parts(hits, cache.covers(subject, now))
    }

    /// Look up a query name across every zone of a context.
    ///
    /// `name` matches a subject directly or once qualified by its zone. Only
    /// a name qualified inside a zone can be answered negatively by it.
    pub fn lookup_name(
        &self,
        context: &str,
        name: &str,
        kinds: ObjectKindSet,
        now: DateTime<Utc>,
    ) -> LookupOutcome {
        let Some(zones) = self.contexts.get(context) else {
            return LookupOutcome::Unknown;
        };
        let mut hits = Vec::new();
        let mut covered = false;
        for (zone, cache) in zones {
            hits.extend(cache.matching(name, kinds, now).cloned());
            if let Some(subject) = relative_to(name, zone) {
                hits.extend(cache.matching(subject, kinds, now).cloned());
                covered |= cache.covers(subject, now);
            }
        }
        LookupOutcome::from_parts(hits, covered)
    }

    /// Currently valid keys delegated to `zone`.
    pub fn delegation_keys(&self, context: &str, zone: &str, now: DateTime<Utc>) -> Vec<PublicKey> {
        self.zone(context, zone)
            .map(|cache| cache.delegation_keys(now).map(|k| k.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Remove everything whose validity ended at or before `now`.
    ///
    /// An assertion signed with several windows stays until its last window
    /// ends. Returns the number of assertions removed.
    pub fn reap(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        while let Some(event) = self.reap_queue.pop_due(now) {
            let EntryPath {
                context,
                zone,
                target,
            } = event.path;
            let Some(zones) = self.contexts.get_mut(&context) else {
                continue;
            };
            let Some(cache) = zones.get_mut(&zone) else {
                continue;
            };
            match target {
                Target::Subject(subject) => removed += cache.reap_subject(&subject, now),
                Target::Coverage => cache.reap_coverage(now),
                Target::DelegationKeys => cache.reap_delegation_keys(now),
            }
            if cache.is_empty() {
                zones.remove(&zone);
                if zones.is_empty() {
                    self.contexts.remove(&context);
                }
            }
        }
        self.len -= removed;
        removed
    }
}
