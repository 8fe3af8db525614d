//! Per-zone cache entries.

use chrono::{DateTime, Utc};
use rains_core::{Assertion, ObjectKindSet, PublicKey, ShardRange};
use std::collections::{BTreeMap, HashMap};

/// A key delegated to a zone, valid until its asserting signature expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationKey {
    pub key: PublicKey,
    pub valid_until: DateTime<Utc>,
}

/// A range of subjects a shard or zone speaks for authoritatively.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Coverage {
    range: ShardRange,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
}

/// Everything cached for one zone in one context.
#[derive(Debug, Default)]
pub struct ZoneCache {
    delegation_keys: Vec<DelegationKey>,
    /// subject -> object kinds present -> assertions
    subjects: HashMap<String, BTreeMap<ObjectKindSet, Vec<Assertion>>>,
    coverage: Vec<Coverage>,
}

impl ZoneCache {
    /// Add an assertion to its subject bucket. False if already present.
    pub fn insert(&mut self, assertion: Assertion) -> bool {
        let bucket = self
            .subjects
            .entry(assertion.subject.clone())
            .or_default()
            .entry(assertion.kinds())
            .or_default();
        if bucket.contains(&assertion) {
            return false;
        }
        bucket.push(assertion);
        true
    }

    /// Currently valid assertions for `subject` carrying any of `kinds`.
    pub fn matching<'a>(
        &'a self,
        subject: &str,
        kinds: ObjectKindSet,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a Assertion> + 'a {
        self.subjects
            .get(subject)
            .into_iter()
            .flat_map(|buckets| buckets.iter())
            .filter(move |(present, _)| kinds.accepts(**present))
            .flat_map(|(_, assertions)| assertions.iter())
            .filter(move |a| a.is_valid_at(now))
    }

    /// True when a currently valid shard or zone lists every subject in a
    /// range containing `subject`.
    pub fn covers(&self, subject: &str, now: DateTime<Utc>) -> bool {
        self.coverage
            .iter()
            .any(|c| c.valid_from <= now && now < c.valid_until && c.range.contains(subject))
    }

    pub fn add_coverage(
        &mut self,
        range: ShardRange,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> bool {
        let coverage = Coverage {
            range,
            valid_from,
            valid_until,
        };
        if self.coverage.contains(&coverage) {
            return false;
        }
        self.coverage.push(coverage);
        true
    }

    pub fn add_delegation_key(&mut self, key: PublicKey, valid_until: DateTime<Utc>) -> bool {
        let entry = DelegationKey { key, valid_until };
        if self.delegation_keys.contains(&entry) {
            return false;
        }
        self.delegation_keys.push(entry);
        true
    }

    pub fn delegation_keys(&self, now: DateTime<Utc>) -> impl Iterator<Item = &DelegationKey> {
        self.delegation_keys.iter().filter(move |k| now < k.valid_until)
    }

    /// Drop the subject's assertions whose last signature window has ended.
    /// Returns how many were removed.
    pub fn reap_subject(&mut self, subject: &str, now: DateTime<Utc>) -> usize {
        let Some(buckets) = self.subjects.get_mut(subject) else {
            return 0;
        };
        let mut removed = 0;
        for assertions in buckets.values_mut() {
            let before = assertions.len();
            assertions.retain(|a| a.valid_until().is_some_and(|t| now < t));
            removed += before - assertions.len();
        }
        buckets.retain(|_, assertions| !assertions.is_empty());
        if buckets.is_empty() {
            self.subjects.remove(subject);
        }
        removed
    }

    pub fn reap_coverage(&mut self, now: DateTime<Utc>) {
        self.coverage.retain(|c| now < c.valid_until);
    }

    pub fn reap_delegation_keys(&mut self, now: DateTime<Utc>) {
        self.delegation_keys.retain(|k| now < k.valid_until);
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty() && self.coverage.is_empty() && self.delegation_keys.is_empty()
    }
}
