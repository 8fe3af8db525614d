//! Reap queue: a min-heap of expiry events.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// What an expiry event points at inside a zone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Target {
    /// Assertions cached for this subject.
    Subject(String),
    /// Shard and zone coverage records.
    Coverage,
    /// Keys delegated to the zone.
    DelegationKeys,
}

/// Location of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntryPath {
    pub context: String,
    pub zone: String,
    pub target: Target,
}

/// A point in time at which something under `path` may stop being valid.
///
/// Ordered by `valid_until` first, so the heap root is always the soonest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExpiryEvent {
    pub valid_until: DateTime<Utc>,
    pub path: EntryPath,
}

#[derive(Debug, Default)]
pub struct ReapQueue {
    heap: BinaryHeap<Reverse<ExpiryEvent>>,
}

impl ReapQueue {
    pub fn push(&mut self, valid_until: DateTime<Utc>, path: EntryPath) {
        self.heap.push(Reverse(ExpiryEvent { valid_until, path }));
    }

    /// Pop the root if it is due at `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<ExpiryEvent> {
        if self.heap.peek()?.0.valid_until > now {
            return None;
        }
        self.heap.pop().map(|Reverse(event)| event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn path(subject: &str) -> EntryPath {
        EntryPath {
            context: ".".into(),
            zone: "example.".into(),
            target: Target::Subject(subject.into()),
        }
    }

    #[test]
    fn test_pops_in_expiry_order_up_to_now() {
        let mut queue = ReapQueue::default();
        queue.push(at(30), path("c"));
        queue.push(at(10), path("a"));
        queue.push(at(20), path("b"));

        let first = queue.pop_due(at(20)).unwrap();
        assert_eq!(first.path, path("a"));
        let second = queue.pop_due(at(20)).unwrap();
        assert_eq!(second.valid_until, at(20));
        assert!(queue.pop_due(at(20)).is_none());
        assert_eq!(queue.heap.len(), 1);
    }
}
