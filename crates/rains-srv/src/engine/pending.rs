//! Pending queries: a deadline heap plus two indexes, one by (context, name)
//! and one by (context, enclosing name) for shards and zones that cover a
//! whole subtree.
//!
//! Removal by token only touches the entry map and the indexes; the heap
//! entry is left behind and skipped when it surfaces.

use chrono::{DateTime, Utc};
use rains_core::{Query, Token};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use super::{enclosing_names, OnResolve};

type Index = HashMap<(String, String), HashSet<Token>>;

fn index_insert(index: &mut Index, context: &str, name: &str, token: Token) {
    index
        .entry((context.to_string(), name.to_string()))
        .or_default()
        .insert(token);
}

fn index_remove(index: &mut Index, context: &str, name: &str, token: Token) {
    let key = (context.to_string(), name.to_string());
    if let Some(tokens) = index.get_mut(&key) {
        tokens.remove(&token);
        if tokens.is_empty() {
            index.remove(&key);
        }
    }
}

fn index_get(index: &Index, context: &str, name: &str) -> Vec<Token> {
    index
        .get(&(context.to_string(), name.to_string()))
        .map(|tokens| tokens.iter().copied().collect())
        .unwrap_or_default()
}

/// A registered query waiting for an answer.
pub struct Pending {
    pub query: Query,
    pub deadline: DateTime<Utc>,
    /// Peer that asked, if any.
    pub requester: Option<String>,
    /// Peer the query was forwarded to, if any.
    pub forwarded_to: Option<String>,
    pub on_resolve: OnResolve,
}

impl std::fmt::Debug for Pending {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending")
            .field("query", &self.query)
            .field("deadline", &self.deadline)
            .field("requester", &self.requester)
            .field("forwarded_to", &self.forwarded_to)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct PendingQueries {
    entries: HashMap<Token, Pending>,
    deadlines: BinaryHeap<Reverse<(DateTime<Utc>, Token)>>,
    by_name: Index,
    by_zone: Index,
}

impl PendingQueries {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, token: Token) -> bool {
        self.entries.contains_key(&token)
    }

    /// Register `pending` under its query token, which must be unused.
    pub fn insert(&mut self, pending: Pending) {
        let token = pending.query.token;
        self.deadlines.push(Reverse((pending.deadline, token)));
        let name = &pending.query.name;
        for context in &pending.query.contexts {
            index_insert(&mut self.by_name, context, name, token);
            for zone in enclosing_names(name) {
                index_insert(&mut self.by_zone, context, zone, token);
            }
        }
        self.entries.insert(token, pending);
    }

    pub fn remove(&mut self, token: Token) -> Option<Pending> {
        let pending = self.entries.remove(&token)?;
        let name = &pending.query.name;
        for context in &pending.query.contexts {
            index_remove(&mut self.by_name, context, name, token);
            for zone in enclosing_names(name) {
                index_remove(&mut self.by_zone, context, zone, token);
            }
        }
        Some(pending)
    }

    /// Tokens of queries waiting on `name` in `context`.
    pub fn waiting_on(&self, context: &str, name: &str) -> Vec<Token> {
        index_get(&self.by_name, context, name)
    }

    pub fn get(&self, token: Token) -> Option<&Pending> {
        self.entries.get(&token)
    }

    /// Tokens of queries in `context` for `zone` or any name below it.
    pub fn within(&self, context: &str, zone: &str) -> Vec<Token> {
        index_get(&self.by_zone, context, zone)
    }

    /// Tokens of queries asked by, or forwarded to, `peer`.
    pub fn involving(&self, peer: &str) -> Vec<Token> {
        self.entries
            .iter()
            .filter(|(_, p)| {
                p.requester.as_deref() == Some(peer) || p.forwarded_to.as_deref() == Some(peer)
            })
            .map(|(token, _)| *token)
            .collect()
    }

    /// Remove and return every query whose deadline is at or before `now`.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<Pending> {
        let mut expired = Vec::new();
        while let Some(Reverse((deadline, token))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();
            // Skip heap entries left behind by removal or token reuse.
            if self.entries.get(&token).is_some_and(|p| p.deadline == deadline) {
                expired.extend(self.remove(token));
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn pending(name: &str, token: u8, deadline: i64) -> Pending {
        Pending {
            query: Query::new(name, ".").with_token(Token::new([token; 16])),
            deadline: at(deadline),
            requester: Some("client".into()),
            forwarded_to: None,
            on_resolve: Box::new(|_| {}),
        }
    }

    #[test]
    fn test_index_tracks_insert_and_remove() {
        let mut table = PendingQueries::default();
        table.insert(pending("www", 1, 10));
        table.insert(pending("www", 2, 20));
        assert_eq!(table.waiting_on(".", "www").len(), 2);

        assert!(table.remove(Token::new([1; 16])).is_some());
        assert_eq!(table.waiting_on(".", "www"), vec![Token::new([2; 16])]);
        assert!(table.remove(Token::new([1; 16])).is_none());

        table.remove(Token::new([2; 16]));
        assert!(table.by_name.is_empty());
        assert!(table.by_zone.is_empty());
    }

    #[test]
    fn test_within_finds_only_the_subtree() {
        let mut table = PendingQueries::default();
        table.insert(pending("www.example.", 1, 10));
        table.insert(pending("example.", 2, 10));
        table.insert(pending("www.other.", 3, 10));
        table.insert(pending("www", 4, 10));

        let mut under = table.within(".", "example.");
        under.sort();
        assert_eq!(under, vec![Token::new([1; 16]), Token::new([2; 16])]);
        assert_eq!(table.within(".", "www.other."), vec![Token::new([3; 16])]);
        assert_eq!(table.within(".", ".").len(), 3);
        assert!(table.within("other-context", "example.").is_empty());

        table.remove(Token::new([1; 16]));
        assert_eq!(table.within(".", "example."), vec![Token::new([2; 16])]);
    }

    #[test]
    fn test_expire_skips_removed_entries() {
        let mut table = PendingQueries::default();
        table.insert(pending("a", 1, 10));
        table.insert(pending("b", 2, 20));
        table.insert(pending("c", 3, 30));
        table.remove(Token::new([1; 16]));

        let expired = table.expire(at(20));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].query.name, "b");
        assert_eq!(table.len(), 1);
        assert!(table.contains(Token::new([3; 16])));
    }

    #[test]
    fn test_involving_matches_requester_and_forward_target() {
        let mut table = PendingQueries::default();
        table.insert(pending("a", 1, 10));
        let mut forwarded = pending("b", 2, 10);
        forwarded.requester = None;
        forwarded.forwarded_to = Some("ns.example.".into());
        table.insert(forwarded);

        assert_eq!(table.involving("client"), vec![Token::new([1; 16])]);
        assert_eq!(table.involving("ns.example."), vec![Token::new([2; 16])]);
        assert!(table.involving("nobody").is_empty());
    }
}
