//! Query engine: answers queries from the cache or tracks them until an
//! assertion, a notification or the deadline resolves them.
//!
//! The cache and the pending-query table sit behind one lock so that an
//! arriving assertion is cached and matched against waiting queries as a
//! single step. Callbacks run after the lock is released, on whatever task
//! made the call that resolved them.
//!
//! Every registered query is resolved exactly once: by a matching
//! assertion, a covering shard or zone, a notification from the peer it was
//! forwarded to, a peer failure, or the reap pass once its deadline passes.
//! Only [`QueryEngine::cancel`] removes a query without resolving it.

mod pending;

use chrono::{DateTime, TimeDelta, Utc};
use rains_core::{
    relative_to, Assertion, AssertionSet, Message, NotificationType, Object, ObjectKind,
    ObjectKindSet, PublicKey, Query, QueryOption, Section, ShardRange, Signature, Token,
};
use ring::rand::{SecureRandom, SystemRandom};
use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::cache::{AssertionCache, LookupOutcome};
use crate::config::ServerConfig;
use crate::error::SrvError;
use crate::switchboard::Outbound;
use pending::{Pending, PendingQueries};

/// How a query ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Matching assertions, whole and as signed.
    Answered(Vec<Assertion>),
    /// Authoritatively nothing matches.
    NoAssertion,
    /// No answer could be obtained (timeout, peer failure, upstream error).
    NotAvailable,
}

/// Callback invoked once when a query resolves.
///
/// Pending callbacks live inside the engine's lock, so they must be `Sync`
/// for the engine to be shared across tasks.
pub type OnResolve = Box<dyn FnOnce(Resolution) + Send + Sync>;

/// What a reap pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapStats {
    pub assertions_removed: usize,
    pub queries_timed_out: usize,
}

impl ReapStats {
    pub const fn is_empty(&self) -> bool {
        self.assertions_removed == 0 && self.queries_timed_out == 0
    }
}

type Fired = Vec<(OnResolve, Resolution)>;

fn fire(fired: Fired) -> usize {
    let count = fired.len();
    for (on_resolve, resolution) in fired {
        on_resolve(resolution);
    }
    count
}

#[derive(Debug, Default)]
struct EngineState {
    cache: AssertionCache,
    pending: PendingQueries,
}

impl EngineState {
    /// Cache lookup across every context of `query`.
    fn lookup_query(&self, query: &Query, now: DateTime<Utc>) -> LookupOutcome {
        let mut hits = Vec::new();
        let mut negative = false;
        for context in &query.contexts {
            match self
                .cache
                .lookup_name(context, &query.name, query.object_types, now)
            {
                LookupOutcome::Hit(found) => hits.extend(found),
                LookupOutcome::AuthoritativeNegative => negative = true,
                LookupOutcome::Unknown => {}
            }
        }
        if !hits.is_empty() {
            LookupOutcome::Hit(hits)
        } else if negative {
            LookupOutcome::AuthoritativeNegative
        } else {
            LookupOutcome::Unknown
        }
    }

    /// Peer to forward `query` to: the first valid redirection found
    /// walking the name from most to least specific.
    fn forward_target(&self, query: &Query, now: DateTime<Utc>) -> Option<String> {
        let redirect = ObjectKindSet::empty().with(ObjectKind::Redirection);
        for name in enclosing_names(&query.name) {
            for context in &query.contexts {
                let LookupOutcome::Hit(found) = self.cache.lookup_name(context, name, redirect, now)
                else {
                    continue;
                };
                let target = found.iter().flat_map(|a| &a.objects).find_map(|o| match o {
                    Object::Redirection(target) => Some(target.clone()),
                    _ => None,
                });
                if target.is_some() {
                    return target;
                }
            }
        }
        None
    }

    /// Resolve queries in `context` answered by `assertions`, or proven
    /// empty by `coverage` (a zone and the range of it a set speaks for).
    fn resolve_with(
        &mut self,
        context: &str,
        assertions: &[Assertion],
        coverage: Option<(&str, &ShardRange)>,
        now: DateTime<Utc>,
    ) -> Fired {
        let valid: Vec<&Assertion> = assertions.iter().filter(|a| a.is_valid_at(now)).collect();

        let mut candidates: HashSet<Token> = HashSet::new();
        for a in &valid {
            candidates.extend(self.pending.waiting_on(context, &a.subject));
            candidates.extend(self.pending.waiting_on(context, &a.qualified_name()));
        }
        if let Some((zone, _)) = coverage {
            candidates.extend(self.pending.within(context, zone));
        }

        let mut fired = Vec::new();
        for token in candidates {
            let Some(pending) = self.pending.get(token) else {
                continue;
            };
            let query = &pending.query;
            let answers: Vec<Assertion> = valid
                .iter()
                .filter(|a| a.answers(&query.name) && query.object_types.accepts(a.kinds()))
                .map(|a| (*a).clone())
                .collect();
            let resolution = if !answers.is_empty() {
                Resolution::Answered(answers)
            } else if coverage.is_some_and(|(zone, range)| {
                relative_to(&query.name, zone).is_some_and(|subject| range.contains(subject))
            }) {
                Resolution::NoAssertion
            } else {
                continue;
            };
            if let Some(pending) = self.pending.remove(token) {
                debug!(token = %token, name = %pending.query.name, "query resolved");
                fired.push((pending.on_resolve, resolution));
            }
        }
        fired
    }
}

/// Names enclosing `name`, most specific first: `www.example.`,
/// `example.`, `.`. A relative name yields only itself.
fn enclosing_names(name: &str) -> impl Iterator<Item = &str> {
    let mut rest = Some(name);
    std::iter::from_fn(move || {
        let current = rest?;
        rest = match current.split_once('.') {
            Some((_, tail)) if !tail.is_empty() => Some(tail),
            Some(_) if current != "." => Some("."),
            _ => None,
        };
        Some(current)
    })
}

fn validate_signatures(what: &str, signatures: &[Signature]) -> crate::Result<()> {
    if signatures.is_empty() {
        return Err(SrvError::inconsistent(format!("{what} is not signed")));
    }
    if signatures.iter().any(Signature::is_inverted) {
        return Err(SrvError::inconsistent(format!(
            "{what} has a signature that ends before it starts"
        )));
    }
    Ok(())
}

fn validate_assertion(a: &Assertion) -> crate::Result<()> {
    for (field, value) in [
        ("subject name", &a.subject),
        ("zone", &a.zone),
        ("context", &a.context),
    ] {
        if value.is_empty() {
            return Err(SrvError::inconsistent(format!("assertion has an empty {field}")));
        }
    }
    validate_signatures(&format!("assertion for '{}'", a.subject), &a.signatures)
}

fn validate_set(set: &AssertionSet, now: DateTime<Utc>) -> crate::Result<Vec<Assertion>> {
    if set.zone.is_empty() || set.context.is_empty() {
        return Err(SrvError::inconsistent("assertion set has an empty zone or context"));
    }
    validate_signatures("assertion set", &set.signatures)?;
    if set.zone_complete && set.shard_range.is_some() {
        return Err(SrvError::inconsistent("zone carries a shard range"));
    }
    if let Some(range) = &set.shard_range {
        if range.is_inverted() {
            return Err(SrvError::inconsistent("shard range is inverted"));
        }
        if let Some(outside) = set.assertions.iter().find(|a| !range.contains(&a.subject)) {
            return Err(SrvError::inconsistent(format!(
                "subject '{}' lies outside its shard range",
                outside.subject
            )));
        }
    }
    if !set.valid_until().is_some_and(|t| now < t) {
        return Err(SrvError::Expired);
    }

    let assertions = set.resolved_assertions();
    for a in &assertions {
        validate_assertion(a)?;
        if !a.valid_until().is_some_and(|t| now < t) {
            return Err(SrvError::Expired);
        }
    }
    Ok(assertions)
}

/// The resolution state machine over a shared assertion cache.
pub struct QueryEngine {
    state: RwLock<EngineState>,
    outbound: Arc<dyn Outbound>,
    rng: SystemRandom,
    query_timeout: TimeDelta,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("state", &self.state)
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}

impl QueryEngine {
    /// Create an engine that forwards queries through `outbound`.
    pub fn new(outbound: Arc<dyn Outbound>, query_timeout: TimeDelta) -> Self {
        Self {
            state: RwLock::new(EngineState::default()),
            outbound,
            rng: SystemRandom::new(),
            query_timeout,
        }
    }

    pub fn from_config(config: &ServerConfig, outbound: Arc<dyn Outbound>) -> Self {
        Self::new(outbound, config.query_timeout())
    }

    fn read(&self) -> crate::Result<RwLockReadGuard<'_, EngineState>> {
        self.state
            .read()
            .map_err(|_| SrvError::Internal("engine lock poisoned".into()))
    }

    fn write(&self) -> crate::Result<RwLockWriteGuard<'_, EngineState>> {
        self.state
            .write()
            .map_err(|_| SrvError::Internal("engine lock poisoned".into()))
    }

    fn fresh_token(&self) -> crate::Result<Token> {
        let mut bytes = [0u8; 16];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| SrvError::Internal("system random source failed".into()))?;
        Ok(Token::new(bytes))
    }

    /// Cache an assertion and resolve the queries it answers.
    ///
    /// Returns how many pending queries were resolved.
    pub fn assert(
        &self,
        context: &str,
        assertion: Assertion,
        now: DateTime<Utc>,
    ) -> crate::Result<usize> {
        validate_assertion(&assertion)?;
        let fired = {
            let mut state = self.write()?;
            state.cache.insert(context, assertion.clone(), now)?;
            state.resolve_with(context, std::slice::from_ref(&assertion), None, now)
        };
        Ok(fire(fired))
    }

    /// Cache a shard or zone: its assertions, then the range it covers.
    ///
    /// The whole set is validated before anything is cached. Pending
    /// queries are answered by contained assertions, or resolved with
    /// [`Resolution::NoAssertion`] when the set proves their name empty.
    pub fn assert_set(&self, set: AssertionSet, now: DateTime<Utc>) -> crate::Result<usize> {
        let assertions = validate_set(&set, now)?;
        let coverage = set
            .coverage()
            .filter(|_| set.signatures.iter().any(|s| s.is_valid_at(now)));

        let fired = {
            let mut state = self.write()?;
            for a in &assertions {
                state.cache.insert(&set.context, a.clone(), now)?;
            }
            state.cache.insert_shard(&set.context, &set, now)?;
            state.resolve_with(
                &set.context,
                &assertions,
                coverage.as_ref().map(|range| (set.zone.as_str(), range)),
                now,
            )
        };
        debug!(
            zone = %set.zone,
            context = %set.context,
            assertions = assertions.len(),
            complete = set.zone_complete,
            "cached assertion set"
        );
        Ok(fire(fired))
    }

    /// Answer `query` from the cache, or register it until resolved.
    ///
    /// A cache hit or an authoritative negative invokes `on_resolve` before
    /// returning `Ok(None)`. Otherwise the query is registered under its
    /// token (a fresh one when the query carries none), forwarded when a
    /// redirection for an enclosing name is cached, and the token returned.
    pub fn query(
        &self,
        mut query: Query,
        requester: Option<&str>,
        now: DateTime<Utc>,
        on_resolve: OnResolve,
    ) -> crate::Result<Option<Token>> {
        if query.name.is_empty() {
            return Err(SrvError::inconsistent("query name is empty"));
        }
        if query.contexts.is_empty() {
            return Err(SrvError::inconsistent("query names no context"));
        }

        let mut state = self.write()?;
        let immediate = match state.lookup_query(&query, now) {
            LookupOutcome::Hit(found) => Some(Resolution::Answered(found)),
            LookupOutcome::AuthoritativeNegative => Some(Resolution::NoAssertion),
            LookupOutcome::Unknown if query.has_option(QueryOption::CachedAnswersOnly) => {
                Some(Resolution::NoAssertion)
            }
            LookupOutcome::Unknown => None,
        };
        if let Some(resolution) = immediate {
            drop(state);
            on_resolve(resolution);
            return Ok(None);
        }

        if query.token.is_zero() {
            query.token = self.fresh_token()?;
        } else if state.pending.contains(query.token) {
            return Err(SrvError::inconsistent(format!(
                "token {} is already pending",
                query.token
            )));
        }
        let token = query.token;
        let forwarded_to = state
            .forward_target(&query, now)
            .filter(|target| Some(target.as_str()) != requester);
        state.pending.insert(Pending {
            query: query.clone(),
            deadline: now
                .checked_add_signed(self.query_timeout)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            requester: requester.map(ToString::to_string),
            forwarded_to: forwarded_to.clone(),
            on_resolve,
        });
        drop(state);

        if let Some(peer) = forwarded_to {
            let message = Message::new(token, vec![Section::Query(query)]);
            match self.outbound.send(&peer, message) {
                Ok(()) => debug!(token = %token, peer = %peer, "forwarded query"),
                Err(e) => warn!(token = %token, peer = %peer, error = %e, "failed to forward query"),
            }
        }
        Ok(Some(token))
    }

    /// Time out overdue queries and drop expired cache entries.
    pub fn reap(&self, now: DateTime<Utc>) -> crate::Result<ReapStats> {
        let (expired, assertions_removed) = {
            let mut state = self.write()?;
            let expired = state.pending.expire(now);
            (expired, state.cache.reap(now))
        };
        let stats = ReapStats {
            assertions_removed,
            queries_timed_out: expired.len(),
        };
        for pending in expired {
            debug!(token = %pending.query.token, name = %pending.query.name, "query timed out");
            (pending.on_resolve)(Resolution::NotAvailable);
        }
        Ok(stats)
    }

    /// Drop a pending query without resolving it.
    pub fn cancel(&self, token: Token) -> crate::Result<bool> {
        Ok(self.write()?.pending.remove(token).is_some())
    }

    /// Fail every query asked by, or forwarded to, a peer whose connection
    /// closed. Returns how many were failed.
    pub fn fail_peer(&self, peer: &str) -> crate::Result<usize> {
        let fired: Fired = {
            let mut state = self.write()?;
            state
                .pending
                .involving(peer)
                .into_iter()
                .filter_map(|token| state.pending.remove(token))
                .map(|pending| (pending.on_resolve, Resolution::NotAvailable))
                .collect()
        };
        Ok(fire(fired))
    }

    /// Resolve a forwarded query from the notification `peer` sent back.
    ///
    /// `404` resolves with [`Resolution::NoAssertion`], other error codes
    /// with [`Resolution::NotAvailable`]. Returns false when the code is not
    /// an error, or no query holding `token` was forwarded to `peer`.
    pub fn notify(&self, peer: &str, token: Token, kind: NotificationType) -> crate::Result<bool> {
        let resolution = match kind {
            NotificationType::Heartbeat | NotificationType::UnknownCapability => return Ok(false),
            NotificationType::NoAssertion => Resolution::NoAssertion,
            _ => Resolution::NotAvailable,
        };
        let pending = {
            let mut state = self.write()?;
            if !state
                .pending
                .get(token)
                .is_some_and(|p| p.forwarded_to.as_deref() == Some(peer))
            {
                return Ok(false);
            }
            state.pending.remove(token)
        };
        let Some(pending) = pending else {
            return Ok(false);
        };
        (pending.on_resolve)(resolution);
        Ok(true)
    }

    /// Read-only cache lookup.
    pub fn lookup(
        &self,
        context: &str,
        zone: &str,
        subject: &str,
        kinds: ObjectKindSet,
        now: DateTime<Utc>,
    ) -> crate::Result<LookupOutcome> {
        Ok(self.read()?.cache.lookup(context, zone, subject, kinds, now))
    }

    /// Keys currently delegated to `zone`.
    pub fn delegation_keys(
        &self,
        context: &str,
        zone: &str,
        now: DateTime<Utc>,
    ) -> crate::Result<Vec<PublicKey>> {
        Ok(self.read()?.cache.delegation_keys(context, zone, now))
    }

    pub fn pending_len(&self) -> crate::Result<usize> {
        Ok(self.read()?.pending.len())
    }

    pub fn cached_len(&self) -> crate::Result<usize> {
        Ok(self.read()?.cache.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enclosing_names() {
        let names: Vec<_> = enclosing_names("www.example.").collect();
        assert_eq!(names, vec!["www.example.", "example.", "."]);
        assert_eq!(enclosing_names(".").collect::<Vec<_>>(), vec!["."]);
        assert_eq!(enclosing_names("www").collect::<Vec<_>>(), vec!["www"]);
    }

    #[test]
    fn test_validate_assertion_rules() {
        use rains_core::Algorithm;

        let start = DateTime::from_timestamp(0, 0).unwrap();
        let end = start + TimeDelta::hours(1);
        let signed = |a: Assertion| a.with_signature(Signature::new(Algorithm::Ecdsa256, start, end));

        assert!(validate_assertion(&signed(Assertion::new("www", "example.", "."))).is_ok());
        assert!(validate_assertion(&signed(Assertion::new("", "example.", "."))).is_err());
        assert!(validate_assertion(&signed(Assertion::new("www", "example.", ""))).is_err());
        assert!(validate_assertion(&Assertion::new("www", "example.", ".")).is_err());

        let inverted = Assertion::new("www", "example.", ".")
            .with_signature(Signature::new(Algorithm::Ecdsa256, end, start));
        assert!(validate_assertion(&inverted).is_err());
    }
}
