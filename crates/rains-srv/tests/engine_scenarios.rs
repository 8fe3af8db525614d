//! End-to-end behavior of the query engine over its cache.

use chrono::{DateTime, TimeDelta, Utc};
use proptest::prelude::*;
use rains_core::{
    Algorithm, Assertion, AssertionSet, Message, NotificationType, Object, ObjectKind,
    ObjectKindSet, Query, QueryOption, Section, ShardRange, Signature, Token,
};
use rains_srv::{LookupOutcome, Outbound, QueryEngine, Resolution, SrvError};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(String, Message)>>,
}

impl Outbound for Recorder {
    fn send(&self, peer: &str, message: Message) -> rains_srv::Result<()> {
        self.sent.lock().unwrap().push((peer.to_string(), message));
        Ok(())
    }
}

/// Collects every resolution delivered to callbacks it hands out.
#[derive(Clone, Default)]
struct Resolutions(Arc<Mutex<Vec<Resolution>>>);

impl Resolutions {
    fn callback(&self) -> rains_srv::engine::OnResolve {
        let seen = Arc::clone(&self.0);
        Box::new(move |resolution| seen.lock().unwrap().push(resolution))
    }

    fn all(&self) -> Vec<Resolution> {
        self.0.lock().unwrap().clone()
    }
}

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn signed_for(hours: i64) -> Signature {
    Signature::new(
        Algorithm::Ecdsa256,
        now() - TimeDelta::minutes(1),
        now() + TimeDelta::hours(hours),
    )
}

fn www() -> Assertion {
    Assertion::new("www", "example.", ".")
        .with_object(Object::Name("www.example.".into()))
        .with_signature(signed_for(1))
}

fn names() -> ObjectKindSet {
    ObjectKindSet::empty().with(ObjectKind::Name)
}

fn engine(timeout_secs: i64) -> (QueryEngine, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let engine = QueryEngine::new(recorder.clone(), TimeDelta::seconds(timeout_secs));
    (engine, recorder)
}

#[test]
fn cached_assertion_answers_synchronously() {
    let (engine, _) = engine(2);
    engine.assert(".", www(), now()).unwrap();

    let seen = Resolutions::default();
    let token = engine
        .query(Query::new("www", ".").with_types(names()), None, now(), seen.callback())
        .unwrap();

    assert_eq!(token, None);
    assert_eq!(seen.all(), vec![Resolution::Answered(vec![www()])]);
    assert_eq!(engine.pending_len().unwrap(), 0);
}

#[test]
fn unanswered_query_times_out_exactly_once() {
    let (engine, _) = engine(2);
    let seen = Resolutions::default();
    let token = engine
        .query(Query::new("new", "."), None, now(), seen.callback())
        .unwrap();
    assert!(token.is_some());

    let stats = engine.reap(now() + TimeDelta::seconds(1)).unwrap();
    assert_eq!(stats.queries_timed_out, 0);
    assert!(seen.all().is_empty());

    let stats = engine.reap(now() + TimeDelta::seconds(3)).unwrap();
    assert_eq!(stats.queries_timed_out, 1);
    engine.reap(now() + TimeDelta::seconds(10)).unwrap();
    assert_eq!(seen.all(), vec![Resolution::NotAvailable]);
}

#[test]
fn pending_query_resolves_at_most_once() {
    let (engine, _) = engine(5);
    let seen = Resolutions::default();
    engine
        .query(
            Query::new("www.example.", ".").with_types(names()),
            None,
            now(),
            seen.callback(),
        )
        .unwrap();

    assert_eq!(engine.assert(".", www(), now()).unwrap(), 1);
    let again = www().with_signature(signed_for(2));
    assert_eq!(engine.assert(".", again, now()).unwrap(), 0);
    engine.reap(now() + TimeDelta::seconds(10)).unwrap();

    assert_eq!(seen.all(), vec![Resolution::Answered(vec![www()])]);
}

#[test]
fn assertion_of_other_kind_does_not_resolve() {
    let (engine, _) = engine(5);
    let seen = Resolutions::default();
    engine
        .query(
            Query::new("www", ".").with_types(ObjectKindSet::empty().with(ObjectKind::Ip6Address)),
            None,
            now(),
            seen.callback(),
        )
        .unwrap();

    assert_eq!(engine.assert(".", www(), now()).unwrap(), 0);
    assert_eq!(engine.pending_len().unwrap(), 1);
}

#[test]
fn complete_shard_is_an_authoritative_negative() {
    let (engine, _) = engine(5);
    let mut shard = AssertionSet::shard(
        "example.",
        ".",
        Some(ShardRange::new(Some("a"), Some("m"))),
    );
    shard.assertions.push(
        Assertion::new("carol", "example.", ".").with_object(Object::Name("c.example.".into())),
    );
    shard.signatures.push(signed_for(1));
    engine.assert_set(shard, now()).unwrap();

    assert_eq!(
        engine
            .lookup(".", "example.", "bob", ObjectKindSet::empty(), now())
            .unwrap(),
        LookupOutcome::AuthoritativeNegative
    );
    assert_eq!(
        engine
            .lookup(".", "example.", "zed", ObjectKindSet::empty(), now())
            .unwrap(),
        LookupOutcome::Unknown
    );

    let seen = Resolutions::default();
    engine
        .query(Query::new("bob.example.", "."), None, now(), seen.callback())
        .unwrap();
    assert_eq!(seen.all(), vec![Resolution::NoAssertion]);
}

#[test]
fn shard_lower_bound_is_inclusive() {
    let (engine, _) = engine(5);
    let mut shard = AssertionSet::shard(
        "example.",
        ".",
        Some(ShardRange::new(Some("a"), Some("m"))),
    );
    shard.assertions.push(
        Assertion::new("a", "example.", ".").with_object(Object::Name("a.example.".into())),
    );
    shard.signatures.push(signed_for(1));
    engine.assert_set(shard, now()).unwrap();

    assert!(matches!(
        engine
            .lookup(".", "example.", "a", names(), now())
            .unwrap(),
        LookupOutcome::Hit(found) if found[0].subject == "a"
    ));
    assert_eq!(
        engine
            .lookup(".", "example.", "a", ObjectKindSet::empty().with(ObjectKind::Ip4Address), now())
            .unwrap(),
        LookupOutcome::AuthoritativeNegative
    );
    assert_eq!(
        engine
            .lookup(".", "example.", "m", ObjectKindSet::empty(), now())
            .unwrap(),
        LookupOutcome::Unknown
    );
}

#[test]
fn arriving_shard_resolves_pending_queries() {
    let (engine, _) = engine(5);
    let seen = Resolutions::default();
    engine
        .query(Query::new("bob.example.", "."), None, now(), seen.callback())
        .unwrap();
    engine
        .query(Query::new("carol.example.", "."), None, now(), seen.callback())
        .unwrap();
    engine
        .query(Query::new("zed.example.", "."), None, now(), seen.callback())
        .unwrap();

    let mut shard = AssertionSet::shard(
        "example.",
        ".",
        Some(ShardRange::new(Some("a"), Some("m"))),
    );
    let carol =
        Assertion::new("carol", "example.", ".").with_object(Object::Name("c.example.".into()));
    shard.assertions.push(carol);
    shard.signatures.push(signed_for(1));

    assert_eq!(engine.assert_set(shard, now()).unwrap(), 2);
    assert_eq!(engine.pending_len().unwrap(), 1);

    let results = seen.all();
    assert!(results.contains(&Resolution::NoAssertion));
    assert!(results
        .iter()
        .any(|r| matches!(r, Resolution::Answered(found) if found[0].subject == "carol")));
}

#[test]
fn complete_zone_resolves_only_its_own_subtree() {
    let (engine, _) = engine(5);
    let seen = Resolutions::default();
    for name in ["bob.example.", "example.", "bob.other.", "bob"] {
        engine
            .query(Query::new(name, "."), None, now(), seen.callback())
            .unwrap();
    }

    let mut zone = AssertionSet::zone("example.", ".");
    zone.signatures.push(signed_for(1));
    assert_eq!(engine.assert_set(zone, now()).unwrap(), 2);
    assert_eq!(
        seen.all(),
        vec![Resolution::NoAssertion, Resolution::NoAssertion]
    );
    assert_eq!(engine.pending_len().unwrap(), 2);
}

#[test]
fn cached_answers_only_never_registers() {
    let (engine, recorder) = engine(5);
    let seen = Resolutions::default();
    let token = engine
        .query(
            Query::new("new", ".").with_option(QueryOption::CachedAnswersOnly),
            None,
            now(),
            seen.callback(),
        )
        .unwrap();

    assert_eq!(token, None);
    assert_eq!(seen.all(), vec![Resolution::NoAssertion]);
    assert_eq!(engine.pending_len().unwrap(), 0);
    assert!(recorder.sent.lock().unwrap().is_empty());
}

#[test]
fn malformed_input_is_inconsistent() {
    let (engine, _) = engine(5);
    let err = engine
        .query(Query::new("", "."), None, now(), Box::new(|_| {}))
        .unwrap_err();
    assert!(matches!(err, SrvError::Inconsistent(_)));

    let mut no_context = Query::new("www", ".");
    no_context.contexts.clear();
    assert!(engine
        .query(no_context, None, now(), Box::new(|_| {}))
        .is_err());

    let unsigned = Assertion::new("www", "example.", ".");
    let err = engine.assert(".", unsigned, now()).unwrap_err();
    assert_eq!(err.notification_type(), NotificationType::InconsistentMessage);
    assert_eq!(engine.cached_len().unwrap(), 0);
}

#[test]
fn duplicate_caller_token_is_rejected() {
    let (engine, _) = engine(5);
    let token = Token::new([7; 16]);
    let query = Query::new("new", ".").with_token(token);
    assert_eq!(
        engine
            .query(query.clone(), None, now(), Box::new(|_| {}))
            .unwrap(),
        Some(token)
    );
    assert!(engine.query(query, None, now(), Box::new(|_| {})).is_err());
}

fn redirect_to_ns(engine: &QueryEngine) {
    let redirect = Assertion::new("example", ".", ".")
        .with_object(Object::Redirection("ns.example.".into()))
        .with_signature(signed_for(1));
    engine.assert(".", redirect, now()).unwrap();
}

#[test]
fn miss_is_forwarded_along_cached_redirection() {
    let (engine, recorder) = engine(5);
    redirect_to_ns(&engine);

    let seen = Resolutions::default();
    let token = engine
        .query(
            Query::new("www.example.", ".").with_types(names()),
            Some("client"),
            now(),
            seen.callback(),
        )
        .unwrap()
        .unwrap();

    let sent = recorder.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    let (peer, message) = &sent[0];
    assert_eq!(peer, "ns.example.");
    assert_eq!(message.token, token);
    assert!(matches!(
        &message.sections[..],
        [Section::Query(q)] if q.name == "www.example." && q.token == token
    ));

    // The authority answers by asserting.
    assert_eq!(engine.assert(".", www(), now()).unwrap(), 1);
    assert_eq!(seen.all(), vec![Resolution::Answered(vec![www()])]);
}

#[test]
fn query_from_redirection_target_is_not_bounced_back() {
    let (engine, recorder) = engine(5);
    redirect_to_ns(&engine);
    engine
        .query(
            Query::new("www.example.", "."),
            Some("ns.example."),
            now(),
            Box::new(|_| {}),
        )
        .unwrap();
    assert!(recorder.sent.lock().unwrap().is_empty());
    assert_eq!(engine.pending_len().unwrap(), 1);
}

#[test]
fn notifications_resolve_forwarded_queries() {
    let (engine, _) = engine(5);
    redirect_to_ns(&engine);

    let seen = Resolutions::default();
    let first = engine
        .query(Query::new("www.example.", "."), None, now(), seen.callback())
        .unwrap()
        .unwrap();
    let second = engine
        .query(Query::new("ftp.example.", "."), None, now(), seen.callback())
        .unwrap()
        .unwrap();

    let ns = "ns.example.";
    assert!(!engine.notify(ns, first, NotificationType::Heartbeat).unwrap());
    assert!(engine.notify(ns, first, NotificationType::NoAssertion).unwrap());
    assert!(engine.notify(ns, second, NotificationType::ServerError).unwrap());
    assert!(!engine.notify(ns, second, NotificationType::NoAssertion).unwrap());

    assert_eq!(
        seen.all(),
        vec![Resolution::NoAssertion, Resolution::NotAvailable]
    );
}

#[test]
fn notification_ignored_for_local_query() {
    let (engine, _) = engine(5);
    let token = engine
        .query(Query::new("new", "."), None, now(), Box::new(|_| {}))
        .unwrap()
        .unwrap();
    assert!(!engine.notify("ns.example.", token, NotificationType::NoAssertion).unwrap());
    assert_eq!(engine.pending_len().unwrap(), 1);
}

#[test]
fn notification_from_other_peer_is_ignored() {
    let (engine, _) = engine(5);
    redirect_to_ns(&engine);

    let seen = Resolutions::default();
    let token = engine
        .query(Query::new("www.example.", "."), Some("client"), now(), seen.callback())
        .unwrap()
        .unwrap();

    for peer in ["client", "intruder"] {
        assert!(!engine.notify(peer, token, NotificationType::NoAssertion).unwrap());
    }
    assert_eq!(engine.pending_len().unwrap(), 1);
    assert!(seen.all().is_empty());

    assert!(engine.notify("ns.example.", token, NotificationType::NoAssertion).unwrap());
    assert_eq!(seen.all(), vec![Resolution::NoAssertion]);
}

#[test]
fn cancel_drops_without_resolving() {
    let (engine, _) = engine(2);
    let seen = Resolutions::default();
    let token = engine
        .query(Query::new("new", "."), None, now(), seen.callback())
        .unwrap()
        .unwrap();

    assert!(engine.cancel(token).unwrap());
    assert!(!engine.cancel(token).unwrap());
    engine.reap(now() + TimeDelta::seconds(3)).unwrap();
    assert!(seen.all().is_empty());
}

#[test]
fn closed_peer_fails_its_queries() {
    let (engine, _) = engine(5);
    redirect_to_ns(&engine);
    let seen = Resolutions::default();
    engine
        .query(Query::new("a", "."), Some("client"), now(), seen.callback())
        .unwrap();
    engine
        .query(Query::new("www.example.", "."), Some("other"), now(), seen.callback())
        .unwrap();
    engine
        .query(Query::new("b", "."), Some("other"), now(), seen.callback())
        .unwrap();

    assert_eq!(engine.fail_peer("client").unwrap(), 1);
    assert_eq!(engine.fail_peer("ns.example.").unwrap(), 1);
    assert_eq!(engine.fail_peer("nobody").unwrap(), 0);
    assert_eq!(engine.pending_len().unwrap(), 1);
    assert_eq!(
        seen.all(),
        vec![Resolution::NotAvailable, Resolution::NotAvailable]
    );
}

#[test]
fn delegation_keys_follow_delegating_assertions() {
    let (engine, _) = engine(5);
    let key = rains_core::PublicKey {
        algorithm: Algorithm::Ecdsa384,
        key: vec![1, 2, 3],
    };
    let delegation = Assertion::new("example", ".", ".")
        .with_object(Object::Delegation(key.clone()))
        .with_signature(signed_for(1));
    engine.assert(".", delegation, now()).unwrap();

    assert_eq!(
        engine.delegation_keys(".", "example.", now()).unwrap(),
        vec![key]
    );
    assert!(engine
        .delegation_keys(".", "example.", now() + TimeDelta::hours(2))
        .unwrap()
        .is_empty());
}

#[test]
fn engine_is_shared_across_threads() {
    fn shareable<T: Send + Sync>() {}
    shareable::<QueryEngine>();

    let (engine, _) = engine(2);
    let engine = Arc::new(engine);
    let seen = Resolutions::default();
    engine
        .query(
            Query::new("www.example.", ".").with_types(names()),
            None,
            now(),
            seen.callback(),
        )
        .unwrap();

    let asserter = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || engine.assert(".", www(), now()).unwrap())
    };
    assert_eq!(asserter.join().unwrap(), 1);
    assert_eq!(seen.all(), vec![Resolution::Answered(vec![www()])]);
}

#[tokio::test]
async fn reap_runs_on_a_spawned_task() {
    let (engine, _) = engine(2);
    let engine = Arc::new(engine);
    let seen = Resolutions::default();
    engine
        .query(Query::new("new", "."), None, now(), seen.callback())
        .unwrap();

    let reaper = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.reap(now() + TimeDelta::seconds(3)) }
    });
    let stats = reaper.await.unwrap().unwrap();
    assert_eq!(stats.queries_timed_out, 1);
    assert_eq!(seen.all(), vec![Resolution::NotAvailable]);
}

proptest! {
    /// After a reap at `t`, exactly the assertions still valid past `t`
    /// remain cached.
    #[test]
    fn reap_keeps_exactly_the_unexpired(
        windows in prop::collection::vec(prop::collection::vec(1i64..1000, 1..4), 1..20),
        at in 0i64..1200,
    ) {
        let (engine, _) = engine(5);
        for (i, ends) in windows.iter().enumerate() {
            let mut assertion = Assertion::new(format!("s{i}"), "example.", ".")
                .with_object(Object::Name("x.example.".into()));
            for end in ends {
                assertion = assertion.with_signature(Signature::new(
                    Algorithm::Ecdsa256,
                    now() - TimeDelta::seconds(100),
                    now() + TimeDelta::seconds(*end),
                ));
            }
            engine.assert(".", assertion, now()).unwrap();
        }

        let stats = engine.reap(now() + TimeDelta::seconds(at)).unwrap();
        let survivors = windows
            .iter()
            .filter(|ends| ends.iter().max().is_some_and(|end| *end > at))
            .count();
        prop_assert_eq!(engine.cached_len().unwrap(), survivors);
        prop_assert_eq!(stats.assertions_removed, windows.len() - survivors);
    }
}
