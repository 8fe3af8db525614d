//! Message dispatch: decodes inbound frames and drives the engine section
//! by section, replying to the sending peer.

use chrono::{DateTime, Utc};
use rains_core::{wire, Message, NotificationType, Section, Token, WireLimits};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::ServerConfig;
use crate::engine::{OnResolve, QueryEngine, Resolution};
use crate::switchboard::{Inbound, Outbound};

pub struct Dispatcher {
    engine: Arc<QueryEngine>,
    outbound: Arc<dyn Outbound>,
    limits: WireLimits,
    capabilities: BTreeSet<String>,
}

impl Dispatcher {
    pub fn new(engine: Arc<QueryEngine>, outbound: Arc<dyn Outbound>, config: &ServerConfig) -> Self {
        Self {
            engine,
            outbound,
            limits: config.limits,
            capabilities: config.capabilities.iter().cloned().collect(),
        }
    }

    pub fn handle_inbound(&self, inbound: Inbound, now: DateTime<Utc>) {
        match inbound {
            Inbound::Frame { peer, bytes } => self.handle_frame(&peer, &bytes, now),
            Inbound::Oversized { peer, size } => {
                warn!(peer = %peer, size, "rejecting oversized frame");
                self.reply(
                    &peer,
                    Message::notification(
                        NotificationType::TooLarge,
                        Token::ZERO,
                        format!(
                            "frame of {size} bytes exceeds maximum {}",
                            self.limits.max_message_size
                        ),
                    ),
                );
            }
            Inbound::Closed { peer } => match self.engine.fail_peer(&peer) {
                Ok(0) => {}
                Ok(failed) => debug!(peer = %peer, failed, "failed queries of closed peer"),
                Err(e) => error!(peer = %peer, error = %e, "failed to release peer queries"),
            },
        }
    }

    /// Decode a frame and process its sections. Undecodable frames are
    /// answered with a notification carrying the zero token.
    pub fn handle_frame(&self, peer: &str, bytes: &[u8], now: DateTime<Utc>) {
        match wire::decode(bytes, &self.limits) {
            Ok(message) => self.handle_message(peer, message, now),
            Err(e) => {
                warn!(peer = %peer, error = %e, "failed to decode message");
                self.reply(
                    peer,
                    Message::notification(e.notification_type(), Token::ZERO, e.to_string()),
                );
            }
        }
    }

    /// Process sections in wire order. A failing section is answered with
    /// the matching notification and does not stop the rest.
    pub fn handle_message(&self, peer: &str, message: Message, now: DateTime<Utc>) {
        let Message {
            token,
            capabilities,
            sections,
        } = message;

        let unknown: Vec<&str> = capabilities
            .difference(&self.capabilities)
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            self.reply(
                peer,
                Message::notification(NotificationType::UnknownCapability, token, unknown.join(" ")),
            );
        }

        for section in sections {
            let kind = section.kind();
            if let Err(e) = self.handle_section(peer, token, section, now) {
                debug!(peer = %peer, section = ?kind, error = %e, "section rejected");
                self.reply(
                    peer,
                    Message::notification(e.notification_type(), token, e.to_string()),
                );
            }
        }
    }

    fn handle_section(
        &self,
        peer: &str,
        token: Token,
        section: Section,
        now: DateTime<Utc>,
    ) -> crate::Result<()> {
        match section {
            Section::Assertion(assertion) => {
                let context = assertion.context.clone();
                self.engine.assert(&context, assertion, now)?;
            }
            Section::AssertionSet(set) => {
                self.engine.assert_set(set, now)?;
            }
            Section::Query(query) => {
                let reply_token = if query.token.is_zero() { token } else { query.token };
                let on_resolve = self.responder(peer, reply_token);
                self.engine.query(query, Some(peer), now, on_resolve)?;
            }
            Section::Notification(note) => {
                if note.kind != NotificationType::Heartbeat
                    && !self.engine.notify(peer, note.token, note.kind)?
                {
                    debug!(
                        peer = %peer,
                        token = %note.token,
                        kind = %note.kind,
                        data = %note.data,
                        "notification matches no query forwarded to this peer"
                    );
                }
            }
        }
        Ok(())
    }

    /// Callback answering `peer` once its query resolves.
    fn responder(&self, peer: &str, token: Token) -> OnResolve {
        let outbound = Arc::clone(&self.outbound);
        let peer = peer.to_string();
        Box::new(move |resolution| {
            let message = match resolution {
                Resolution::Answered(assertions) => Message::new(
                    token,
                    assertions.into_iter().map(Section::Assertion).collect(),
                ),
                Resolution::NoAssertion => {
                    Message::notification(NotificationType::NoAssertion, token, "")
                }
                Resolution::NotAvailable => {
                    Message::notification(NotificationType::NotAvailable, token, "")
                }
            };
            if let Err(e) = outbound.send(&peer, message) {
                debug!(peer = %peer, token = %token, error = %e, "dropped answer");
            }
        })
    }

    fn reply(&self, peer: &str, message: Message) {
        if let Err(e) = self.outbound.send(peer, message) {
            debug!(peer = %peer, error = %e, "dropped reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use rains_core::{Algorithm, Assertion, Object, ObjectKind, ObjectKindSet, Query, Signature};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, Message)>>,
    }

    impl Outbound for Recorder {
        fn send(&self, peer: &str, message: Message) -> crate::Result<()> {
            self.sent.lock().unwrap().push((peer.to_string(), message));
            Ok(())
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<(String, Message)> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    fn setup() -> (Dispatcher, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let engine = Arc::new(QueryEngine::new(recorder.clone(), TimeDelta::seconds(2)));
        let dispatcher = Dispatcher::new(engine, recorder.clone(), &ServerConfig::default());
        (dispatcher, recorder)
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn www() -> Assertion {
        Assertion::new("www", "example.", ".")
            .with_object(Object::Name("www.example.".into()))
            .with_signature(Signature::new(
                Algorithm::Ecdsa256,
                now() - TimeDelta::hours(1),
                now() + TimeDelta::hours(1),
            ))
    }

    fn notification_kinds(message: &Message) -> Vec<NotificationType> {
        message
            .sections
            .iter()
            .filter_map(|s| match s {
                Section::Notification(n) => Some(n.kind),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_garbage_gets_malformed_notification() {
        let (dispatcher, recorder) = setup();
        dispatcher.handle_frame("client", &[0xff, 0x00], now());

        let sent = recorder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "client");
        assert_eq!(sent[0].1.token, Token::ZERO);
        assert_eq!(
            notification_kinds(&sent[0].1),
            vec![NotificationType::MalformedMessage]
        );
    }

    #[test]
    fn test_assert_then_query_answers_from_cache() {
        let (dispatcher, recorder) = setup();
        let assert = Message::new(Token::new([1; 16]), vec![Section::Assertion(www())]);
        dispatcher.handle_frame("authority", &wire::encode(&assert).unwrap(), now());
        assert!(recorder.take().is_empty());

        let query = Query::new("www", ".")
            .with_types(ObjectKindSet::empty().with(ObjectKind::Name))
            .with_token(Token::new([9; 16]));
        let ask = Message::new(Token::new([2; 16]), vec![Section::Query(query)]);
        dispatcher.handle_frame("client", &wire::encode(&ask).unwrap(), now());

        let sent = recorder.take();
        assert_eq!(sent.len(), 1);
        let (peer, answer) = &sent[0];
        assert_eq!(peer, "client");
        assert_eq!(answer.token, Token::new([9; 16]));
        assert_eq!(answer.sections, vec![Section::Assertion(www())]);
    }

    #[test]
    fn test_bad_section_is_reported_and_rest_processed() {
        let (dispatcher, recorder) = setup();
        let unsigned = Assertion::new("bad", "example.", ".");
        let message = Message::new(
            Token::new([3; 16]),
            vec![Section::Assertion(unsigned), Section::Assertion(www())],
        );
        dispatcher.handle_message("authority", message, now());

        let sent = recorder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.token, Token::new([3; 16]));
        assert_eq!(
            notification_kinds(&sent[0].1),
            vec![NotificationType::InconsistentMessage]
        );
        assert_eq!(dispatcher.engine.cached_len().unwrap(), 1);
    }

    #[test]
    fn test_timeout_answers_not_available() {
        let (dispatcher, recorder) = setup();
        let query = Query::new("new", ".");
        let message = Message::new(Token::new([4; 16]), vec![Section::Query(query)]);
        dispatcher.handle_message("client", message, now());
        assert!(recorder.take().is_empty());

        dispatcher.engine.reap(now() + TimeDelta::seconds(3)).unwrap();
        let sent = recorder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.token, Token::new([4; 16]));
        assert_eq!(
            notification_kinds(&sent[0].1),
            vec![NotificationType::NotAvailable]
        );
    }

    #[test]
    fn test_oversized_and_closed() {
        let (dispatcher, recorder) = setup();
        dispatcher.handle_message(
            "client",
            Message::new(Token::ZERO, vec![Section::Query(Query::new("new", "."))]),
            now(),
        );
        dispatcher.handle_inbound(
            Inbound::Oversized {
                peer: "client".into(),
                size: 1 << 20,
            },
            now(),
        );
        let sent = recorder.take();
        assert_eq!(notification_kinds(&sent[0].1), vec![NotificationType::TooLarge]);

        dispatcher.handle_inbound(
            Inbound::Closed {
                peer: "client".into(),
            },
            now(),
        );
        assert_eq!(dispatcher.engine.pending_len().unwrap(), 0);
    }

    #[test]
    fn test_only_forward_target_can_answer_by_notification() {
        let (dispatcher, recorder) = setup();
        let redirect = Assertion::new("example", ".", ".")
            .with_object(Object::Redirection("ns.example.".into()))
            .with_signature(Signature::new(
                Algorithm::Ecdsa256,
                now() - TimeDelta::hours(1),
                now() + TimeDelta::hours(1),
            ));
        dispatcher.handle_message(
            "authority",
            Message::new(Token::ZERO, vec![Section::Assertion(redirect)]),
            now(),
        );
        let ask = Query::new("www.example.", ".").with_token(Token::new([6; 16]));
        dispatcher.handle_message(
            "client",
            Message::new(Token::ZERO, vec![Section::Query(ask)]),
            now(),
        );
        let sent = recorder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ns.example.");
        let forwarded = sent[0].1.token;

        let denial = Message::notification(NotificationType::NoAssertion, forwarded, "");
        dispatcher.handle_message("intruder", denial.clone(), now());
        assert!(recorder.take().is_empty());
        assert_eq!(dispatcher.engine.pending_len().unwrap(), 1);

        dispatcher.handle_message("ns.example.", denial, now());
        let sent = recorder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "client");
        assert_eq!(
            notification_kinds(&sent[0].1),
            vec![NotificationType::NoAssertion]
        );
    }

    #[test]
    fn test_unknown_capability_is_reported() {
        let (dispatcher, recorder) = setup();
        let mut message = Message::new(Token::new([5; 16]), Vec::new());
        message.capabilities.insert("urn:x-rains:tlssrv".into());
        dispatcher.handle_message("client", message, now());

        let sent = recorder.take();
        assert_eq!(
            notification_kinds(&sent[0].1),
            vec![NotificationType::UnknownCapability]
        );
    }
}
