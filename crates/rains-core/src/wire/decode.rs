use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr};

use ciborium::value::Value;
use chrono::{DateTime, Utc};

use super::{keys, WireLimits, TIMESTAMP_TAG};
use crate::error::{Result, WireError};
use crate::types::{
    Algorithm, Assertion, AssertionSet, Message, Notification, NotificationType, Object,
    ObjectKind, ObjectKindSet, PublicKey, Query, QueryOption, Section, SectionKind,
    ServiceInfo, ShardRange, Signature, Token,
};

const MESSAGE_KEYS: &[u64] = &[keys::CONTENT, keys::CAPABILITIES, keys::TOKEN];
const ASSERTION_KEYS: &[u64] = &[
    keys::SIGNATURES,
    keys::SUBJECT_NAME,
    keys::SUBJECT_ZONE,
    keys::CONTEXT,
    keys::OBJECTS,
];
const SHARD_KEYS: &[u64] = &[
    keys::CONTENT,
    keys::SIGNATURES,
    keys::SUBJECT_ZONE,
    keys::CONTEXT,
    keys::SHARD_RANGE,
];
const ZONE_KEYS: &[u64] = &[
    keys::CONTENT,
    keys::SIGNATURES,
    keys::SUBJECT_ZONE,
    keys::CONTEXT,
];
const QUERY_KEYS: &[u64] = &[
    keys::QUERY_NAME,
    keys::CONTEXT,
    keys::TOKEN,
    keys::QUERY_TYPES,
    keys::QUERY_OPTS,
];
const NOTIFICATION_KEYS: &[u64] = &[keys::TOKEN, keys::NOTE_TYPE, keys::NOTE_DATA];

pub(super) fn message(bytes: &[u8], limits: &WireLimits) -> Result<Message> {
    let root: Value = ciborium::from_reader(bytes)
        .map_err(|e| WireError::malformed(format!("invalid CBOR: {e}")))?;
    Decoder { limits }.message(root)
}

/// Integer-keyed map entries, checked against the keys allowed in context.
struct Fields {
    entries: Vec<(u64, Value)>,
    what: &'static str,
}

impl Fields {
    fn parse(value: Value, allowed: &[u64], what: &'static str) -> Result<Self> {
        let Value::Map(raw) = value else {
            return Err(WireError::malformed(format!("{what}: expected a map")));
        };
        let mut entries: Vec<(u64, Value)> = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            let key = uint(&key, what)?;
            if !allowed.contains(&key) {
                return Err(WireError::malformed(format!("{what}: unknown key {key}")));
            }
            if entries.iter().any(|(k, _)| *k == key) {
                return Err(WireError::malformed(format!("{what}: duplicate key {key}")));
            }
            entries.push((key, value));
        }
        Ok(Self { entries, what })
    }

    fn take(&mut self, key: u64) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.swap_remove(idx).1)
    }

    fn require(&mut self, key: u64) -> Result<Value> {
        self.take(key)
            .ok_or_else(|| WireError::malformed(format!("{}: missing key {key}", self.what)))
    }
}

struct Decoder<'a> {
    limits: &'a WireLimits,
}

impl Decoder<'_> {
    fn message(&self, root: Value) -> Result<Message> {
        let mut fields = Fields::parse(root, MESSAGE_KEYS, "message")?;

        let sections = array(fields.require(keys::CONTENT)?, "message content")?
            .into_iter()
            .map(|s| self.section(s))
            .collect::<Result<Vec<_>>>()?;

        let capabilities = match fields.take(keys::CAPABILITIES) {
            Some(v) => array(v, "capabilities")?
                .into_iter()
                .map(|c| self.text(c, "capability"))
                .collect::<Result<BTreeSet<_>>>()?,
            None => BTreeSet::new(),
        };

        let token = fields
            .take(keys::TOKEN)
            .map_or(Ok(Token::ZERO), |v| self.token(v))?;

        Ok(Message {
            token,
            capabilities,
            sections,
        })
    }

    fn section(&self, value: Value) -> Result<Section> {
        let [kind, body] = pair(value, "section")?;
        let code = uint(&kind, "section kind")?;
        let kind = SectionKind::from_code(code)
            .ok_or_else(|| WireError::malformed(format!("unknown section kind {code}")))?;

        Ok(match kind {
            SectionKind::Assertion => Section::Assertion(self.assertion(body, None)?),
            SectionKind::Shard => Section::AssertionSet(self.assertion_set(body, false)?),
            SectionKind::Zone => Section::AssertionSet(self.assertion_set(body, true)?),
            SectionKind::Query => Section::Query(self.query(body)?),
            SectionKind::Notification => Section::Notification(self.notification(body)?),
        })
    }

    /// `parent` supplies zone and context for assertions nested in a set.
    fn assertion(&self, value: Value, parent: Option<(&str, &str)>) -> Result<Assertion> {
        let mut fields = Fields::parse(value, ASSERTION_KEYS, "assertion")?;

        let subject = self.text(fields.require(keys::SUBJECT_NAME)?, "subject name")?;
        let zone = match (fields.take(keys::SUBJECT_ZONE), parent) {
            (Some(v), _) => self.text(v, "subject zone")?,
            (None, Some((zone, _))) => zone.to_string(),
            (None, None) => return Err(WireError::malformed("assertion: missing subject zone")),
        };
        let context = match (fields.take(keys::CONTEXT), parent) {
            (Some(v), _) => self.text(v, "context")?,
            (None, Some((_, context))) => context.to_string(),
            (None, None) => return Err(WireError::malformed("assertion: missing context")),
        };
        let objects = match fields.take(keys::OBJECTS) {
            Some(v) => array(v, "objects")?
                .into_iter()
                .map(|o| self.object(o))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        let signatures = self.signatures(fields.take(keys::SIGNATURES))?;

        Ok(Assertion {
            subject,
            zone,
            context,
            objects,
            signatures,
        })
    }

    fn assertion_set(&self, value: Value, zone_complete: bool) -> Result<AssertionSet> {
        let (allowed, what) = if zone_complete {
            (ZONE_KEYS, "zone")
        } else {
            (SHARD_KEYS, "shard")
        };
        let mut fields = Fields::parse(value, allowed, what)?;

        let zone = self.text(fields.require(keys::SUBJECT_ZONE)?, "zone name")?;
        let context = self.text(fields.require(keys::CONTEXT)?, "context")?;
        let signatures = self.signatures(fields.take(keys::SIGNATURES))?;
        let shard_range = fields
            .take(keys::SHARD_RANGE)
            .map(|v| self.shard_range(v))
            .transpose()?;

        let parent = Some((zone.as_str(), context.as_str()));
        let assertions = match fields.take(keys::CONTENT) {
            Some(v) => array(v, "set content")?
                .into_iter()
                .map(|a| self.assertion(a, parent))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(AssertionSet {
            zone,
            context,
            assertions,
            signatures,
            shard_range,
            zone_complete,
        })
    }

    fn shard_range(&self, value: Value) -> Result<ShardRange> {
        let [lower, upper] = pair(value, "shard range")?;
        let bound = |v: Value| match v {
            Value::Null => Ok(None),
            other => self.text(other, "shard bound").map(Some),
        };
        Ok(ShardRange {
            lower: bound(lower)?,
            upper: bound(upper)?,
        })
    }

    fn query(&self, value: Value) -> Result<Query> {
        let mut fields = Fields::parse(value, QUERY_KEYS, "query")?;

        let name = self.text(fields.require(keys::QUERY_NAME)?, "query name")?;
        // Older peers send a single context string instead of a set.
        let contexts = match fields.require(keys::CONTEXT)? {
            Value::Text(c) => BTreeSet::from([self.bounded_text(c, "context")?]),
            other => array(other, "query contexts")?
                .into_iter()
                .map(|c| self.text(c, "context"))
                .collect::<Result<BTreeSet<_>>>()?,
        };
        let token = fields
            .take(keys::TOKEN)
            .map_or(Ok(Token::ZERO), |v| self.token(v))?;
        let object_types = match fields.take(keys::QUERY_TYPES) {
            Some(v) => array(v, "query types")?
                .iter()
                .map(object_kind)
                .collect::<Result<ObjectKindSet>>()?,
            None => ObjectKindSet::empty(),
        };
        let options = match fields.take(keys::QUERY_OPTS) {
            Some(v) => array(v, "query options")?
                .iter()
                .map(|o| {
                    let code = uint(o, "query option")?;
                    QueryOption::from_code(code)
                        .ok_or_else(|| WireError::malformed(format!("unknown query option {code}")))
                })
                .collect::<Result<BTreeSet<_>>>()?,
            None => BTreeSet::new(),
        };

        Ok(Query {
            name,
            contexts,
            token,
            object_types,
            options,
        })
    }

    fn notification(&self, value: Value) -> Result<Notification> {
        let mut fields = Fields::parse(value, NOTIFICATION_KEYS, "notification")?;

        let code = uint(&fields.require(keys::NOTE_TYPE)?, "notification type")?;
        let kind = NotificationType::from_code(code)
            .ok_or_else(|| WireError::malformed(format!("unknown notification type {code}")))?;
        let token = fields
            .take(keys::TOKEN)
            .map_or(Ok(Token::ZERO), |v| self.token(v))?;
        let data = fields
            .take(keys::NOTE_DATA)
            .map_or(Ok(String::new()), |v| self.text(v, "notification data"))?;

        Ok(Notification { kind, data, token })
    }

    fn signatures(&self, value: Option<Value>) -> Result<Vec<Signature>> {
        let Some(value) = value else {
            return Ok(Vec::new());
        };
        array(value, "signatures")?
            .into_iter()
            .map(|s| self.signature(s))
            .collect()
    }

    fn signature(&self, value: Value) -> Result<Signature> {
        let items = array(value, "signature")?;
        let Ok([alg, from, until, revocation, content]) = <[Value; 5]>::try_from(items) else {
            return Err(WireError::malformed("signature: expected 5 elements"));
        };
        Ok(Signature {
            algorithm: algorithm(&alg)?,
            valid_from: timestamp(from)?,
            valid_until: timestamp(until)?,
            revocation_token: self.bytes(revocation, "revocation token")?,
            content: self.bytes(content, "signature content")?,
        })
    }

    fn object(&self, value: Value) -> Result<Object> {
        let mut items = array(value, "object")?.into_iter();
        let kind = items
            .next()
            .ok_or_else(|| WireError::malformed("object: empty array"))?;
        let kind = object_kind(&kind)?;
        let fields: Vec<Value> = items.collect();
        let arity = fields.len();
        let wrong_arity =
            || WireError::malformed(format!("object {kind}: unexpected field count {arity}"));

        let obj = match kind {
            ObjectKind::Name
            | ObjectKind::Redirection
            | ObjectKind::Nameset
            | ObjectKind::Registrar
            | ObjectKind::Registrant => {
                let [value] = <[Value; 1]>::try_from(fields).map_err(|_| wrong_arity())?;
                let s = self.text(value, "object text")?;
                match kind {
                    ObjectKind::Name => Object::Name(s),
                    ObjectKind::Redirection => Object::Redirection(s),
                    ObjectKind::Nameset => Object::Nameset(s),
                    ObjectKind::Registrar => Object::Registrar(s),
                    _ => Object::Registrant(s),
                }
            }
            ObjectKind::Ip6Address => {
                let [value] = <[Value; 1]>::try_from(fields).map_err(|_| wrong_arity())?;
                let octets: [u8; 16] = self
                    .bytes(value, "ip6 address")?
                    .try_into()
                    .map_err(|_| WireError::malformed("ip6 address: expected 16 bytes"))?;
                Object::Ip6(Ipv6Addr::from(octets))
            }
            ObjectKind::Ip4Address => {
                let [value] = <[Value; 1]>::try_from(fields).map_err(|_| wrong_arity())?;
                let octets: [u8; 4] = self
                    .bytes(value, "ip4 address")?
                    .try_into()
                    .map_err(|_| WireError::malformed("ip4 address: expected 4 bytes"))?;
                Object::Ip4(Ipv4Addr::from(octets))
            }
            ObjectKind::Delegation | ObjectKind::InfraKey => {
                let [alg, key] = <[Value; 2]>::try_from(fields).map_err(|_| wrong_arity())?;
                let key = PublicKey {
                    algorithm: algorithm(&alg)?,
                    key: self.bytes(key, "public key")?,
                };
                if kind == ObjectKind::Delegation {
                    Object::Delegation(key)
                } else {
                    Object::InfraKey(key)
                }
            }
            ObjectKind::Certificate => {
                let [value] = <[Value; 1]>::try_from(fields).map_err(|_| wrong_arity())?;
                Object::Certificate(self.bytes(value, "certificate")?)
            }
            ObjectKind::Service => {
                let [host, port, priority] =
                    <[Value; 3]>::try_from(fields).map_err(|_| wrong_arity())?;
                Object::Service(ServiceInfo {
                    hostname: self.text(host, "service host")?,
                    port: small(&port, "service port")?,
                    priority: small(&priority, "service priority")?,
                })
            }
        };
        Ok(obj)
    }

    fn text(&self, value: Value, what: &str) -> Result<String> {
        match value {
            Value::Text(s) => self.bounded_text(s, what),
            _ => Err(WireError::malformed(format!("{what}: expected text"))),
        }
    }

    fn bounded_text(&self, s: String, what: &str) -> Result<String> {
        if s.len() > self.limits.max_string_len {
            return Err(WireError::malformed(format!(
                "{what}: {} bytes exceeds limit {}",
                s.len(),
                self.limits.max_string_len
            )));
        }
        Ok(s)
    }

    fn bytes(&self, value: Value, what: &str) -> Result<Vec<u8>> {
        match value {
            Value::Bytes(b) if b.len() > self.limits.max_bytes_len => Err(WireError::malformed(
                format!("{what}: {} bytes exceeds limit {}", b.len(), self.limits.max_bytes_len),
            )),
            Value::Bytes(b) => Ok(b),
            _ => Err(WireError::malformed(format!("{what}: expected bytes"))),
        }
    }

    fn token(&self, value: Value) -> Result<Token> {
        let bytes: [u8; 16] = self
            .bytes(value, "token")?
            .try_into()
            .map_err(|_| WireError::malformed("token: expected 16 bytes"))?;
        Ok(Token::new(bytes))
    }
}

fn array(value: Value, what: &str) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(WireError::malformed(format!("{what}: expected an array"))),
    }
}

fn pair(value: Value, what: &str) -> Result<[Value; 2]> {
    let items = array(value, what)?;
    let len = items.len();
    <[Value; 2]>::try_from(items)
        .map_err(|_| WireError::malformed(format!("{what}: expected 2 elements, got {len}")))
}

fn uint(value: &Value, what: &str) -> Result<u64> {
    match value {
        Value::Integer(i) => u64::try_from(*i)
            .map_err(|_| WireError::malformed(format!("{what}: negative or oversized integer"))),
        _ => Err(WireError::malformed(format!("{what}: expected an integer"))),
    }
}

fn small(value: &Value, what: &str) -> Result<u16> {
    let n = uint(value, what)?;
    u16::try_from(n).map_err(|_| WireError::malformed(format!("{what}: {n} out of range")))
}

fn algorithm(value: &Value) -> Result<Algorithm> {
    let code = uint(value, "algorithm")?;
    Algorithm::from_code(code)
        .ok_or_else(|| WireError::malformed(format!("unknown algorithm {code}")))
}

fn object_kind(value: &Value) -> Result<ObjectKind> {
    let code = uint(value, "object kind")?;
    ObjectKind::from_code(code)
        .ok_or_else(|| WireError::malformed(format!("unknown object kind {code}")))
}

fn timestamp(value: Value) -> Result<DateTime<Utc>> {
    let Value::Tag(TIMESTAMP_TAG, inner) = value else {
        return Err(WireError::malformed("timestamp: expected tag 1"));
    };
    let Value::Integer(secs) = *inner else {
        return Err(WireError::malformed("timestamp: expected integer seconds"));
    };
    let secs = i64::try_from(secs).map_err(|_| WireError::malformed("timestamp: out of range"))?;
    DateTime::from_timestamp(secs, 0).ok_or_else(|| WireError::malformed("timestamp: out of range"))
}
