use ciborium::value::Value;
use chrono::{DateTime, Utc};

use super::{keys, TIMESTAMP_TAG};
use crate::error::{Result, WireError};
use crate::types::{
    Assertion, AssertionSet, Message, Notification, Object, PublicKey, Query, Section,
    Signature, Token,
};

pub(super) fn message(msg: &Message) -> Result<Vec<u8>> {
    let content = msg.sections.iter().map(section).collect::<Result<_>>()?;
    let mut entries = vec![(keys::CONTENT, Value::Array(content))];
    if !msg.capabilities.is_empty() {
        entries.push((
            keys::CAPABILITIES,
            Value::Array(msg.capabilities.iter().map(|c| text(c)).collect()),
        ));
    }
    if !msg.token.is_zero() {
        entries.push((keys::TOKEN, token(msg.token)));
    }

    let mut buf = Vec::new();
    ciborium::into_writer(&map(entries), &mut buf).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(buf)
}

fn section(section: &Section) -> Result<Value> {
    let body = match section {
        Section::Assertion(a) => assertion(a, None)?,
        Section::AssertionSet(set) => assertion_set(set)?,
        Section::Query(q) => query(q),
        Section::Notification(n) => notification(n),
    };
    Ok(Value::Array(vec![uint(section.kind().code()), body]))
}

/// `parent` is the enclosing set's (zone, context); matching fields are
/// left out and inherited by the decoder.
fn assertion(a: &Assertion, parent: Option<(&str, &str)>) -> Result<Value> {
    let mut entries = vec![
        (keys::SIGNATURES, signatures(&a.signatures)?),
        (keys::SUBJECT_NAME, text(&a.subject)),
    ];
    if parent.map_or(true, |(zone, _)| zone != a.zone) {
        entries.push((keys::SUBJECT_ZONE, text(&a.zone)));
    }
    if parent.map_or(true, |(_, context)| context != a.context) {
        entries.push((keys::CONTEXT, text(&a.context)));
    }
    entries.push((
        keys::OBJECTS,
        Value::Array(a.objects.iter().map(object).collect()),
    ));
    Ok(map(entries))
}

fn assertion_set(set: &AssertionSet) -> Result<Value> {
    let parent = Some((set.zone.as_str(), set.context.as_str()));
    let content = set
        .assertions
        .iter()
        .map(|a| assertion(a, parent))
        .collect::<Result<_>>()?;
    let mut entries = vec![
        (keys::CONTENT, Value::Array(content)),
        (keys::SIGNATURES, signatures(&set.signatures)?),
        (keys::SUBJECT_ZONE, text(&set.zone)),
        (keys::CONTEXT, text(&set.context)),
    ];
    if let (false, Some(range)) = (set.zone_complete, &set.shard_range) {
        let bound = |b: &Option<String>| b.as_deref().map_or(Value::Null, text);
        entries.push((
            keys::SHARD_RANGE,
            Value::Array(vec![bound(&range.lower), bound(&range.upper)]),
        ));
    }
    Ok(map(entries))
}

fn query(q: &Query) -> Value {
    let mut entries = vec![
        (keys::QUERY_NAME, text(&q.name)),
        (
            keys::CONTEXT,
            Value::Array(q.contexts.iter().map(|c| text(c)).collect()),
        ),
    ];
    if !q.token.is_zero() {
        entries.push((keys::TOKEN, token(q.token)));
    }
    if !q.object_types.is_empty() {
        entries.push((
            keys::QUERY_TYPES,
            Value::Array(q.object_types.iter().map(|k| uint(k.code())).collect()),
        ));
    }
    if !q.options.is_empty() {
        entries.push((
            keys::QUERY_OPTS,
            Value::Array(q.options.iter().map(|o| uint(o.code())).collect()),
        ));
    }
    map(entries)
}

fn notification(n: &Notification) -> Value {
    let mut entries = vec![
        (keys::TOKEN, token(n.token)),
        (keys::NOTE_TYPE, uint(n.kind.code())),
    ];
    if !n.data.is_empty() {
        entries.push((keys::NOTE_DATA, text(&n.data)));
    }
    map(entries)
}

fn signatures(sigs: &[Signature]) -> Result<Value> {
    sigs.iter()
        .map(|s| {
            Ok(Value::Array(vec![
                uint(s.algorithm.code()),
                timestamp(s.valid_from)?,
                timestamp(s.valid_until)?,
                Value::Bytes(s.revocation_token.clone()),
                Value::Bytes(s.content.clone()),
            ]))
        })
        .collect::<Result<_>>()
        .map(Value::Array)
}

fn object(obj: &Object) -> Value {
    let kind = uint(obj.kind().code());
    let fields = match obj {
        Object::Name(s)
        | Object::Redirection(s)
        | Object::Nameset(s)
        | Object::Registrar(s)
        | Object::Registrant(s) => vec![text(s)],
        Object::Ip6(addr) => vec![Value::Bytes(addr.octets().to_vec())],
        Object::Ip4(addr) => vec![Value::Bytes(addr.octets().to_vec())],
        Object::Delegation(key) | Object::InfraKey(key) => public_key(key),
        Object::Certificate(data) => vec![Value::Bytes(data.clone())],
        Object::Service(srv) => vec![
            text(&srv.hostname),
            uint(u64::from(srv.port)),
            uint(u64::from(srv.priority)),
        ],
    };
    let mut items = Vec::with_capacity(fields.len() + 1);
    items.push(kind);
    items.extend(fields);
    Value::Array(items)
}

fn public_key(key: &PublicKey) -> Vec<Value> {
    vec![uint(key.algorithm.code()), Value::Bytes(key.key.clone())]
}

fn map(entries: Vec<(u64, Value)>) -> Value {
    Value::Map(entries.into_iter().map(|(k, v)| (uint(k), v)).collect())
}

fn uint(n: u64) -> Value {
    Value::Integer(n.into())
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn token(t: Token) -> Value {
    Value::Bytes(t.as_bytes().to_vec())
}

/// Whole epoch seconds under tag 1; fractional seconds are refused.
fn timestamp(t: DateTime<Utc>) -> Result<Value> {
    if t.timestamp_subsec_nanos() != 0 {
        return Err(WireError::Encode(format!(
            "timestamp {t} has a fractional second"
        )));
    }
    Ok(Value::Tag(
        TIMESTAMP_TAG,
        Box::new(Value::Integer(t.timestamp().into())),
    ))
}
