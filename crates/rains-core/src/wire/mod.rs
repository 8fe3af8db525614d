//! CBOR wire codec for protocol messages.
//!
//! Every message is a CBOR map keyed by small integers. Sections are
//! `[kind, body]` pairs, bodies are maps written in ascending key order, and
//! timestamps carry CBOR tag 1 (epoch-based date/time) so a reader can tell
//! them apart from plain integers.
//!
//! Decoding runs in three stages:
//! 1. the total size is checked against [`WireLimits::max_message_size`]
//! 2. a header pre-scan cross-checks every declared length against the bytes
//!    that remain, before anything is allocated for it
//! 3. the CBOR value tree is converted into typed model values, rejecting
//!    unknown keys, unknown discriminators and oversized fields
//!
//! Only structural problems are reported. An empty subject name decodes
//! fine; rejecting it is the engine's job.

mod decode;
mod encode;
mod scan;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Message;

/// Map-key constants used inside message and section bodies
pub mod keys {
    pub const CONTENT: u64 = 0;
    pub const CAPABILITIES: u64 = 1;
    pub const SIGNATURES: u64 = 2;
    pub const SUBJECT_NAME: u64 = 3;
    pub const SUBJECT_ZONE: u64 = 4;
    pub const QUERY_NAME: u64 = 5;
    pub const CONTEXT: u64 = 6;
    pub const OBJECTS: u64 = 7;
    pub const TOKEN: u64 = 8;
    pub const SHARD_RANGE: u64 = 11;
    pub const QUERY_TYPES: u64 = 14;
    pub const NOTE_TYPE: u64 = 17;
    pub const QUERY_OPTS: u64 = 22;
    pub const NOTE_DATA: u64 = 23;
}

/// CBOR tag for epoch-based date/time
pub const TIMESTAMP_TAG: u64 = 1;

/// Decoding bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireLimits {
    /// Largest accepted encoded message, in bytes
    pub max_message_size: usize,
    /// Longest accepted text field, in bytes
    pub max_string_len: usize,
    /// Longest accepted byte-string field
    pub max_bytes_len: usize,
    /// Deepest accepted nesting of arrays, maps and tags
    pub max_depth: usize,
}

impl Default for WireLimits {
    fn default() -> Self {
        Self {
            max_message_size: 65_536,
            max_string_len: 1024,
            max_bytes_len: 16_384,
            max_depth: 16,
        }
    }
}

/// Encode a message into its canonical wire form.
///
/// Fails with [`WireError::Encode`](crate::WireError::Encode) when a
/// signature window has a fractional second, which the wire cannot carry.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    encode::message(message)
}

/// Decode a message, enforcing `limits`.
pub fn decode(bytes: &[u8], limits: &WireLimits) -> Result<Message> {
    if bytes.len() > limits.max_message_size {
        return Err(crate::WireError::TooLarge {
            size: bytes.len(),
            max: limits.max_message_size,
        });
    }
    scan::prescan(bytes, limits)?;
    decode::message(bytes, limits)
}
