//! Core types and wire codec for the RAINS naming protocol.
//!
//! RAINS servers exchange signed, time-bounded *assertions* binding a
//! subject name in a zone and context to typed objects (addresses, names,
//! delegations, ...). This crate holds everything that is pure data:
//!
//! - **Types**: the protocol data model ([`Message`], [`Assertion`],
//!   [`AssertionSet`], [`Query`], [`Notification`], ...)
//! - **Wire**: the canonical CBOR encoding, with bounded decoding
//! - **Zonefile**: a compiler from the textual zone format to assertion sets
//!
//! # Example
//!
//! ```rust,ignore
//! use rains_core::{wire, Message, WireLimits};
//!
//! fn echo(bytes: &[u8]) -> rains_core::Result<Vec<u8>> {
//!     let msg: Message = wire::decode(bytes, &WireLimits::default())?;
//!     wire::encode(&msg)
//! }
//! ```

mod error;
pub mod types;
pub mod wire;
pub mod zonefile;

pub use error::{Result, WireError, ZonefileError};
pub use types::*;
pub use wire::WireLimits;
