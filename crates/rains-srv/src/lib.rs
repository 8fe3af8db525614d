//! rains-srv: the server core of a RAINS naming node.
//!
//! A node caches signed assertions and answers queries from them, holding
//! a query open until an answer arrives, it times out, or the peer it was
//! forwarded to reports failure.
//!
//! # Architecture
//!
//! - **Cache**: assertions per context and zone, with negative proofs from
//!   shards and zones, reaped through a min-heap of expiry events
//! - **Engine**: pending queries resolved at most once, forwarding along
//!   cached redirections
//! - **Switchboard**: TCP peer connections exchanging length-prefixed CBOR
//!   frames through bounded queues
//! - **Dispatch**: decodes inbound frames and answers peers with assertions
//!   or notifications
//! - **Authority**: zonefiles signed and served by this node

pub mod authority;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod server;
pub mod switchboard;

// Re-exports for convenience.
pub use cache::{AssertionCache, LookupOutcome};
pub use config::ServerConfig;
pub use dispatch::Dispatcher;
pub use engine::{QueryEngine, ReapStats, Resolution};
pub use error::SrvError;
pub use switchboard::{Inbound, Outbound, Switchboard};

/// Result type for rains-srv operations.
pub type Result<T> = std::result::Result<T, SrvError>;
