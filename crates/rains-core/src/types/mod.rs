//! Protocol data model shared by the codec, the cache and the query engine.

mod assertion;
mod message;
mod object;
mod query;
mod signature;

pub use assertion::{qualify, relative_to, Assertion, AssertionSet, ShardRange};
pub use message::{Message, Notification, NotificationType, Section, SectionKind};
pub use object::{Object, ObjectKind, ObjectKindSet, PublicKey, ServiceInfo};
pub use query::{Query, QueryOption, Token};
pub use signature::{Algorithm, Signature};
