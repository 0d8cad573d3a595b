//! Shared identity and schema types for Kura.
//!
//! This crate is the tenant vocabulary: typed ids, callers, ACL sets, record
//! lifecycle metadata, and model schemas. It has **no internal kura
//! dependencies**: a pure leaf crate that other crates build on.
//!
//! # Key Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`RequestId`] | Correlation id carried through one request |
//! | [`Caller`] | Who is acting (user + groups + role) |
//! | [`AclSets`] | Row-level identity sets deciding visibility |
//! | [`RecordMeta`] | Lifecycle timestamps (live / trashed / hard-deleted) |
//! | [`ModelSchema`] | Declared fields plus the implicit lifecycle columns |

pub mod acl;
pub mod caller;
pub mod ids;
pub mod record;
pub mod schema;

// Re-export primary types at crate root for convenience.
pub use acl::AclSets;
pub use caller::{AccessLevel, Caller, Role};
pub use ids::RequestId;
pub use record::RecordMeta;
pub use schema::{ColumnClass, FieldSchema, FieldType, ModelSchema};
