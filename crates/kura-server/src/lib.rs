//! HTTP surface for kura.
//!
//! Each `/fs/*` request is wrapped in a tenant-scoped database transaction
//! ([`txn`]), handed a per-request VFS ([`compose`]), and mapped back to
//! HTTP through the stable error table ([`error`]).

pub mod compose;
pub mod config;
pub mod error;
pub mod fs_routes;
pub mod txn;

pub use config::{Cli, MountConfig, ServerConfig};
pub use error::ApiError;
pub use txn::{AppState, RequestEnv};
