//! # kura-kernel
//!
//! Core kernel crate with the VFS abstraction for kura.
//!
//! A request is handed a kernel context and a [`vfs::Vfs`] composed of
//! mounts; everything it sees (records, schema metadata, host directories,
//! platform introspection) is a file or a directory:
//!
//! - [`vfs`]: path utilities, the [`vfs::Mount`] contract, the router, and
//!   the mount backends (local disk, memory, data, describe, system)
//! - [`db`]: the process-wide SQLite pool and the tenant-scoped connection
//! - [`store`]: the typed SQL surface the data mounts speak
//! - [`schema_registry`]: model metadata loading, caching, provisioning
//! - [`pipeline`]: the observer ring every mutation traverses
//! - [`context`]: the per-request system context (identity, sudo, db)

pub mod context;
pub mod db;
pub mod pipeline;
pub mod schema_registry;
pub mod store;
pub mod vfs;

pub use context::SystemContext;
pub use db::{DbError, Pool, TenantConn};
pub use pipeline::{Observer, Operation, Pipeline, PipelineCode, PipelineError};
pub use schema_registry::{SchemaRegistry, SchemaSnapshot};
pub use store::{Record, RecordScope, RecordStore};
pub use vfs::{
    backends::{DataMount, DescribeMount, LocalDiskMount, MemoryMount, SystemMount},
    FileType, FsEntry, Mount, Vfs, VfsError, VfsResult,
};
