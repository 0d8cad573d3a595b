//! Virtual filesystem abstraction.
//!
//! Path-based VFS designed for HTTP exposure. Key components:
//!
//! - [`path`] - POSIX-style path normalization used everywhere before routing
//! - [`Mount`] - the contract every mount implements
//! - [`Vfs`] - mount table with longest-prefix routing and a fallback
//! - [`backends`] - local disk, in-memory, data, describe, and system mounts
//!
//! ## Design Decisions
//!
//! - **Path-based, no inodes**: operations take virtual paths as strings;
//!   every path is normalized once at the router boundary.
//! - **Whole-value read/write**: virtual files are small (record fields,
//!   schema documents), so reads and writes carry the full content.
//! - **Longest-prefix routing**: the router delegates to the most specific
//!   mount point matching on `/` boundaries, falling back to an optional
//!   root mount.

pub mod backends;
mod entry;
mod error;
mod mount;
pub mod path;
mod router;

pub use entry::{FileType, FsEntry};
pub use error::{VfsError, VfsResult};
pub use mount::Mount;
pub use router::Vfs;
