//! The mount contract.

use async_trait::async_trait;

use super::entry::{FileType, FsEntry};
use super::error::{VfsError, VfsResult};

/// One subtree of the VFS.
///
/// Paths handed to a mount are **mount-relative**: the router has stripped
/// the mount prefix and kept the leading `/` (`/` when the request named the
/// mount point itself). A mount never sees a path outside its own subtree;
/// the only mount that touches the host filesystem ([`LocalDiskMount`]) is
/// also the only one that needs a traversal check; the structured mounts
/// build queries from parsed segments and never concatenate paths.
///
/// Mutators have default bodies refusing with `EROFS`, so a read-only mount
/// implements the three readers and nothing else. Writable mounts override
/// [`writable`](Mount::writable) and the mutators they support.
///
/// [`LocalDiskMount`]: super::backends::LocalDiskMount
#[async_trait]
pub trait Mount: Send + Sync {
    /// Metadata for one node.
    async fn stat(&self, path: &str) -> VfsResult<FsEntry>;

    /// Entries of a directory, name-ascending unless the mount documents
    /// otherwise.
    async fn readdir(&self, path: &str) -> VfsResult<Vec<FsEntry>>;

    /// Whole contents of a file.
    async fn read(&self, path: &str) -> VfsResult<Vec<u8>>;

    /// Whether this mount accepts any mutator at all.
    fn writable(&self) -> bool {
        false
    }

    /// Create or overwrite a file.
    async fn write(&self, path: &str, _content: &[u8]) -> VfsResult<()> {
        Err(VfsError::read_only(path))
    }

    /// Create a directory.
    async fn mkdir(&self, path: &str) -> VfsResult<()> {
        Err(VfsError::read_only(path))
    }

    /// Remove a file.
    async fn unlink(&self, path: &str) -> VfsResult<()> {
        Err(VfsError::read_only(path))
    }

    /// Remove a directory.
    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        Err(VfsError::read_only(path))
    }

    /// Rename within this mount. Cross-mount renames never reach here.
    async fn rename(&self, from: &str, _to: &str) -> VfsResult<()> {
        Err(VfsError::read_only(from))
    }

    /// Logical size of a file, or the recursive total of a directory.
    async fn get_usage(&self, path: &str) -> VfsResult<u64> {
        Ok(self.stat(path).await?.size)
    }

    /// Cheap structural type probe: what this path would be, judged without
    /// any I/O, or `None` when the mount cannot tell from shape alone.
    fn probe(&self, _path: &str) -> Option<FileType> {
        None
    }
}
