//! Local disk mount.
//!
//! Binds a host directory as a VFS subtree, with path security to prevent
//! escaping the bound root.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use tokio::fs;

use crate::vfs::entry::{FileType, FsEntry};
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::mount::Mount;
use crate::vfs::path;

/// A host directory bound at a VFS subtree.
///
/// Every incoming path is resolved against the root, and the resolved real
/// path must remain inside the root; anything else fails `EACCES` before
/// any I/O. Read-only by default; every mutator on a read-only mount fails
/// `EROFS` before touching the disk.
#[derive(Debug, Clone)]
pub struct LocalDiskMount {
    root: PathBuf,
    writable: bool,
}

impl LocalDiskMount {
    /// Bind a host directory read-only.
    ///
    /// The root is canonicalized at construction time so later containment
    /// checks compare real paths (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            root,
            writable: false,
        }
    }

    /// Bind a host directory with writes enabled.
    pub fn new_writable(root: impl Into<PathBuf>) -> Self {
        Self {
            writable: true,
            ..Self::new(root)
        }
    }

    /// The bound host directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_writable(&self, vpath: &str) -> VfsResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(VfsError::read_only(vpath))
        }
    }

    /// Resolve a mount-relative virtual path to a real host path.
    ///
    /// Normalizes first, then canonicalizes (the target if it exists, its
    /// parent otherwise) and verifies the result is still under the root.
    fn resolve(&self, vpath: &str) -> VfsResult<PathBuf> {
        let normalized = path::normalize(vpath);
        if !path::is_under_root(vpath) {
            return Err(VfsError::permission_denied(&normalized));
        }
        let rel = normalized.trim_start_matches('/');
        if rel.is_empty() {
            return Ok(self.root.clone());
        }
        let full = self.root.join(rel);

        let real = if full.exists() {
            full.canonicalize()
                .map_err(|e| VfsError::from_io(&normalized, e))?
        } else {
            // For paths being created, canonicalize the parent and append
            // the final name.
            let parent = full
                .parent()
                .ok_or_else(|| VfsError::invalid(&normalized, "no parent"))?;
            let name = full
                .file_name()
                .ok_or_else(|| VfsError::invalid(&normalized, "no file name"))?;
            if parent.exists() {
                parent
                    .canonicalize()
                    .map_err(|e| VfsError::from_io(&normalized, e))?
                    .join(name)
            } else {
                full.clone()
            }
        };

        if !real.starts_with(&self.root) {
            return Err(VfsError::permission_denied(&normalized));
        }
        Ok(real)
    }

    fn metadata_to_entry(vpath: &str, meta: &std::fs::Metadata) -> FsEntry {
        let name = path::basename(vpath);
        let kind = if meta.is_dir() {
            FileType::Directory
        } else if meta.file_type().is_symlink() {
            FileType::Symlink
        } else {
            FileType::File
        };
        let size = if kind == FileType::Directory { 0 } else { meta.len() };
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);
        FsEntry {
            name,
            kind,
            size,
            mode: meta.permissions().mode() & 0o777,
            mtime,
        }
    }
}

#[async_trait]
impl Mount for LocalDiskMount {
    async fn stat(&self, vpath: &str) -> VfsResult<FsEntry> {
        let real = self.resolve(vpath)?;
        let meta = fs::symlink_metadata(&real)
            .await
            .map_err(|e| VfsError::from_io(vpath, e))?;
        Ok(Self::metadata_to_entry(vpath, &meta))
    }

    async fn readdir(&self, vpath: &str) -> VfsResult<Vec<FsEntry>> {
        let real = self.resolve(vpath)?;
        let mut dir = fs::read_dir(&real)
            .await
            .map_err(|e| VfsError::from_io(vpath, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| VfsError::from_io(vpath, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry
                .metadata()
                .await
                .map_err(|e| VfsError::from_io(vpath, e))?;
            let child = path::join(vpath, &name);
            entries.push(Self::metadata_to_entry(&child, &meta));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, vpath: &str) -> VfsResult<Vec<u8>> {
        let real = self.resolve(vpath)?;
        fs::read(&real).await.map_err(|e| VfsError::from_io(vpath, e))
    }

    fn writable(&self) -> bool {
        self.writable
    }

    async fn write(&self, vpath: &str, content: &[u8]) -> VfsResult<()> {
        self.check_writable(vpath)?;
        let real = self.resolve(vpath)?;
        if real.is_dir() {
            return Err(VfsError::is_a_directory(vpath));
        }

        // Write a sibling temp file and rename over the target so size and
        // mtime change together.
        let name = real
            .file_name()
            .ok_or_else(|| VfsError::invalid(vpath, "no file name"))?
            .to_string_lossy()
            .into_owned();
        let tmp = real.with_file_name(format!(".{name}.tmp{}", std::process::id()));
        fs::write(&tmp, content)
            .await
            .map_err(|e| VfsError::from_io(vpath, e))?;
        if let Err(e) = fs::rename(&tmp, &real).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(VfsError::from_io(vpath, e));
        }
        Ok(())
    }

    async fn mkdir(&self, vpath: &str) -> VfsResult<()> {
        self.check_writable(vpath)?;
        let real = self.resolve(vpath)?;
        fs::create_dir(&real)
            .await
            .map_err(|e| VfsError::from_io(vpath, e))
    }

    async fn unlink(&self, vpath: &str) -> VfsResult<()> {
        self.check_writable(vpath)?;
        let real = self.resolve(vpath)?;
        let meta = fs::symlink_metadata(&real)
            .await
            .map_err(|e| VfsError::from_io(vpath, e))?;
        if meta.is_dir() {
            return Err(VfsError::is_a_directory(vpath));
        }
        fs::remove_file(&real)
            .await
            .map_err(|e| VfsError::from_io(vpath, e))
    }

    async fn rmdir(&self, vpath: &str) -> VfsResult<()> {
        self.check_writable(vpath)?;
        let real = self.resolve(vpath)?;
        let meta = fs::symlink_metadata(&real)
            .await
            .map_err(|e| VfsError::from_io(vpath, e))?;
        if !meta.is_dir() {
            return Err(VfsError::not_a_directory(vpath));
        }
        fs::remove_dir(&real)
            .await
            .map_err(|e| VfsError::from_io(vpath, e))
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.check_writable(from)?;
        let from_real = self.resolve(from)?;
        let to_real = self.resolve(to)?;
        fs::rename(&from_real, &to_real)
            .await
            .map_err(|e| VfsError::from_io(from, e))
    }

    async fn get_usage(&self, vpath: &str) -> VfsResult<u64> {
        let real = self.resolve(vpath)?;
        let meta = fs::symlink_metadata(&real)
            .await
            .map_err(|e| VfsError::from_io(vpath, e))?;
        if !meta.is_dir() {
            return Ok(meta.len());
        }

        // Recursive byte total, iteratively to keep the future Send-simple.
        let mut total = 0u64;
        let mut stack = vec![real];
        while let Some(dir) = stack.pop() {
            let mut rd = fs::read_dir(&dir)
                .await
                .map_err(|e| VfsError::from_io(vpath, e))?;
            while let Some(entry) = rd
                .next_entry()
                .await
                .map_err(|e| VfsError::from_io(vpath, e))?
            {
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| VfsError::from_io(vpath, e))?;
                if meta.is_dir() {
                    stack.push(entry.path());
                } else {
                    total += meta.len();
                }
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_writable() -> (LocalDiskMount, TempDir) {
        let dir = TempDir::new().unwrap();
        let mount = LocalDiskMount::new_writable(dir.path());
        (mount, dir)
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (mount, _dir) = setup_writable();
        mount.write("/test.txt", b"hello world").await.unwrap();
        assert_eq!(mount.read("/test.txt").await.unwrap(), b"hello world");

        let entry = mount.stat("/test.txt").await.unwrap();
        assert!(entry.is_file());
        assert_eq!(entry.size, 11);
        assert!(entry.mtime.is_some());
    }

    #[tokio::test]
    async fn test_overwrite_updates_size() {
        let (mount, _dir) = setup_writable();
        mount.write("/f", b"longer content").await.unwrap();
        mount.write("/f", b"short").await.unwrap();
        assert_eq!(mount.stat("/f").await.unwrap().size, 5);
    }

    #[tokio::test]
    async fn test_readdir_sorted_with_types() {
        let (mount, _dir) = setup_writable();
        mount.mkdir("/sub").await.unwrap();
        mount.write("/b.txt", b"b").await.unwrap();
        mount.write("/a.txt", b"a").await.unwrap();

        let entries = mount.readdir("/").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
        assert!(entries[2].is_dir());
        assert_eq!(entries[2].size, 0);
    }

    #[tokio::test]
    async fn test_path_escape_blocked_without_io() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "inside").unwrap();
        let mount = LocalDiskMount::new(dir.path());

        let err = mount.read("/../../etc/passwd").await.unwrap_err();
        assert_eq!(err.kind(), "EACCES");
    }

    #[tokio::test]
    async fn test_read_only_refuses_before_io() {
        let dir = TempDir::new().unwrap();
        let mount = LocalDiskMount::new(dir.path());

        // Even a write into a directory that does not exist reports EROFS,
        // not ENOENT: the refusal happens before any disk access.
        assert_eq!(
            mount.write("/no/such/f", b"x").await.unwrap_err().kind(),
            "EROFS"
        );
        assert_eq!(mount.mkdir("/d").await.unwrap_err().kind(), "EROFS");
        assert_eq!(mount.unlink("/f").await.unwrap_err().kind(), "EROFS");
        assert_eq!(mount.rmdir("/d").await.unwrap_err().kind(), "EROFS");
        assert_eq!(
            mount.rename("/a", "/b").await.unwrap_err().kind(),
            "EROFS"
        );
    }

    #[tokio::test]
    async fn test_unlink_directory_is_eisdir() {
        let (mount, _dir) = setup_writable();
        mount.mkdir("/d").await.unwrap();
        assert_eq!(mount.unlink("/d").await.unwrap_err().kind(), "EISDIR");
    }

    #[tokio::test]
    async fn test_rmdir_not_empty() {
        let (mount, _dir) = setup_writable();
        mount.mkdir("/d").await.unwrap();
        mount.write("/d/f", b"x").await.unwrap();
        assert_eq!(mount.rmdir("/d").await.unwrap_err().kind(), "ENOTEMPTY");
        mount.unlink("/d/f").await.unwrap();
        mount.rmdir("/d").await.unwrap();
    }

    #[tokio::test]
    async fn test_rename() {
        let (mount, _dir) = setup_writable();
        mount.write("/old.txt", b"content").await.unwrap();
        mount.rename("/old.txt", "/new.txt").await.unwrap();
        assert!(mount.stat("/old.txt").await.unwrap_err().is_not_found());
        assert_eq!(mount.read("/new.txt").await.unwrap(), b"content");
    }

    #[tokio::test]
    async fn test_usage() {
        let (mount, _dir) = setup_writable();
        mount.mkdir("/d").await.unwrap();
        mount.write("/d/a", b"1234").await.unwrap();
        mount.mkdir("/d/sub").await.unwrap();
        mount.write("/d/sub/b", b"56").await.unwrap();

        assert_eq!(mount.get_usage("/d/a").await.unwrap(), 4);
        assert_eq!(mount.get_usage("/d").await.unwrap(), 6);
        assert!(mount.get_usage("/missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_missing_file_is_enoent() {
        let (mount, _dir) = setup_writable();
        assert!(mount.read("/nope").await.unwrap_err().is_not_found());
        assert!(mount.stat("/nope").await.unwrap_err().is_not_found());
    }
}
