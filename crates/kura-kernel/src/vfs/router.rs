//! VFS router: mount table with longest-prefix routing and a fallback.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::entry::{FileType, FsEntry};
use super::error::{VfsError, VfsResult};
use super::mount::Mount;
use super::path;

/// Routes filesystem operations to mounted backends.
///
/// Mount points are matched by longest prefix on `/` boundaries: with
/// `/api` and `/api/data` both mounted, `/api/data/products` routes to
/// `/api/data`, while `/api/data2` routes to `/api`. Paths matched by no
/// prefix go to the fallback mount, if one is set.
///
/// A `Vfs` belongs to a single request. It is built once, never shared, and
/// therefore needs no locking.
pub struct Vfs {
    /// Mount points, keyed by normalized path.
    mounts: BTreeMap<String, Arc<dyn Mount>>,
    /// Used when no prefix matches.
    fallback: Option<Arc<dyn Mount>>,
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs")
            .field("mounts", &self.mounts.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            mounts: BTreeMap::new(),
            fallback: None,
        }
    }

    /// Attach a mount at the given prefix, replacing any previous mount
    /// there.
    pub fn mount(&mut self, prefix: &str, m: Arc<dyn Mount>) {
        self.mounts.insert(path::normalize(prefix), m);
    }

    /// Detach the mount at the given prefix. Returns `true` if one was
    /// attached.
    pub fn unmount(&mut self, prefix: &str) -> bool {
        self.mounts.remove(&path::normalize(prefix)).is_some()
    }

    /// Set the mount used when no prefix matches.
    pub fn set_fallback(&mut self, m: Arc<dyn Mount>) {
        self.fallback = Some(m);
    }

    /// All mount points, sorted.
    pub fn mount_points(&self) -> Vec<String> {
        self.mounts.keys().cloned().collect()
    }

    /// Find the owning mount for a normalized path.
    ///
    /// Returns the mount and the mount-relative path (prefix stripped,
    /// leading `/` preserved; `/` when the path names the mount point).
    fn route(&self, normalized: &str) -> VfsResult<(Arc<dyn Mount>, String)> {
        // Longest match first: keys <= path in reverse order.
        for (mount_path, m) in self.mounts.range(..=normalized.to_string()).rev() {
            if normalized == mount_path {
                return Ok((Arc::clone(m), "/".to_string()));
            }
            if mount_path == "/" {
                return Ok((Arc::clone(m), normalized.to_string()));
            }
            if normalized.starts_with(mount_path.as_str())
                && normalized.as_bytes().get(mount_path.len()) == Some(&b'/')
            {
                return Ok((Arc::clone(m), normalized[mount_path.len()..].to_string()));
            }
        }

        match &self.fallback {
            Some(m) => Ok((Arc::clone(m), normalized.to_string())),
            None => Err(VfsError::not_found(normalized)),
        }
    }

    /// Mount points that are direct children of `parent` (exactly one extra
    /// segment), by child name.
    fn child_mount_names(&self, parent: &str) -> Vec<String> {
        let prefix = if parent == "/" {
            "/".to_string()
        } else {
            format!("{parent}/")
        };
        self.mounts
            .keys()
            .filter_map(|k| {
                let rest = k.strip_prefix(&prefix)?;
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    /// Whether `p` is itself a mount point or an ancestor of one.
    fn shadows_mount(&self, p: &str) -> bool {
        if self.mounts.contains_key(p) {
            return true;
        }
        let prefix = if p == "/" { "/".to_string() } else { format!("{p}/") };
        self.mounts.keys().any(|k| k.starts_with(&prefix))
    }

    pub async fn stat(&self, p: &str) -> VfsResult<FsEntry> {
        let p = path::normalize(p);
        let synthetic = || FsEntry::directory(path::basename(&p));
        match self.route(&p) {
            Ok((m, rel)) => match m.stat(&rel).await {
                Ok(entry) => Ok(entry),
                // A mount point (or an ancestor of one) is a directory even
                // when the owning mount has no node there.
                Err(e) if e.is_not_found() && self.shadows_mount(&p) => Ok(synthetic()),
                Err(e) => Err(e),
            },
            Err(_) if p == "/" || self.shadows_mount(&p) => Ok(synthetic()),
            Err(e) => Err(e),
        }
    }

    pub async fn readdir(&self, p: &str) -> VfsResult<Vec<FsEntry>> {
        let p = path::normalize(p);
        let children = self.child_mount_names(&p);

        let underlying = match self.route(&p) {
            Ok((m, rel)) => match m.readdir(&rel).await {
                Ok(entries) => entries,
                Err(VfsError::NotFound { .. }) | Err(VfsError::NotADirectory { .. })
                    if !children.is_empty() =>
                {
                    Vec::new()
                }
                Err(e) => return Err(e),
            },
            Err(_) if p == "/" || !children.is_empty() => Vec::new(),
            Err(e) => return Err(e),
        };

        // Merge: union with synthetic entries for child mount points,
        // dedupe by name preferring the synthetic entry.
        let mut merged: BTreeMap<String, FsEntry> = underlying
            .into_iter()
            .map(|e| (e.name.clone(), e))
            .collect();
        for name in children {
            merged.insert(name.clone(), FsEntry::directory(name));
        }
        Ok(merged.into_values().collect())
    }

    pub async fn read(&self, p: &str) -> VfsResult<Vec<u8>> {
        let p = path::normalize(p);
        let (m, rel) = self.route(&p)?;
        m.read(&rel).await
    }

    pub async fn write(&self, p: &str, content: &[u8]) -> VfsResult<()> {
        let p = path::normalize(p);
        let (m, rel) = self.route(&p)?;
        m.write(&rel, content).await
    }

    pub async fn mkdir(&self, p: &str) -> VfsResult<()> {
        let p = path::normalize(p);
        let (m, rel) = self.route(&p)?;
        m.mkdir(&rel).await
    }

    pub async fn unlink(&self, p: &str) -> VfsResult<()> {
        let p = path::normalize(p);
        let (m, rel) = self.route(&p)?;
        m.unlink(&rel).await
    }

    pub async fn rmdir(&self, p: &str) -> VfsResult<()> {
        let p = path::normalize(p);
        let (m, rel) = self.route(&p)?;
        m.rmdir(&rel).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        let from = path::normalize(from);
        let to = path::normalize(to);
        let (from_m, from_rel) = self.route(&from)?;
        let (to_m, to_rel) = self.route(&to)?;
        if !Arc::ptr_eq(&from_m, &to_m) {
            return Err(VfsError::invalid(
                &from,
                format!("rename across mount points: {from} -> {to}"),
            ));
        }
        from_m.rename(&from_rel, &to_rel).await
    }

    pub async fn get_usage(&self, p: &str) -> VfsResult<u64> {
        let p = path::normalize(p);
        let (m, rel) = self.route(&p)?;
        m.get_usage(&rel).await
    }

    /// Structural type probe, answered by the owning mount without I/O.
    /// `None` means the shape alone cannot tell; callers fall back to
    /// `stat`. Existence is NOT implied.
    pub fn probe(&self, p: &str) -> Option<FileType> {
        let p = path::normalize(p);
        let (m, rel) = self.route(&p).ok()?;
        m.probe(&rel)
    }

    /// Whether the path exists. Swallows only `ENOENT`.
    pub async fn exists(&self, p: &str) -> VfsResult<bool> {
        match self.stat(p).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn is_file(&self, p: &str) -> VfsResult<bool> {
        match self.stat(p).await {
            Ok(e) => Ok(e.kind == FileType::File),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn is_directory(&self, p: &str) -> VfsResult<bool> {
        match self.stat(p).await {
            Ok(e) => Ok(e.kind == FileType::Directory),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::backends::MemoryMount;

    fn names(entries: &[FsEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_longest_prefix_routing() {
        let mut vfs = Vfs::new();
        let outer = MemoryMount::new();
        outer.put_file("/outer.txt", b"outer");
        vfs.mount("/mnt", Arc::new(outer));

        let inner = MemoryMount::new();
        inner.put_file("/inner.txt", b"inner");
        vfs.mount("/mnt/project", Arc::new(inner));

        assert_eq!(vfs.read("/mnt/outer.txt").await.unwrap(), b"outer");
        assert_eq!(vfs.read("/mnt/project/inner.txt").await.unwrap(), b"inner");
    }

    #[tokio::test]
    async fn test_prefix_matches_on_segment_boundary() {
        let mut vfs = Vfs::new();
        let data = MemoryMount::new();
        data.put_file("/x", b"data");
        vfs.mount("/api/data", Arc::new(data));

        let fallback = MemoryMount::new();
        fallback.put_file("/api/data2/x", b"fallback");
        vfs.set_fallback(Arc::new(fallback));

        // /api/data2 must not be captured by /api/data
        assert_eq!(vfs.read("/api/data2/x").await.unwrap(), b"fallback");
        assert_eq!(vfs.read("/api/data/x").await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_mount_relative_paths() {
        let mut vfs = Vfs::new();
        let m = MemoryMount::new();
        m.put_file("/a.txt", b"hi");
        vfs.mount("/deep/mount/point", Arc::new(m));

        assert_eq!(vfs.read("/deep/mount/point/a.txt").await.unwrap(), b"hi");
        // The mount point itself resolves to "/" inside the mount.
        assert!(vfs.stat("/deep/mount/point").await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_no_mount_no_fallback_is_enoent() {
        let vfs = Vfs::new();
        let err = vfs.read("/nothing/here").await.unwrap_err();
        assert_eq!(err.kind(), "ENOENT");
    }

    #[tokio::test]
    async fn test_mount_point_injection_at_root() {
        let mut vfs = Vfs::new();
        vfs.mount("/system", Arc::new(MemoryMount::new()));
        vfs.mount("/api/data", Arc::new(MemoryMount::new()));
        vfs.mount("/api/describe", Arc::new(MemoryMount::new()));

        let fallback = MemoryMount::new();
        fallback.put_dir("/api");
        vfs.set_fallback(Arc::new(fallback));

        let root = vfs.readdir("/").await.unwrap();
        assert_eq!(names(&root), vec!["api", "system"]);

        let api = vfs.readdir("/api").await.unwrap();
        assert_eq!(names(&api), vec!["data", "describe"]);
    }

    #[tokio::test]
    async fn test_injection_dedupes_by_name() {
        let mut vfs = Vfs::new();
        vfs.mount("/api/data", Arc::new(MemoryMount::new()));

        // Fallback already lists "data" under /api; it must appear once.
        let fallback = MemoryMount::new();
        fallback.put_file("/api/data", b"shadowed");
        vfs.set_fallback(Arc::new(fallback));

        let api = vfs.readdir("/api").await.unwrap();
        assert_eq!(names(&api), vec!["data"]);
        // The synthetic directory entry wins over the underlying file.
        assert!(api[0].is_dir());
    }

    #[tokio::test]
    async fn test_injection_without_fallback() {
        let mut vfs = Vfs::new();
        vfs.mount("/api/data", Arc::new(MemoryMount::new()));
        vfs.mount("/api/trashed", Arc::new(MemoryMount::new()));

        let api = vfs.readdir("/api").await.unwrap();
        assert_eq!(names(&api), vec!["data", "trashed"]);
    }

    #[tokio::test]
    async fn test_stat_of_mount_ancestor_is_directory() {
        let mut vfs = Vfs::new();
        vfs.mount("/api/data", Arc::new(MemoryMount::new()));

        let e = vfs.stat("/api").await.unwrap();
        assert!(e.is_dir());
        assert_eq!(e.name, "api");
    }

    #[tokio::test]
    async fn test_cross_mount_rename_is_einval() {
        let mut vfs = Vfs::new();
        let a = MemoryMount::new();
        a.put_file("/f", b"x");
        vfs.mount("/a", Arc::new(a));
        vfs.mount("/b", Arc::new(MemoryMount::new()));

        let err = vfs.rename("/a/f", "/b/f").await.unwrap_err();
        assert_eq!(err.kind(), "EINVAL");
        assert!(err.to_string().contains("mount points"));
    }

    #[tokio::test]
    async fn test_rename_within_mount_delegates() {
        let mut vfs = Vfs::new();
        let m = MemoryMount::new();
        m.put_file("/old", b"x");
        vfs.mount("/a", Arc::new(m));

        vfs.rename("/a/old", "/a/new").await.unwrap();
        assert_eq!(vfs.read("/a/new").await.unwrap(), b"x");
        assert!(vfs.read("/a/old").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_exists_swallows_only_enoent() {
        let mut vfs = Vfs::new();
        let m = MemoryMount::new();
        m.put_file("/f", b"x");
        vfs.mount("/a", Arc::new(m));

        assert!(vfs.exists("/a/f").await.unwrap());
        assert!(!vfs.exists("/a/missing").await.unwrap());
        assert!(vfs.is_file("/a/f").await.unwrap());
        assert!(!vfs.is_directory("/a/f").await.unwrap());
        assert!(vfs.is_directory("/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_unmount() {
        let mut vfs = Vfs::new();
        let m = MemoryMount::new();
        m.put_file("/f", b"x");
        vfs.mount("/a", Arc::new(m));

        assert!(vfs.read("/a/f").await.is_ok());
        assert!(vfs.unmount("/a"));
        assert!(!vfs.unmount("/a"));
        assert!(vfs.read("/a/f").await.is_err());
    }

    #[tokio::test]
    async fn test_paths_normalized_before_routing() {
        let mut vfs = Vfs::new();
        let m = MemoryMount::new();
        m.put_file("/f", b"x");
        vfs.mount("/a", Arc::new(m));

        assert_eq!(vfs.read("//a/./b/../f").await.unwrap(), b"x");
    }
}
