//! In-memory mount.
//!
//! Backs the composition fallback (a static root whose only job is to make
//! mount points visible) and router tests. All data is ephemeral.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::vfs::entry::FsEntry;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::mount::Mount;
use crate::vfs::path;

#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, mode: u32 },
    Directory,
}

/// In-memory mount, thread-safe via an internal `RwLock`.
#[derive(Debug)]
pub struct MemoryMount {
    entries: RwLock<HashMap<String, Node>>,
    writable: bool,
}

impl Default for MemoryMount {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMount {
    /// Create an empty writable tree. The root directory always exists.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert("/".to_string(), Node::Directory);
        Self {
            entries: RwLock::new(entries),
            writable: true,
        }
    }

    /// Create a read-only tree; seed it with `put_file`/`put_dir` before
    /// mounting.
    pub fn read_only() -> Self {
        Self {
            writable: false,
            ..Self::new()
        }
    }

    /// Seed a file, creating parents. Ignores the writable flag.
    pub fn put_file(&self, p: &str, data: &[u8]) {
        let p = path::normalize(p);
        let mut entries = self.entries.write();
        Self::ensure_parents(&mut entries, &p);
        entries.insert(
            p,
            Node::File {
                data: data.to_vec(),
                mode: 0o644,
            },
        );
    }

    /// Seed a directory, creating parents. Ignores the writable flag.
    pub fn put_dir(&self, p: &str) {
        let p = path::normalize(p);
        let mut entries = self.entries.write();
        Self::ensure_parents(&mut entries, &p);
        entries.insert(p, Node::Directory);
    }

    fn ensure_parents(entries: &mut HashMap<String, Node>, p: &str) {
        let mut current = String::new();
        for seg in path::segments(&path::dirname(p)) {
            current.push('/');
            current.push_str(seg);
            entries.entry(current.clone()).or_insert(Node::Directory);
        }
    }

    fn check_writable(&self, p: &str) -> VfsResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(VfsError::read_only(p))
        }
    }

    fn entry_for(&self, p: &str, node: &Node) -> FsEntry {
        let name = path::basename(p);
        match node {
            Node::File { data, mode } => FsEntry::file(name, data.len() as u64, *mode),
            Node::Directory => {
                let mode = if self.writable { 0o755 } else { 0o555 };
                FsEntry::directory(name).with_mode(mode)
            }
        }
    }
}

#[async_trait]
impl Mount for MemoryMount {
    async fn stat(&self, p: &str) -> VfsResult<FsEntry> {
        let p = path::normalize(p);
        let entries = self.entries.read();
        entries
            .get(&p)
            .map(|n| self.entry_for(&p, n))
            .ok_or_else(|| VfsError::not_found(&p))
    }

    async fn readdir(&self, p: &str) -> VfsResult<Vec<FsEntry>> {
        let p = path::normalize(p);
        let entries = self.entries.read();
        match entries.get(&p) {
            None => return Err(VfsError::not_found(&p)),
            Some(Node::File { .. }) => return Err(VfsError::not_a_directory(&p)),
            Some(Node::Directory) => {}
        }
        let mut children: Vec<FsEntry> = entries
            .iter()
            .filter(|(k, _)| k.as_str() != "/" && path::dirname(k) == p)
            .map(|(k, n)| self.entry_for(k, n))
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    async fn read(&self, p: &str) -> VfsResult<Vec<u8>> {
        let p = path::normalize(p);
        let entries = self.entries.read();
        match entries.get(&p) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(Node::Directory) => Err(VfsError::is_a_directory(&p)),
            None => Err(VfsError::not_found(&p)),
        }
    }

    fn writable(&self) -> bool {
        self.writable
    }

    async fn write(&self, p: &str, content: &[u8]) -> VfsResult<()> {
        let p = path::normalize(p);
        self.check_writable(&p)?;
        let mut entries = self.entries.write();
        if matches!(entries.get(&p), Some(Node::Directory)) {
            return Err(VfsError::is_a_directory(&p));
        }
        Self::ensure_parents(&mut entries, &p);
        entries.insert(
            p,
            Node::File {
                data: content.to_vec(),
                mode: 0o644,
            },
        );
        Ok(())
    }

    async fn mkdir(&self, p: &str) -> VfsResult<()> {
        let p = path::normalize(p);
        self.check_writable(&p)?;
        let mut entries = self.entries.write();
        if entries.contains_key(&p) {
            return Err(VfsError::already_exists(&p));
        }
        Self::ensure_parents(&mut entries, &p);
        entries.insert(p, Node::Directory);
        Ok(())
    }

    async fn unlink(&self, p: &str) -> VfsResult<()> {
        let p = path::normalize(p);
        self.check_writable(&p)?;
        let mut entries = self.entries.write();
        match entries.get(&p) {
            Some(Node::Directory) => Err(VfsError::is_a_directory(&p)),
            Some(Node::File { .. }) => {
                entries.remove(&p);
                Ok(())
            }
            None => Err(VfsError::not_found(&p)),
        }
    }

    async fn rmdir(&self, p: &str) -> VfsResult<()> {
        let p = path::normalize(p);
        self.check_writable(&p)?;
        if p == "/" {
            return Err(VfsError::permission_denied(&p));
        }
        let mut entries = self.entries.write();
        match entries.get(&p) {
            Some(Node::File { .. }) => return Err(VfsError::not_a_directory(&p)),
            None => return Err(VfsError::not_found(&p)),
            Some(Node::Directory) => {}
        }
        if entries.keys().any(|k| path::dirname(k) == p && k != &p) {
            return Err(VfsError::not_empty(&p));
        }
        entries.remove(&p);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        let from = path::normalize(from);
        let to = path::normalize(to);
        self.check_writable(&from)?;
        let mut entries = self.entries.write();
        if !entries.contains_key(&from) {
            return Err(VfsError::not_found(&from));
        }
        Self::ensure_parents(&mut entries, &to);
        // Move the node and, for directories, the whole subtree.
        let prefix = format!("{from}/");
        let moved: Vec<String> = entries
            .keys()
            .filter(|k| **k == from || k.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved {
            let new = if old == from {
                to.clone()
            } else {
                format!("{to}{}", &old[from.len()..])
            };
            if let Some(node) = entries.remove(&old) {
                entries.insert(new, node);
            }
        }
        Ok(())
    }

    async fn get_usage(&self, p: &str) -> VfsResult<u64> {
        let p = path::normalize(p);
        let entries = self.entries.read();
        match entries.get(&p) {
            Some(Node::File { data, .. }) => Ok(data.len() as u64),
            Some(Node::Directory) => {
                let prefix = if p == "/" { "/".to_string() } else { format!("{p}/") };
                Ok(entries
                    .iter()
                    .filter(|(k, _)| k.starts_with(&prefix))
                    .map(|(_, n)| match n {
                        Node::File { data, .. } => data.len() as u64,
                        Node::Directory => 0,
                    })
                    .sum())
            }
            None => Err(VfsError::not_found(&p)),
        }
    }
}
