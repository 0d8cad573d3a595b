//! The uniform metadata object returned by `stat` and `readdir`.

use serde::{Deserialize, Serialize};

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Directory,
    Symlink,
}

impl FileType {
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// Metadata for one VFS node: basename, type, logical size, permission
/// bits, and optionally a modification instant (epoch seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileType,
    pub size: u64,
    pub mode: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
}

impl FsEntry {
    pub fn file(name: impl Into<String>, size: u64, mode: u32) -> Self {
        Self {
            name: name.into(),
            kind: FileType::File,
            size,
            mode,
            mtime: None,
        }
    }

    /// A browsable directory (`0o755`, size 0).
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FileType::Directory,
            size: 0,
            mode: 0o755,
            mtime: None,
        }
    }

    pub fn symlink(name: impl Into<String>, target_len: u64) -> Self {
        Self {
            name: name.into(),
            kind: FileType::Symlink,
            size: target_len,
            mode: 0o777,
            mtime: None,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_mtime(mut self, mtime: i64) -> Self {
        self.mtime = Some(mtime);
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }
}
