//! VFS error taxonomy.
//!
//! Nine stable kinds, named on the wire the way POSIX names them. Every
//! error carries the offending virtual path; mounts must translate backend
//! conditions into exactly one kind before an error leaves them. Anything a
//! backend throws that has no better home becomes `EIO` with the original
//! message attached as detail.

use std::io;

use thiserror::Error;

use crate::pipeline::PipelineError;

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// No such path.
    #[error("no such path: {path}")]
    NotFound { path: String },

    /// Operation expects a directory, got a file.
    #[error("not a directory: {path}")]
    NotADirectory { path: String },

    /// Operation expects a file, got a directory.
    #[error("is a directory: {path}")]
    IsADirectory { path: String },

    /// Target exists and the operation forbids overwrite.
    #[error("already exists: {path}")]
    AlreadyExists { path: String },

    /// Directory not empty.
    #[error("directory not empty: {path}")]
    NotEmpty { path: String },

    /// Mount or entry is read-only.
    #[error("read-only: {path}")]
    ReadOnly { path: String },

    /// Caller lacks permission or the path escapes the mount root.
    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    /// Malformed arguments or a cross-mount operation.
    #[error("invalid operation on {path}: {reason}")]
    Invalid { path: String, reason: String },

    /// Underlying backend failure not covered above.
    #[error("I/O failure at {path}: {detail}")]
    Io { path: String, detail: String },

    /// Observer pipeline rejection, carried through the mount contract with
    /// its stable code intact.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl VfsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory { path: path.into() }
    }

    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory { path: path.into() }
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    pub fn not_empty(path: impl Into<String>) -> Self {
        Self::NotEmpty { path: path.into() }
    }

    pub fn read_only(path: impl Into<String>) -> Self {
        Self::ReadOnly { path: path.into() }
    }

    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied { path: path.into() }
    }

    pub fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.into(),
            detail: detail.to_string(),
        }
    }

    /// Translate an `io::Error` raised while touching `path`.
    pub fn from_io(path: impl Into<String>, err: io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path },
            io::ErrorKind::AlreadyExists => Self::AlreadyExists { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            io::ErrorKind::NotADirectory => Self::NotADirectory { path },
            io::ErrorKind::IsADirectory => Self::IsADirectory { path },
            io::ErrorKind::DirectoryNotEmpty => Self::NotEmpty { path },
            _ => Self::Io {
                path,
                detail: err.to_string(),
            },
        }
    }

    /// The stable wire name of this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "ENOENT",
            Self::NotADirectory { .. } => "ENOTDIR",
            Self::IsADirectory { .. } => "EISDIR",
            Self::AlreadyExists { .. } => "EEXIST",
            Self::NotEmpty { .. } => "ENOTEMPTY",
            Self::ReadOnly { .. } => "EROFS",
            Self::PermissionDenied { .. } => "EACCES",
            Self::Invalid { .. } => "EINVAL",
            Self::Io { .. } => "EIO",
            Self::Pipeline(e) => e.code.as_str(),
        }
    }

    /// The offending path, when the error names one.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::NotFound { path }
            | Self::NotADirectory { path }
            | Self::IsADirectory { path }
            | Self::AlreadyExists { path }
            | Self::NotEmpty { path }
            | Self::ReadOnly { path }
            | Self::PermissionDenied { path }
            | Self::Invalid { path, .. }
            | Self::Io { path, .. } => Some(path),
            Self::Pipeline(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(VfsError::not_found("/x").kind(), "ENOENT");
        assert_eq!(VfsError::not_a_directory("/x").kind(), "ENOTDIR");
        assert_eq!(VfsError::is_a_directory("/x").kind(), "EISDIR");
        assert_eq!(VfsError::already_exists("/x").kind(), "EEXIST");
        assert_eq!(VfsError::not_empty("/x").kind(), "ENOTEMPTY");
        assert_eq!(VfsError::read_only("/x").kind(), "EROFS");
        assert_eq!(VfsError::permission_denied("/x").kind(), "EACCES");
        assert_eq!(VfsError::invalid("/x", "why").kind(), "EINVAL");
        assert_eq!(VfsError::io("/x", "boom").kind(), "EIO");
    }

    #[test]
    fn test_from_io_translation() {
        let e = VfsError::from_io("/x", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(e.kind(), "ENOENT");
        let e = VfsError::from_io("/x", io::Error::from(io::ErrorKind::DirectoryNotEmpty));
        assert_eq!(e.kind(), "ENOTEMPTY");
        let e = VfsError::from_io("/x", io::Error::other("weird"));
        assert_eq!(e.kind(), "EIO");
    }

    #[test]
    fn test_error_carries_path() {
        assert_eq!(VfsError::not_found("/a/b").path(), Some("/a/b"));
        assert_eq!(VfsError::invalid("/a", "r").path(), Some("/a"));
    }
}
