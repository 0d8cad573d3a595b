//! System mount: read-only platform introspection.
//!
//! Five virtual files computed from the request context: `version`,
//! `uptime` (whole seconds since process start), `whoami`, `tenant`, and
//! `request` (the correlation id).

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::SystemContext;
use crate::vfs::entry::{FileType, FsEntry};
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::mount::Mount;
use crate::vfs::path;

const FILES: [&str; 5] = ["request", "tenant", "uptime", "version", "whoami"];

/// Read-only introspection files.
pub struct SystemMount {
    ctx: Arc<SystemContext>,
}

impl SystemMount {
    pub fn new(ctx: Arc<SystemContext>) -> Self {
        Self { ctx }
    }

    fn render(&self, name: &str) -> Option<String> {
        match name {
            "version" => Some(env!("CARGO_PKG_VERSION").to_string()),
            "uptime" => Some(self.ctx.server_started.elapsed().as_secs().to_string()),
            "whoami" => Some(self.ctx.caller.username.clone()),
            "tenant" => Some(self.ctx.namespace.clone()),
            "request" => Some(self.ctx.request_id.to_string()),
            _ => None,
        }
    }
}

#[async_trait]
impl Mount for SystemMount {
    async fn stat(&self, p: &str) -> VfsResult<FsEntry> {
        let p = path::normalize(p);
        match path::segments(&p)[..] {
            [] => Ok(FsEntry::directory("").with_mode(0o555)),
            [name] => self
                .render(name)
                .map(|body| FsEntry::file(name, body.len() as u64, 0o444))
                .ok_or_else(|| VfsError::not_found(&p)),
            _ => Err(VfsError::not_found(&p)),
        }
    }

    async fn readdir(&self, p: &str) -> VfsResult<Vec<FsEntry>> {
        let p = path::normalize(p);
        match path::segments(&p)[..] {
            [] => Ok(FILES
                .iter()
                .filter_map(|name| {
                    self.render(name)
                        .map(|body| FsEntry::file(*name, body.len() as u64, 0o444))
                })
                .collect()),
            [_] => Err(VfsError::not_a_directory(&p)),
            _ => Err(VfsError::not_found(&p)),
        }
    }

    async fn read(&self, p: &str) -> VfsResult<Vec<u8>> {
        let p = path::normalize(p);
        match path::segments(&p)[..] {
            [] => Err(VfsError::is_a_directory(&p)),
            [name] => self
                .render(name)
                .map(String::into_bytes)
                .ok_or_else(|| VfsError::not_found(&p)),
            _ => Err(VfsError::not_found(&p)),
        }
    }

    fn probe(&self, p: &str) -> Option<FileType> {
        match path::segments(&path::normalize(p))[..] {
            [] => Some(FileType::Directory),
            [name] if FILES.contains(&name) => Some(FileType::File),
            _ => None,
        }
    }
}
