//! Per-request VFS composition.

use std::sync::Arc;

use kura_kernel::vfs::Mount;
use kura_kernel::{
    DataMount, DescribeMount, LocalDiskMount, MemoryMount, SystemContext, SystemMount, Vfs,
};

use crate::config::ServerConfig;

/// Build the mount table one request sees. Every mount receives the
/// request context at construction; nothing is shared across requests
/// except the immutable configuration.
pub fn build_vfs(ctx: &Arc<SystemContext>, config: &ServerConfig) -> Vfs {
    let mut vfs = Vfs::new();
    vfs.mount("/system", Arc::new(SystemMount::new(Arc::clone(ctx))));
    vfs.mount("/api/describe", Arc::new(DescribeMount::new(Arc::clone(ctx))));
    vfs.mount("/api/data", Arc::new(DataMount::live(Arc::clone(ctx))));
    vfs.mount("/api/trashed", Arc::new(DataMount::trashed(Arc::clone(ctx))));

    for m in &config.mounts {
        let mount: Arc<dyn Mount> = if m.writable {
            Arc::new(LocalDiskMount::new_writable(&m.source))
        } else {
            Arc::new(LocalDiskMount::new(&m.source))
        };
        vfs.mount(&m.path, mount);
    }

    // The fallback's only job is to give mount-point injection a root to
    // hang /api off of.
    let root = MemoryMount::read_only();
    root.put_dir("/api");
    vfs.set_fallback(Arc::new(root));

    vfs
}
