//! Per-request system context.
//!
//! No global state: every mount receives the context at construction, and
//! the context owns (shares, via `Arc`) the tenant connection for its
//! request. Sudo is a scoped flag on the context, never process-wide.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use kura_types::{Caller, RequestId};

use crate::db::TenantConn;
use crate::pipeline::Pipeline;
use crate::schema_registry::SchemaRegistry;

/// Identity, ACL identity set, sudo state, and the database handle of one
/// request.
pub struct SystemContext {
    pub request_id: RequestId,
    pub caller: Caller,
    pub namespace: String,
    pub db: Arc<TenantConn>,
    pub schemas: Arc<SchemaRegistry>,
    pub pipeline: Arc<Pipeline>,
    /// When the server process started; serves `/system/uptime`.
    pub server_started: Instant,
    identity: BTreeSet<String>,
    sudo: AtomicBool,
}

impl SystemContext {
    pub fn new(
        caller: Caller,
        namespace: impl Into<String>,
        db: Arc<TenantConn>,
        schemas: Arc<SchemaRegistry>,
        pipeline: Arc<Pipeline>,
        server_started: Instant,
    ) -> Self {
        let identity = caller.identity_set();
        let sudo = caller.grants_sudo();
        Self {
            request_id: RequestId::new(),
            caller,
            namespace: namespace.into(),
            db,
            schemas,
            pipeline,
            server_started,
            identity,
            sudo: AtomicBool::new(sudo),
        }
    }

    /// The caller's ACL identity set, computed once per request.
    pub fn identity(&self) -> &BTreeSet<String> {
        &self.identity
    }

    pub fn is_sudo(&self) -> bool {
        self.sudo.load(Ordering::Relaxed)
    }

    /// Run a future with the sudo flag raised, restoring the previous value
    /// on every exit path: normal return, error, and cancellation.
    pub async fn with_sudo<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let prev = self.sudo.swap(true, Ordering::Relaxed);
        let _reset = SudoReset { flag: &self.sudo, prev };
        f().await
    }
}

impl std::fmt::Debug for SystemContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemContext")
            .field("request_id", &self.request_id)
            .field("caller", &self.caller.username)
            .field("namespace", &self.namespace)
            .field("sudo", &self.is_sudo())
            .finish()
    }
}

struct SudoReset<'a> {
    flag: &'a AtomicBool,
    prev: bool,
}

impl Drop for SudoReset<'_> {
    fn drop(&mut self) {
        self.flag.store(self.prev, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Pool;
    use crate::schema_registry::{DEFAULT_SCHEMA_CACHE_TTL, SchemaRegistry};
    use kura_types::Role;
    use tempfile::TempDir;

    async fn ctx(caller: Caller) -> (SystemContext, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = Pool::open(dir.path(), 1).unwrap();
        let db = TenantConn::attach(pool.acquire().await.unwrap(), pool.data_dir(), "acme").unwrap();
        let ctx = SystemContext::new(
            caller,
            "acme",
            Arc::new(db),
            Arc::new(SchemaRegistry::new(DEFAULT_SCHEMA_CACHE_TTL)),
            Arc::new(Pipeline::standard()),
            Instant::now(),
        );
        (ctx, dir)
    }

    #[tokio::test]
    async fn test_root_caller_starts_sudo() {
        let (ctx, _d) = ctx(Caller::new("u", "root", Role::Root)).await;
        assert!(ctx.is_sudo());
    }

    #[tokio::test]
    async fn test_with_sudo_scopes_elevation() {
        let (ctx, _d) = ctx(Caller::new("u", "bob", Role::User)).await;
        assert!(!ctx.is_sudo());

        let seen = ctx.with_sudo(|| async { ctx.is_sudo() }).await;
        assert!(seen);
        assert!(!ctx.is_sudo());
    }

    #[tokio::test]
    async fn test_with_sudo_restores_on_error_path() {
        let (ctx, _d) = ctx(Caller::new("u", "bob", Role::User)).await;
        let result: Result<(), &str> = ctx.with_sudo(|| async { Err("boom") }).await;
        assert!(result.is_err());
        assert!(!ctx.is_sudo());
    }

    #[tokio::test]
    async fn test_identity_precomputed() {
        let (ctx, _d) = ctx(Caller::new("user-1", "bob", Role::User)).await;
        assert!(ctx.identity().contains("user-1"));
        assert!(ctx.identity().contains("role:user"));
    }
}
