//! Transaction-scoped request wrapping.
//!
//! Every handler runs against a [`RequestEnv`]: one pooled connection
//! attached to the caller's namespace, one open transaction, one VFS. Two
//! wrapper variants:
//!
//! - [`with_transaction`]: BEGIN, run the handler, COMMIT on success,
//!   ROLLBACK on any error (a failing rollback is logged, never reported
//!   in place of the original error). Used by every mutator; a handler
//!   producing a result sequence collects it before COMMIT.
//! - [`with_search_path`]: BEGIN only to scope the namespace, no COMMIT;
//!   the implicit rollback happens when the last owner of the connection
//!   drops. Used by reads, and by [`stream_entries`], whose stream owns
//!   the connection until the consumer finishes or walks away.
//!
//! Everything the request acquired is released on every exit path,
//! cancellation included: the connection, the transaction, and the sudo
//! flag all live behind RAII guards.

use std::sync::Arc;
use std::time::Instant;

use futures::Stream;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use kura_kernel::db::DbError;
use kura_kernel::vfs::path;
use kura_kernel::{Pipeline, Pool, SchemaRegistry, SystemContext, TenantConn, Vfs, VfsResult};
use kura_types::Caller;

use crate::compose;
use crate::config::ServerConfig;
use crate::error::ApiError;

/// Process-wide state shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub schemas: Arc<SchemaRegistry>,
    pub pipeline: Arc<Pipeline>,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let pool = Pool::open(&config.data_dir, config.pool_size)?;
        Ok(Self {
            pool,
            schemas: Arc::new(SchemaRegistry::new(config.schema_cache_ttl())),
            pipeline: Arc::new(Pipeline::standard()),
            config: Arc::new(config),
            started_at: Instant::now(),
        })
    }
}

/// What a handler sees: the per-request context and VFS. Cloning shares
/// the same connection and mounts.
#[derive(Clone)]
pub struct RequestEnv {
    pub ctx: Arc<SystemContext>,
    pub vfs: Arc<Vfs>,
}

fn db_to_api(err: DbError, path: &str, dev_mode: bool) -> ApiError {
    match err {
        DbError::InvalidNamespace(ns) => {
            ApiError::bad_request(path, format!("invalid namespace: {ns:?}"))
        }
        other => ApiError::internal(dev_mode, path, other),
    }
}

/// Acquire a connection, attach the namespace, open the transaction, and
/// build the request's context and VFS.
async fn open_env(
    state: &AppState,
    caller: Caller,
    ns: &str,
    request_path: &str,
) -> Result<RequestEnv, ApiError> {
    let dev = state.config.dev_mode;
    let conn = state
        .pool
        .acquire()
        .await
        .map_err(|e| db_to_api(e, request_path, dev))?;
    let tenant = TenantConn::attach(conn, state.pool.data_dir(), ns)
        .map_err(|e| db_to_api(e, request_path, dev))?;

    let ctx = Arc::new(SystemContext::new(
        caller,
        ns,
        Arc::new(tenant),
        Arc::clone(&state.schemas),
        Arc::clone(&state.pipeline),
        state.started_at,
    ));
    debug!(
        request = %ctx.request_id,
        ns,
        caller = %ctx.caller.username,
        path = request_path,
        "request env ready"
    );

    ctx.db.begin().map_err(|e| db_to_api(e, request_path, dev))?;
    state
        .schemas
        .ensure_meta(&ctx.db)
        .map_err(|e| db_to_api(e, request_path, dev))?;

    let vfs = Arc::new(compose::build_vfs(&ctx, &state.config));
    Ok(RequestEnv { ctx, vfs })
}

/// Run a handler inside a committed transaction.
pub async fn with_transaction<F, Fut, T>(
    state: &AppState,
    caller: Caller,
    ns: &str,
    request_path: &str,
    f: F,
) -> Result<T, ApiError>
where
    F: FnOnce(RequestEnv) -> Fut,
    Fut: Future<Output = VfsResult<T>>,
{
    let env = open_env(state, caller, ns, request_path).await?;
    match f(env.clone()).await {
        Ok(value) => {
            if let Err(e) = env.ctx.db.commit() {
                // The commit itself failed; roll back and report that, not
                // any later cleanup noise.
                if let Err(re) = env.ctx.db.rollback() {
                    warn!(request = %env.ctx.request_id, error = %re, "rollback after failed commit also failed");
                }
                return Err(db_to_api(e, request_path, state.config.dev_mode));
            }
            Ok(value)
        }
        Err(err) => {
            if let Err(re) = env.ctx.db.rollback() {
                warn!(request = %env.ctx.request_id, error = %re, "rollback failed");
            }
            Err(ApiError::from_vfs(err, request_path))
        }
    }
}

/// Read-only variant: the transaction scopes the namespace and is never
/// committed. Release (and the implicit rollback) happens when the last
/// clone of the env drops.
pub async fn with_search_path<F, Fut, T>(
    state: &AppState,
    caller: Caller,
    ns: &str,
    request_path: &str,
    f: F,
) -> Result<T, ApiError>
where
    F: FnOnce(RequestEnv) -> Fut,
    Fut: Future<Output = VfsResult<T>>,
{
    let env = open_env(state, caller, ns, request_path).await?;
    f(env)
        .await
        .map_err(|err| ApiError::from_vfs(err, request_path))
}

/// A lazy directory listing: one `stat` per child, pulled as the consumer
/// reads. The stream owns the request env, and with it the pooled
/// connection, until it is exhausted or dropped.
pub async fn stream_entries(
    state: AppState,
    caller: Caller,
    ns: String,
    dir: String,
) -> Result<impl Stream<Item = Result<JsonValue, ApiError>> + Send + 'static, ApiError> {
    let env = open_env(&state, caller, &ns, &dir).await?;
    let names: Vec<String> = env
        .vfs
        .readdir(&dir)
        .await
        .map_err(|e| ApiError::from_vfs(e, &dir))?
        .into_iter()
        .map(|e| e.name)
        .collect();
    debug!(request = %env.ctx.request_id, dir, count = names.len(), "streaming listing");

    let stream = futures::stream::unfold(
        (env, dir, names.into_iter()),
        |(env, dir, mut names)| async move {
            let name = names.next()?;
            let child = path::join(&dir, &name);
            let item = match env.vfs.stat(&child).await {
                Ok(entry) => serde_json::to_value(&entry)
                    .map_err(|e| ApiError::internal(true, &child, e)),
                Err(e) => Err(ApiError::from_vfs(e, &child)),
            };
            Some((item, (env, dir, names)))
        },
    );
    Ok(stream)
}
