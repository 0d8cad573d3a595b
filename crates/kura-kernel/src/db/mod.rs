//! SQLite persistence: the process-wide pool and the tenant-scoped
//! connection every request owns.

mod pool;
mod tenant;

pub use pool::{Pool, PooledConn};
pub use tenant::{TenantConn, validate_namespace};

use thiserror::Error;

/// Database layer errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid namespace: {0:?}")]
    InvalidNamespace(String),

    #[error("connection pool closed")]
    PoolClosed,
}
