//! Fixed-size connection pool.
//!
//! The pool is the sole process-wide resource: created at startup, torn
//! down at shutdown. Each request takes exclusive ownership of one
//! connection for its lifetime; [`PooledConn`] returns it on drop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::DbError;

struct PoolInner {
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Connection>>,
    data_dir: PathBuf,
}

/// Shared handle to the connection pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("data_dir", &self.inner.data_dir)
            .field("available", &self.available())
            .finish()
    }
}

impl Pool {
    /// Open `size` connections against `<data_dir>/kura.db`, creating the
    /// directory and database as needed.
    pub fn open(data_dir: impl Into<PathBuf>, size: usize) -> Result<Self, DbError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join("kura.db");

        let mut idle = Vec::with_capacity(size);
        for _ in 0..size {
            idle.push(Self::open_conn(&db_path)?);
        }
        debug!(path = %db_path.display(), size, "connection pool ready");

        Ok(Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(size)),
                idle: Mutex::new(idle),
                data_dir,
            }),
        })
    }

    fn open_conn(db_path: &Path) -> Result<Connection, DbError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(conn)
    }

    /// Take a connection, waiting until one is free.
    pub async fn acquire(&self) -> Result<PooledConn, DbError> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| DbError::PoolClosed)?;
        let conn = self
            .inner
            .idle
            .lock()
            .pop()
            .ok_or(DbError::PoolClosed)?;
        Ok(PooledConn {
            conn: Some(conn),
            _permit: permit,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Where tenant database files live.
    pub fn data_dir(&self) -> &Path {
        &self.inner.data_dir
    }

    /// Connections currently free. Exposed for leak checks in tests.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }
}

/// Exclusive ownership of one pooled connection.
///
/// Dereferences to [`rusqlite::Connection`]; dropping returns the
/// connection to the pool on every exit path.
pub struct PooledConn {
    conn: Option<Connection>,
    _permit: OwnedSemaphorePermit,
    inner: Arc<PoolInner>,
}

impl std::ops::Deref for PooledConn {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.inner.idle.lock().push(conn);
        }
    }
}
