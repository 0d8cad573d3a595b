//! Tenant-scoped connection.
//!
//! SQLite has no `SET search_path`; the equivalent here is attaching the
//! tenant's database file under its namespace name and qualifying every
//! table reference with that schema. Attach/detach bracket the transaction
//! because SQLite refuses both inside one.

use std::path::Path;
use std::sync::LazyLock;

use parking_lot::Mutex;
use regex::Regex;
use rusqlite::Connection;
use tracing::warn;

use super::pool::PooledConn;
use super::DbError;

static NAMESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("namespace pattern"));

/// Reject any namespace name that is not `[A-Za-z0-9_]+`, before any
/// statement mentions it.
pub fn validate_namespace(ns: &str) -> Result<(), DbError> {
    if NAMESPACE_RE.is_match(ns) {
        Ok(())
    } else {
        Err(DbError::InvalidNamespace(ns.to_string()))
    }
}

struct State {
    conn: PooledConn,
    in_txn: bool,
}

/// One pooled connection scoped to one tenant namespace.
///
/// Owned (via `Arc`) by the request context and by any streaming result
/// that outlives the handler. Dropping the last owner rolls back an open
/// transaction, detaches the namespace, and returns the connection to the
/// pool. That is the release path for normal completion, errors, and
/// cancellation alike.
pub struct TenantConn {
    state: Mutex<State>,
    ns: String,
}

impl std::fmt::Debug for TenantConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConn").field("ns", &self.ns).finish()
    }
}

impl TenantConn {
    /// Validate the namespace and attach `<data_dir>/<ns>.db` under it.
    pub fn attach(conn: PooledConn, data_dir: &Path, ns: &str) -> Result<Self, DbError> {
        validate_namespace(ns)?;
        let file = data_dir.join(format!("{ns}.db"));
        let file = file.display().to_string().replace('\'', "''");
        conn.execute_batch(&format!("ATTACH DATABASE '{file}' AS \"{ns}\""))?;
        Ok(Self {
            state: Mutex::new(State { conn, in_txn: false }),
            ns: ns.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.ns
    }

    /// A table reference qualified with the tenant schema.
    pub fn qualified(&self, table: &str) -> String {
        format!("\"{}\".\"{}\"", self.ns, table)
    }

    pub fn begin(&self) -> Result<(), DbError> {
        let mut st = self.state.lock();
        st.conn.execute_batch("BEGIN")?;
        st.in_txn = true;
        Ok(())
    }

    pub fn commit(&self) -> Result<(), DbError> {
        let mut st = self.state.lock();
        st.conn.execute_batch("COMMIT")?;
        st.in_txn = false;
        Ok(())
    }

    pub fn rollback(&self) -> Result<(), DbError> {
        let mut st = self.state.lock();
        st.conn.execute_batch("ROLLBACK")?;
        st.in_txn = false;
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.state.lock().in_txn
    }

    /// Run a closure against the raw connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, DbError> {
        let st = self.state.lock();
        f(&st.conn).map_err(DbError::from)
    }
}

impl Drop for TenantConn {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        if st.in_txn {
            if let Err(e) = st.conn.execute_batch("ROLLBACK") {
                warn!(ns = %self.ns, error = %e, "implicit rollback failed");
            }
            st.in_txn = false;
        }
        if let Err(e) = st.conn.execute_batch(&format!("DETACH DATABASE \"{}\"", self.ns)) {
            warn!(ns = %self.ns, error = %e, "detach failed");
        }
        // The inner PooledConn drop returns the connection to the pool.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Pool;
    use tempfile::TempDir;

    #[test]
    fn test_validate_namespace() {
        assert!(validate_namespace("acme_corp1").is_ok());
        assert!(validate_namespace("ACME").is_ok());
        assert!(validate_namespace("").is_err());
        assert!(validate_namespace("bad-ns").is_err());
        assert!(validate_namespace("a;DROP TABLE x").is_err());
        assert!(validate_namespace("a.b").is_err());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::open(dir.path(), 2).unwrap();

        let t1 = TenantConn::attach(pool.acquire().await.unwrap(), pool.data_dir(), "ns1").unwrap();
        t1.with_conn(|c| {
            c.execute_batch(&format!(
                "CREATE TABLE {} (x INTEGER); INSERT INTO {} VALUES (1);",
                t1.qualified("t"),
                t1.qualified("t")
            ))
        })
        .unwrap();
        drop(t1);

        let t2 = TenantConn::attach(pool.acquire().await.unwrap(), pool.data_dir(), "ns2").unwrap();
        let err = t2.with_conn(|c| {
            c.query_row(&format!("SELECT x FROM {}", t2.qualified("t")), [], |r| {
                r.get::<_, i64>(0)
            })
        });
        assert!(err.is_err(), "ns2 must not see ns1 tables");
    }

    #[tokio::test]
    async fn test_drop_rolls_back_open_transaction() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::open(dir.path(), 1).unwrap();

        let t = TenantConn::attach(pool.acquire().await.unwrap(), pool.data_dir(), "ns1").unwrap();
        t.with_conn(|c| c.execute_batch(&format!("CREATE TABLE {} (x INTEGER)", t.qualified("t"))))
            .unwrap();
        t.begin().unwrap();
        t.with_conn(|c| {
            c.execute(&format!("INSERT INTO {} VALUES (9)", t.qualified("t")), [])
        })
        .unwrap();
        drop(t); // no commit

        let t = TenantConn::attach(pool.acquire().await.unwrap(), pool.data_dir(), "ns1").unwrap();
        let count: i64 = t
            .with_conn(|c| {
                c.query_row(&format!("SELECT COUNT(*) FROM {}", t.qualified("t")), [], |r| {
                    r.get(0)
                })
            })
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(pool.available(), 0); // t still holds the connection
        drop(t);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_commit_persists() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::open(dir.path(), 1).unwrap();

        let t = TenantConn::attach(pool.acquire().await.unwrap(), pool.data_dir(), "ns1").unwrap();
        t.with_conn(|c| c.execute_batch(&format!("CREATE TABLE {} (x INTEGER)", t.qualified("t"))))
            .unwrap();
        t.begin().unwrap();
        t.with_conn(|c| {
            c.execute(&format!("INSERT INTO {} VALUES (9)", t.qualified("t")), [])
        })
        .unwrap();
        t.commit().unwrap();
        drop(t);

        let t = TenantConn::attach(pool.acquire().await.unwrap(), pool.data_dir(), "ns1").unwrap();
        let count: i64 = t
            .with_conn(|c| {
                c.query_row(&format!("SELECT COUNT(*) FROM {}", t.qualified("t")), [], |r| {
                    r.get(0)
                })
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
