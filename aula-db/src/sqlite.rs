//! Embedded SQLite backend.
//!
//! This backend exists for two reasons: it is the degraded-mode fallback
//! target for the system database when bootstrap cannot reach PostgreSQL,
//! and it gives the test suites a real transactional engine without a
//! server.
//!
//! One physical connection serves the whole backend; sessions are handed
//! out one at a time so transactions never interleave.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::backend::{Backend, Session};
use crate::error::{DbError, DbResult};
use crate::row::Row;
use crate::value::SqlValue;

/// An embedded SQLite connection target.
pub struct SqliteBackend {
    conn: Connection,
    sessions: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
    label: String,
}

impl SqliteBackend {
    /// Open a file-backed database, creating it if absent.
    pub async fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let label = path.as_ref().display().to_string();
        let conn = Connection::open(path.as_ref().to_path_buf()).await?;
        Self::finish_open(conn, label).await
    }

    /// Open a fresh in-memory database.
    pub async fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::finish_open(conn, ":memory:".to_string()).await
    }

    async fn finish_open(conn: Connection, label: String) -> DbResult<Self> {
        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        })
        .await?;

        info!(path = %label, "embedded SQLite database opened");

        Ok(Self {
            conn,
            sessions: Arc::new(Semaphore::new(1)),
            closed: Arc::new(AtomicBool::new(false)),
            label,
        })
    }

    /// The database path, or `:memory:`.
    pub fn label(&self) -> &str {
        &self.label
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn acquire(&self) -> DbResult<Box<dyn Session>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::Closed);
        }
        let permit = self
            .sessions
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DbError::Closed)?;
        debug!(path = %self.label, "acquired embedded session");
        Ok(Box::new(SqliteSession {
            conn: self.conn.clone(),
            permit: Some(permit),
            in_txn: false,
        }))
    }

    async fn ping(&self) -> DbResult<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch("SELECT 1")?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.sessions.close();
        info!(path = %self.label, "embedded SQLite backend closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Exclusive use of the embedded connection.
struct SqliteSession {
    conn: Connection,
    permit: Option<OwnedSemaphorePermit>,
    in_txn: bool,
}

#[async_trait]
impl Session for SqliteSession {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        debug!(sql, "executing query");
        let sql = translate_placeholders(sql);
        let bound: Vec<rusqlite::types::Value> = params.iter().map(to_sqlite_value).collect();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let columns: Arc<[String]> = stmt
                    .column_names()
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .into();
                let mut rows = stmt.query(rusqlite::params_from_iter(bound))?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let values = (0..columns.len())
                        .map(|idx| {
                            let value = row.get_ref(idx)?;
                            Ok(from_sqlite_value(value))
                        })
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    out.push(Row::new(columns.clone(), values));
                }
                Ok(out)
            })
            .await?;
        Ok(rows)
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        debug!(sql, "executing statement");
        let sql = translate_placeholders(sql);
        let bound: Vec<rusqlite::types::Value> = params.iter().map(to_sqlite_value).collect();
        let count = self
            .conn
            .call(move |conn| {
                let count = conn.execute(&sql, rusqlite::params_from_iter(bound))?;
                Ok(count as u64)
            })
            .await?;
        Ok(count)
    }

    async fn batch(&mut self, sql: &str) -> DbResult<()> {
        debug!(sql, "executing batch");
        let sql = sql.to_string();
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.batch("BEGIN").await?;
        self.in_txn = true;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.batch("COMMIT").await?;
        self.in_txn = false;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.batch("ROLLBACK").await?;
        self.in_txn = false;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_txn
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        // An abandoned transaction must be rolled back before the next
        // session is admitted; the permit is released only once the
        // rollback has run.
        if self.in_txn {
            warn!("embedded session dropped with open transaction; rolling back");
            let conn = self.conn.clone();
            let permit = self.permit.take();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _permit = permit;
                    let _ = conn
                        .call(|conn| {
                            conn.execute_batch("ROLLBACK")?;
                            Ok(())
                        })
                        .await;
                });
            }
        }
    }
}

/// Rewrite `$1..$n` placeholders into SQLite's `?1..?n` form, leaving
/// string literals untouched.
fn translate_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_string = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\'' {
            in_string = !in_string;
            out.push(c);
        } else if c == '$' && !in_string && chars.peek().is_some_and(|n| n.is_ascii_digit()) {
            out.push('?');
        } else {
            out.push(c);
        }
    }
    out
}

fn to_sqlite_value(value: &SqlValue) -> rusqlite::types::Value {
    use rusqlite::types::Value;
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(b) => Value::Integer(i64::from(*b)),
        SqlValue::Int(i) => Value::Integer(*i),
        SqlValue::Float(f) => Value::Real(*f),
        SqlValue::Text(s) => Value::Text(s.clone()),
        SqlValue::Bytes(b) => Value::Blob(b.clone()),
        SqlValue::Uuid(u) => Value::Text(u.to_string()),
        SqlValue::Timestamp(t) => Value::Text(t.to_rfc3339()),
        SqlValue::Json(j) => Value::Text(j.to_string()),
    }
}

fn from_sqlite_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Int(i),
        ValueRef::Real(f) => SqlValue::Float(f),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).to_string()),
        ValueRef::Blob(bytes) => SqlValue::Bytes(bytes.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_translate_placeholders() {
        assert_eq!(
            translate_placeholders("SELECT * FROM t WHERE a = $1 AND b = $2"),
            "SELECT * FROM t WHERE a = ?1 AND b = ?2"
        );
    }

    #[test]
    fn test_translate_skips_string_literals() {
        assert_eq!(
            translate_placeholders("SELECT '$1' WHERE a = $1"),
            "SELECT '$1' WHERE a = ?1"
        );
    }

    #[tokio::test]
    async fn test_query_roundtrip() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let mut session = backend.acquire().await.unwrap();

        session
            .batch("CREATE TABLE pupils (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        session
            .execute(
                "INSERT INTO pupils (id, name) VALUES ($1, $2)",
                &[SqlValue::Int(1), SqlValue::Text("amina".into())],
            )
            .await
            .unwrap();

        let rows = session
            .query("SELECT id, name FROM pupils", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_int("id").unwrap(), 1);
        assert_eq!(rows[0].get_text("name").unwrap(), "amina");
    }

    #[tokio::test]
    async fn test_transaction_rollback() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let mut session = backend.acquire().await.unwrap();
        session
            .batch("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();

        session.begin().await.unwrap();
        assert!(session.in_transaction());
        session
            .execute("INSERT INTO t (id) VALUES ($1)", &[SqlValue::Int(1)])
            .await
            .unwrap();
        session.rollback().await.unwrap();
        assert!(!session.in_transaction());

        let rows = session.query("SELECT id FROM t", &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_are_exclusive() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let session = backend.acquire().await.unwrap();

        // Second acquire must wait for the first session to drop.
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            backend.acquire(),
        )
        .await;
        assert!(second.is_err());

        drop(session);
        let mut session = backend.acquire().await.unwrap();
        session.batch("SELECT 1").await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_backend_rejects_acquire() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        backend.close();
        assert!(backend.is_closed());
        assert!(matches!(backend.acquire().await, Err(DbError::Closed)));
    }
}
