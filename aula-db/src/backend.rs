//! The backend abstraction over concrete drivers.
//!
//! A [`Backend`] is one pooled connection target; a [`Session`] is exclusive
//! use of one physical connection from it. Every statement issued through a
//! session runs on that one connection, which is what makes the transaction
//! statements (`begin`/`commit`/`rollback`) coherent.

use async_trait::async_trait;

use crate::error::DbResult;
use crate::row::Row;
use crate::value::SqlValue;

/// A pooled connection target.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A short diagnostic label for this backend ("postgres", "sqlite").
    fn name(&self) -> &'static str;

    /// Acquire a session bound to one physical connection.
    async fn acquire(&self) -> DbResult<Box<dyn Session>>;

    /// Run a trivial round-trip to verify the target is reachable.
    async fn ping(&self) -> DbResult<()>;

    /// Close the backend. In-flight sessions finish; new acquires fail.
    fn close(&self);

    /// Whether the backend has been closed.
    fn is_closed(&self) -> bool;
}

/// Exclusive use of one physical connection.
///
/// Statements use `$1..$n` parameter placeholders; backends that use a
/// different placeholder syntax translate internally.
///
/// Dropping a session with an open transaction must not hand the connection
/// back in a reusable state: the half-open transaction has to be aborted
/// before any other caller can observe the connection.
#[async_trait]
pub trait Session: Send {
    /// Execute a query and return all rows.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>>;

    /// Execute a statement and return the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64>;

    /// Execute a batch of statements in one round-trip. No parameters.
    async fn batch(&mut self, sql: &str) -> DbResult<()>;

    /// Open a transaction on this connection.
    async fn begin(&mut self) -> DbResult<()>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> DbResult<()>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> DbResult<()>;

    /// Whether a transaction is currently open on this session.
    fn in_transaction(&self) -> bool;
}
