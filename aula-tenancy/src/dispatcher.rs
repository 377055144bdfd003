//! Transactional query dispatch.
//!
//! The dispatcher binds a caller-supplied unit of work to one transaction
//! against one of three targets: the system database, an explicitly named
//! tenant, or the tenant in the current task-local context. The work runs
//! to completion inside the transaction; `Ok` commits, `Err` rolls back and
//! the error is returned unchanged.
//!
//! # Nested dispatch
//!
//! A dispatcher call issued from inside an already-running unit of work
//! targeting the same scope joins the open transaction instead of opening a
//! second one against the same pool. The outer call owns commit/rollback;
//! an inner failure aborts the whole unit of work.
//!
//! # Cancellation
//!
//! If the future driving a unit of work is dropped mid-transaction, the
//! session's drop path aborts the half-open transaction before the
//! connection can be observed by anyone else (see the driver crate).

use std::future::Future;
use std::sync::Arc;

use aula_db::{Backend, DbError, Row, Session, SqlValue};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::bootstrap::SystemBackend;
use crate::context::require_tenant;
use crate::descriptor::TenantDescriptor;
use crate::error::{TenancyError, TenancyResult};
use crate::registry::{PoolRegistry, RegistryConfig};

/// The target a transaction is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TxScope {
    /// The system database.
    System,
    /// One tenant's schema namespace.
    Schema(Arc<str>),
}

struct TxInner {
    session: Mutex<Box<dyn Session>>,
    scope: TxScope,
    // Identity of the backend the transaction was opened on. Two scopes can
    // compare equal across different dispatchers; the backend pointer keeps
    // a nested call from joining a transaction on another physical database.
    backend_id: usize,
}

/// Handle to the transaction a unit of work runs in.
///
/// Cloneable; all clones serialize their statements onto the one
/// underlying connection.
#[derive(Clone)]
pub struct TxHandle {
    inner: Arc<TxInner>,
}

impl TxHandle {
    fn new(session: Box<dyn Session>, scope: TxScope, backend_id: usize) -> Self {
        Self {
            inner: Arc::new(TxInner {
                session: Mutex::new(session),
                scope,
                backend_id,
            }),
        }
    }

    /// Execute a query and return all rows.
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> TenancyResult<Vec<Row>> {
        let mut session = self.inner.session.lock().await;
        Ok(session.query(sql, params).await?)
    }

    /// Execute a query expected to return exactly one row.
    pub async fn query_one(&self, sql: &str, params: &[SqlValue]) -> TenancyResult<Row> {
        let mut rows = self.query(sql, params).await?;
        match rows.len() {
            1 => Ok(rows.remove(0)),
            n => Err(TenancyError::Db(DbError::query(format!(
                "expected one row, got {}",
                n
            )))),
        }
    }

    /// Execute a query expected to return zero or one row.
    pub async fn query_opt(&self, sql: &str, params: &[SqlValue]) -> TenancyResult<Option<Row>> {
        let mut rows = self.query(sql, params).await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(Some(rows.remove(0))),
            n => Err(TenancyError::Db(DbError::query(format!(
                "expected at most one row, got {}",
                n
            )))),
        }
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> TenancyResult<u64> {
        let mut session = self.inner.session.lock().await;
        Ok(session.execute(sql, params).await?)
    }

    /// Execute a batch of statements. No parameters.
    pub async fn batch(&self, sql: &str) -> TenancyResult<()> {
        let mut session = self.inner.session.lock().await;
        Ok(session.batch(sql).await?)
    }

    async fn commit(&self) -> TenancyResult<()> {
        let mut session = self.inner.session.lock().await;
        Ok(session.commit().await?)
    }

    async fn rollback(&self) {
        let mut session = self.inner.session.lock().await;
        if let Err(e) = session.rollback().await {
            // The session drop path discards the connection if the
            // transaction is still open.
            warn!(error = %e, "rollback failed");
        }
    }
}

tokio::task_local! {
    /// The transaction the current unit of work runs in, if any.
    static ACTIVE_TX: TxHandle;
}

/// Routes units of work to transactions against the right database.
///
/// Owns the system backend handle and the tenant pool registry; it is an
/// explicit value handed to the repository layer, not ambient state.
pub struct Dispatcher {
    system: Arc<dyn Backend>,
    registry: PoolRegistry,
}

impl Dispatcher {
    /// Create a dispatcher over a resolved system backend and an empty
    /// tenant pool registry.
    pub fn new(system: Arc<dyn Backend>, config: RegistryConfig) -> Self {
        Self {
            system,
            registry: PoolRegistry::new(config),
        }
    }

    /// Create a dispatcher from a bootstrap result.
    pub fn from_bootstrap(system: &SystemBackend, config: RegistryConfig) -> Self {
        Self::new(system.backend(), config)
    }

    /// The tenant pool registry (eviction sweeps, shutdown).
    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    /// The system database backend.
    pub fn system_backend(&self) -> Arc<dyn Backend> {
        self.system.clone()
    }

    /// Run a unit of work in a transaction against the system database.
    pub async fn in_system<F, Fut, T>(&self, work: F) -> TenancyResult<T>
    where
        F: FnOnce(TxHandle) -> Fut,
        Fut: Future<Output = TenancyResult<T>>,
    {
        self.run_in(TxScope::System, self.system.clone(), work).await
    }

    /// Run a unit of work in a transaction against a named tenant.
    ///
    /// The tenant's pool is resolved through the registry, created on first
    /// reference.
    pub async fn in_tenant<F, Fut, T>(
        &self,
        descriptor: &TenantDescriptor,
        work: F,
    ) -> TenancyResult<T>
    where
        F: FnOnce(TxHandle) -> Fut,
        Fut: Future<Output = TenancyResult<T>>,
    {
        let backend = self.registry.get_or_create(descriptor)?;
        let scope = TxScope::Schema(descriptor.schema().into());
        self.run_in(scope, backend, work).await
    }

    /// Run a unit of work in a transaction against the tenant in the
    /// current task-local context.
    ///
    /// Fails with [`TenancyError::MissingTenant`] if no tenant is in scope;
    /// nothing is executed in that case.
    pub async fn in_current<F, Fut, T>(&self, work: F) -> TenancyResult<T>
    where
        F: FnOnce(TxHandle) -> Fut,
        Fut: Future<Output = TenancyResult<T>>,
    {
        let descriptor = require_tenant()?;
        self.in_tenant(&descriptor, work).await
    }

    async fn run_in<F, Fut, T>(
        &self,
        scope: TxScope,
        backend: Arc<dyn Backend>,
        work: F,
    ) -> TenancyResult<T>
    where
        F: FnOnce(TxHandle) -> Fut,
        Fut: Future<Output = TenancyResult<T>>,
    {
        // Join an already-open transaction for the same scope on the same
        // backend.
        let backend_id = Arc::as_ptr(&backend) as *const () as usize;
        if let Ok(open) = ACTIVE_TX.try_with(|tx| tx.clone()) {
            if open.inner.scope == scope && open.inner.backend_id == backend_id {
                debug!(scope = ?scope, "joining open transaction");
                return work(open).await;
            }
        }

        let mut session = backend.acquire().await?;
        session.begin().await?;
        let handle = TxHandle::new(session, scope, backend_id);

        let result = ACTIVE_TX
            .scope(handle.clone(), work(handle.clone()))
            .await;

        match result {
            Ok(value) => {
                handle.commit().await?;
                Ok(value)
            }
            Err(e) => {
                handle.rollback().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aula_db::SqliteBackend;

    async fn dispatcher() -> Dispatcher {
        let system = SqliteBackend::open_in_memory().await.unwrap();
        Dispatcher::new(Arc::new(system), RegistryConfig::default())
    }

    #[tokio::test]
    async fn test_system_commit() {
        let dispatcher = dispatcher().await;

        dispatcher
            .in_system(|tx| async move {
                tx.batch("CREATE TABLE tenants (id TEXT PRIMARY KEY)").await?;
                tx.execute(
                    "INSERT INTO tenants (id) VALUES ($1)",
                    &[SqlValue::Text("acme".into())],
                )
                .await?;
                Ok(())
            })
            .await
            .unwrap();

        let count = dispatcher
            .in_system(|tx| async move {
                let row = tx.query_one("SELECT COUNT(*) AS n FROM tenants", &[]).await?;
                row.get_int("n").map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_error_rolls_back() {
        let dispatcher = dispatcher().await;

        dispatcher
            .in_system(|tx| async move {
                tx.batch("CREATE TABLE marks (id INTEGER PRIMARY KEY)").await?;
                Ok(())
            })
            .await
            .unwrap();

        let result: TenancyResult<()> = dispatcher
            .in_system(|tx| async move {
                tx.execute("INSERT INTO marks (id) VALUES ($1)", &[SqlValue::Int(1)])
                    .await?;
                // Duplicate key: the driver error aborts the unit of work.
                tx.execute("INSERT INTO marks (id) VALUES ($1)", &[SqlValue::Int(1)])
                    .await?;
                Ok(())
            })
            .await;
        assert!(result.is_err());

        // The first insert must not be visible.
        let rows = dispatcher
            .in_system(|tx| async move { tx.query("SELECT id FROM marks", &[]).await })
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_missing_tenant_fails_fast() {
        let dispatcher = dispatcher().await;

        let result: TenancyResult<()> = dispatcher
            .in_current(|_tx| async move { panic!("unit of work must not run") })
            .await;
        assert!(matches!(result, Err(TenancyError::MissingTenant)));
    }

    #[tokio::test]
    async fn test_nested_system_dispatch_joins_transaction() {
        let dispatcher = Arc::new(dispatcher().await);

        dispatcher
            .in_system(|tx| async move {
                tx.batch("CREATE TABLE audit (msg TEXT)").await?;
                Ok(())
            })
            .await
            .unwrap();

        let inner_dispatcher = dispatcher.clone();
        dispatcher
            .in_system(|tx| async move {
                tx.execute(
                    "INSERT INTO audit (msg) VALUES ($1)",
                    &[SqlValue::Text("outer".into())],
                )
                .await?;

                // The nested call must see the outer, uncommitted write:
                // it joined the same transaction.
                let seen = inner_dispatcher
                    .in_system(|tx| async move {
                        let row = tx
                            .query_one("SELECT COUNT(*) AS n FROM audit", &[])
                            .await?;
                        row.get_int("n").map_err(Into::into)
                    })
                    .await?;
                assert_eq!(seen, 1);
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_nested_dispatch_on_other_dispatcher_opens_own_transaction() {
        let first = Arc::new(dispatcher().await);
        let second = Arc::new(dispatcher().await);

        first
            .in_system(|tx| async move { tx.batch("CREATE TABLE only_first (id INTEGER)").await })
            .await
            .unwrap();

        // Same scope, different dispatcher: the nested call must get its own
        // transaction on its own database, where the table does not exist.
        let nested = second.clone();
        first
            .in_system(|tx| async move {
                tx.execute("INSERT INTO only_first (id) VALUES ($1)", &[SqlValue::Int(1)])
                    .await?;

                let result = nested
                    .in_system(|tx| async move {
                        tx.query("SELECT id FROM only_first", &[]).await
                    })
                    .await;
                assert!(result.is_err());
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_inner_failure_aborts_whole_unit_of_work() {
        let dispatcher = Arc::new(dispatcher().await);

        dispatcher
            .in_system(|tx| async move {
                tx.batch("CREATE TABLE audit (msg TEXT)").await?;
                Ok(())
            })
            .await
            .unwrap();

        let inner_dispatcher = dispatcher.clone();
        let result: TenancyResult<()> = dispatcher
            .in_system(|tx| async move {
                tx.execute(
                    "INSERT INTO audit (msg) VALUES ($1)",
                    &[SqlValue::Text("outer".into())],
                )
                .await?;
                inner_dispatcher
                    .in_system(|_tx| async move {
                        Err(TenancyError::Db(DbError::query("inner failure")))
                    })
                    .await?;
                Ok(())
            })
            .await;
        assert!(result.is_err());

        let rows = dispatcher
            .in_system(|tx| async move { tx.query("SELECT msg FROM audit", &[]).await })
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
