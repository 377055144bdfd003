//! PostgreSQL backend over a deadpool connection pool.

use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

use crate::backend::{Backend, Session};
use crate::config::{ConnectOptions, PoolSettings};
use crate::error::{DbError, DbResult};
use crate::row::Row;
use crate::value::SqlValue;

/// A pooled PostgreSQL connection target.
///
/// Pool construction validates configuration synchronously and never
/// retries; physical connections are opened lazily on first acquire.
pub struct PgBackend {
    pool: Pool,
    options: Arc<ConnectOptions>,
}

impl PgBackend {
    /// Create a backend for the given target.
    pub fn new(options: ConnectOptions, settings: &PoolSettings) -> DbResult<Self> {
        let pg_config = options.to_pg_config();

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);

        let pool = Pool::builder(mgr)
            .max_size(settings.max_connections)
            .wait_timeout(settings.connection_timeout)
            .create_timeout(settings.connection_timeout)
            .recycle_timeout(settings.idle_timeout)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| DbError::config(format!("failed to create pool: {}", e)))?;

        info!(
            target_url = %options.canonical_url(),
            schema = options.schema.as_deref().unwrap_or("public"),
            max_connections = settings.max_connections,
            "PostgreSQL connection pool created"
        );

        Ok(Self {
            pool,
            options: Arc::new(options),
        })
    }

    /// The connection options this backend was built from.
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Current pool status (size, idle, waiting).
    pub fn status(&self) -> deadpool_postgres::Status {
        self.pool.status()
    }
}

#[async_trait]
impl Backend for PgBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn acquire(&self) -> DbResult<Box<dyn Session>> {
        debug!(schema = self.options.schema.as_deref().unwrap_or("public"), "acquiring connection");
        let client = self.pool.get().await?;
        Ok(Box::new(PgSession {
            client: Some(client),
            in_txn: false,
        }))
    }

    async fn ping(&self) -> DbResult<()> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn close(&self) {
        self.pool.close();
        info!(target_url = %self.options.canonical_url(), "PostgreSQL connection pool closed");
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// One pooled PostgreSQL connection.
struct PgSession {
    client: Option<Object>,
    in_txn: bool,
}

impl PgSession {
    fn client(&self) -> DbResult<&Object> {
        self.client.as_ref().ok_or(DbError::Closed)
    }
}

#[async_trait]
impl Session for PgSession {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        debug!(sql, "executing query");
        let owned = bind_params(params);
        let refs = param_refs(&owned);
        let rows = self.client()?.query(sql, &refs).await?;
        decode_rows(&rows)
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        debug!(sql, "executing statement");
        let owned = bind_params(params);
        let refs = param_refs(&owned);
        let count = self.client()?.execute(sql, &refs).await?;
        Ok(count)
    }

    async fn batch(&mut self, sql: &str) -> DbResult<()> {
        debug!(sql, "executing batch");
        self.client()?.batch_execute(sql).await?;
        Ok(())
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.client()?.batch_execute("BEGIN").await?;
        self.in_txn = true;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.client()?.batch_execute("COMMIT").await?;
        self.in_txn = false;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.client()?.batch_execute("ROLLBACK").await?;
        self.in_txn = false;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_txn
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        // A session abandoned mid-transaction must not return its connection
        // to the pool: detach it so the socket closes and the server aborts
        // the transaction.
        if self.in_txn {
            if let Some(client) = self.client.take() {
                warn!("session dropped with open transaction; discarding connection");
                drop(Object::take(client));
            }
        }
    }
}

fn bind_params(params: &[SqlValue]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    params
        .iter()
        .map(|value| -> Box<dyn ToSql + Sync + Send> {
            match value {
                SqlValue::Null => Box::new(Option::<String>::None),
                SqlValue::Bool(b) => Box::new(*b),
                SqlValue::Int(i) => Box::new(*i),
                SqlValue::Float(f) => Box::new(*f),
                SqlValue::Text(s) => Box::new(s.clone()),
                SqlValue::Bytes(b) => Box::new(b.clone()),
                SqlValue::Uuid(u) => Box::new(*u),
                SqlValue::Timestamp(t) => Box::new(*t),
                SqlValue::Json(j) => Box::new(j.clone()),
            }
        })
        .collect()
}

fn param_refs<'a>(
    owned: &'a [Box<dyn ToSql + Sync + Send>],
) -> Vec<&'a (dyn ToSql + Sync)> {
    owned.iter().map(|p| p.as_ref() as _).collect()
}

fn decode_rows(rows: &[tokio_postgres::Row]) -> DbResult<Vec<Row>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };

    let columns: Arc<[String]> = first
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect::<Vec<_>>()
        .into();

    rows.iter()
        .map(|row| {
            let values = row
                .columns()
                .iter()
                .enumerate()
                .map(|(idx, col)| decode_column(row, idx, col.type_()))
                .collect::<DbResult<Vec<_>>>()?;
            Ok(Row::new(columns.clone(), values))
        })
        .collect()
}

fn decode_column(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> DbResult<SqlValue> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| SqlValue::Int(i64::from(v))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| SqlValue::Int(i64::from(v))),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::Int),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| SqlValue::Float(f64::from(v))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::Float),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => row
            .try_get::<_, Option<String>>(idx)?
            .map(SqlValue::Text),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map(SqlValue::Bytes),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(SqlValue::Uuid),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?
            .map(SqlValue::Timestamp),
        Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)?
            .map(|v| SqlValue::Timestamp(v.and_utc())),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(SqlValue::Json),
        ref other => {
            return Err(DbError::decode(format!(
                "unsupported column type '{}' at index {}",
                other, idx
            )));
        }
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
