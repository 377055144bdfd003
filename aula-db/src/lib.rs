//! # aula-db
//!
//! Database driver layer for the Aula data-access core.
//!
//! This crate provides:
//! - Connection target configuration and URL parsing
//! - A backend abstraction ([`Backend`] / [`Session`]) over concrete drivers
//! - A pooled PostgreSQL backend using `deadpool-postgres`
//! - An embedded SQLite backend for degraded-mode startup and tests
//! - A backend-independent value and row model
//!
//! ## Example
//!
//! ```rust,ignore
//! use aula_db::{Backend, ConnectOptions, PgBackend, PoolSettings, SqlValue};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ConnectOptions::from_url("postgresql://svc:pw@localhost/school")?
//!         .with_schema("tenant_acme");
//!     let backend = PgBackend::new(options, &PoolSettings::default())?;
//!
//!     let mut session = backend.acquire().await?;
//!     let rows = session
//!         .query("SELECT name FROM pupils WHERE id = $1", &[SqlValue::Int(1)])
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod postgres;
pub mod row;
pub mod sqlite;
pub mod value;

pub use backend::{Backend, Session};
pub use config::{ConnectOptions, PoolSettings, CANONICAL_SCHEME};
pub use error::{DbError, DbResult};
pub use postgres::PgBackend;
pub use row::Row;
pub use sqlite::SqliteBackend;
pub use value::SqlValue;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::backend::{Backend, Session};
    pub use crate::config::{ConnectOptions, PoolSettings};
    pub use crate::error::{DbError, DbResult};
    pub use crate::postgres::PgBackend;
    pub use crate::row::Row;
    pub use crate::sqlite::SqliteBackend;
    pub use crate::value::SqlValue;
}
