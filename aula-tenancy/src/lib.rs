//! # aula-tenancy
//!
//! The multi-tenant data-access core behind the Aula school-management
//! backend. Every repository in the backend funnels its database work
//! through this crate's two narrow contracts: "run this unit of work
//! against the current tenant's database" and "run this unit of work
//! against the shared system database."
//!
//! The crate owns:
//! - the task-local tenant context ([`context`])
//! - the per-schema connection pool registry ([`registry`])
//! - system database bootstrap with embedded fallback ([`bootstrap`])
//! - transactional query dispatch ([`dispatcher`])
//!
//! Tenant resolution, that is, mapping a request to a [`TenantDescriptor`],
//! is the caller's job; this crate consumes fully-formed descriptors.
//!
//! ## Example
//!
//! ```rust,ignore
//! use aula_tenancy::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let system =
//!         resolve_system_backend(&StdEnvSource, &BootstrapConfig::default()).await?;
//!     let dispatcher = Dispatcher::from_bootstrap(&system, RegistryConfig::default());
//!
//!     // Request handling resolves a tenant and enters its scope...
//!     let tenant = TenantDescriptor::new(
//!         "north-hill-academy",
//!         "tenant_north_hill",
//!         ConnectOptions::from_url("postgresql://svc:pw@db.internal/school")?,
//!     );
//!
//!     let names = with_tenant(tenant, async {
//!         // ...and repositories dispatch against the context tenant.
//!         dispatcher
//!             .in_current(|tx| async move {
//!                 let rows = tx.query("SELECT name FROM pupils", &[]).await?;
//!                 rows.iter()
//!                     .map(|r| r.get_text("name").map(str::to_string))
//!                     .collect::<Result<Vec<_>, _>>()
//!                     .map_err(Into::into)
//!             })
//!             .await
//!     })
//!     .await?;
//!
//!     println!("{:?}", names);
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod context;
pub mod descriptor;
pub mod dispatcher;
pub mod env;
pub mod error;
pub mod registry;

pub use bootstrap::{
    resolve_system_backend, resolve_system_options, BootstrapConfig, SystemBackend,
    LEGACY_URL_VAR, PASSWORD_VAR, PRIMARY_URL_VAR, USER_VAR,
};
pub use context::{
    current_tenant, current_tenant_id, has_tenant, require_tenant, with_tenant, TenantScope,
};
pub use descriptor::{TenantDescriptor, TenantId};
pub use dispatcher::{Dispatcher, TxHandle};
pub use env::{EnvSource, MapEnvSource, StdEnvSource};
pub use error::{TenancyError, TenancyResult};
pub use registry::{PoolRegistry, RegistryConfig};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::bootstrap::{resolve_system_backend, BootstrapConfig, SystemBackend};
    pub use crate::context::{current_tenant, require_tenant, with_tenant, TenantScope};
    pub use crate::descriptor::{TenantDescriptor, TenantId};
    pub use crate::dispatcher::{Dispatcher, TxHandle};
    pub use crate::env::{EnvSource, MapEnvSource, StdEnvSource};
    pub use crate::error::{TenancyError, TenancyResult};
    pub use crate::registry::{PoolRegistry, RegistryConfig};
    pub use aula_db::{ConnectOptions, PoolSettings, Row, SqlValue};
}
