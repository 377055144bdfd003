//! Tenant identity and connection descriptors.

use std::fmt;
use std::sync::Arc;

use aula_db::ConnectOptions;

/// A unique identifier for a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantId(Arc<str>);

impl TenantId {
    /// Create a new tenant ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().into())
    }

    /// Get the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// An immutable record identifying one tenant's physical storage.
///
/// The schema namespace is the isolation boundary: two descriptors with the
/// same namespace resolve to the same connection pool, regardless of how
/// they were produced. Descriptors are created by tenant-resolution logic
/// outside this crate (auth token, subdomain, tenant registry lookup) and
/// handed in fully formed.
#[derive(Debug, Clone)]
pub struct TenantDescriptor {
    id: TenantId,
    schema: Arc<str>,
    options: Arc<ConnectOptions>,
}

impl TenantDescriptor {
    /// Create a descriptor for a tenant stored in `schema` on the target
    /// described by `options`.
    ///
    /// The schema namespace is layered onto the connection options so every
    /// session on the tenant's pool resolves names against it.
    pub fn new(
        id: impl Into<TenantId>,
        schema: impl Into<String>,
        options: ConnectOptions,
    ) -> Self {
        let schema: String = schema.into();
        let options = options.with_schema(schema.clone());
        Self {
            id: id.into(),
            schema: schema.into(),
            options: Arc::new(options),
        }
    }

    /// The tenant's opaque identifier.
    pub fn id(&self) -> &TenantId {
        &self.id
    }

    /// The schema namespace isolating this tenant's data.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// The connection target for this tenant.
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }
}
