//! Error types for the tenancy layer.

use aula_db::DbError;
use thiserror::Error;

/// Result type for tenancy operations.
pub type TenancyResult<T> = Result<T, TenancyError>;

/// Errors raised by the tenancy core.
#[derive(Error, Debug)]
pub enum TenancyError {
    /// A context-scoped unit of work was dispatched with no tenant set.
    ///
    /// This is a hard failure for the request: the dispatcher never falls
    /// back to the system database or to a previously-used tenant.
    #[error("no tenant context set for this unit of work")]
    MissingTenant,

    /// Driver-level failure (pool, connection, query).
    #[error(transparent)]
    Db(#[from] DbError),

    /// The system database could not be resolved at startup.
    #[error("system database bootstrap failed: {0}")]
    Bootstrap(String),
}

impl TenancyError {
    /// Create a bootstrap error.
    pub fn bootstrap(message: impl Into<String>) -> Self {
        Self::Bootstrap(message.into())
    }

    /// Check whether this is the missing-context failure.
    pub fn is_missing_tenant(&self) -> bool {
        matches!(self, Self::MissingTenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tenant_display() {
        let err = TenancyError::MissingTenant;
        assert!(err.is_missing_tenant());
        assert_eq!(
            err.to_string(),
            "no tenant context set for this unit of work"
        );
    }

    #[test]
    fn test_db_error_passthrough() {
        let err = TenancyError::from(DbError::query("bad statement"));
        assert_eq!(err.to_string(), "query error: bad statement");
        assert!(!err.is_missing_tenant());
    }
}
