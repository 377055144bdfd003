//! Task-local tenant context.
//!
//! The context rides on Tokio's task-local storage, so it is scoped to one
//! unit of work (one request's task tree) and never to a worker thread:
//! the runtime reuses threads across unrelated requests, and a thread-local
//! holder would leak one request's tenant into the next.
//!
//! Request-handling code is expected to resolve a tenant and enter a scope
//! with [`with_tenant`] (or [`TenantScope::run`]) before any context-scoped
//! query runs; the scope ends when the future completes, so there is no
//! separate clear step to forget.

use std::future::Future;

use crate::descriptor::{TenantDescriptor, TenantId};
use crate::error::TenancyError;

tokio::task_local! {
    /// Task-local tenant descriptor.
    static CURRENT_TENANT: TenantDescriptor;
}

/// Execute an async block with the given tenant in scope.
///
/// The descriptor is visible to all nested calls, across `.await` points,
/// until the block completes.
pub async fn with_tenant<F, T>(descriptor: TenantDescriptor, f: F) -> T
where
    F: Future<Output = T>,
{
    CURRENT_TENANT.scope(descriptor, f).await
}

/// Get the current tenant descriptor, if one is in scope.
#[inline]
pub fn current_tenant() -> Option<TenantDescriptor> {
    CURRENT_TENANT.try_with(|d| d.clone()).ok()
}

/// Get the current tenant ID, if one is in scope.
#[inline]
pub fn current_tenant_id() -> Option<TenantId> {
    CURRENT_TENANT.try_with(|d| d.id().clone()).ok()
}

/// Check if a tenant is currently in scope.
#[inline]
pub fn has_tenant() -> bool {
    CURRENT_TENANT.try_with(|_| ()).is_ok()
}

/// Require a tenant, failing with [`TenancyError::MissingTenant`] if none
/// is in scope. Absence is an error for the caller, never a default.
#[inline]
pub fn require_tenant() -> Result<TenantDescriptor, TenancyError> {
    current_tenant().ok_or(TenancyError::MissingTenant)
}

/// A reusable tenant scope, for callers that enter the same tenant more
/// than once.
#[derive(Debug, Clone)]
pub struct TenantScope {
    descriptor: TenantDescriptor,
}

impl TenantScope {
    /// Create a scope for the given descriptor.
    pub fn new(descriptor: TenantDescriptor) -> Self {
        Self { descriptor }
    }

    /// The descriptor this scope enters.
    pub fn descriptor(&self) -> &TenantDescriptor {
        &self.descriptor
    }

    /// Run an async block with this scope's tenant in context.
    pub async fn run<F, T>(&self, f: F) -> T
    where
        F: Future<Output = T>,
    {
        CURRENT_TENANT.scope(self.descriptor.clone(), f).await
    }
}
