//! The connection pool registry.
//!
//! One pooled backend per schema namespace, created lazily on first
//! reference. The map is lock-protected and construction happens under the
//! write lock, so concurrent first access from many requests still creates
//! at most one pool per namespace (pool construction is synchronous
//! configuration validation; no I/O happens until a session is acquired).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aula_db::{Backend, DbResult, PgBackend, PoolSettings};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::descriptor::TenantDescriptor;

/// Configuration for the pool registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Pool settings applied to every tenant backend.
    pub pool: PoolSettings,
    /// How long a pool may sit unreferenced before [`PoolRegistry::evict_idle`]
    /// removes and closes it.
    pub idle_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            idle_timeout: Duration::from_secs(1800),
        }
    }
}

struct PoolEntry {
    backend: Arc<dyn Backend>,
    last_access: Mutex<Instant>,
}

impl PoolEntry {
    fn touch(&self) -> Arc<dyn Backend> {
        *self.last_access.lock() = Instant::now();
        self.backend.clone()
    }
}

/// Registry of per-schema connection pools.
///
/// The registry exclusively owns the pools; callers receive shared handles
/// and never hold them across unit-of-work boundaries.
pub struct PoolRegistry {
    entries: RwLock<HashMap<String, PoolEntry>>,
    config: RegistryConfig,
}

impl PoolRegistry {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get the pool for a descriptor's schema namespace, creating it on
    /// first reference.
    ///
    /// Construction failure propagates and nothing is cached; the next call
    /// for the same namespace attempts construction again.
    pub fn get_or_create(&self, descriptor: &TenantDescriptor) -> DbResult<Arc<dyn Backend>> {
        // Fast path: existing pool under the read lock.
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(descriptor.schema()) {
                return Ok(entry.touch());
            }
        }

        let mut entries = self.entries.write();
        // Re-check: another task may have created the pool while we waited
        // for the write lock.
        if let Some(entry) = entries.get(descriptor.schema()) {
            return Ok(entry.touch());
        }

        debug!(
            tenant = %descriptor.id(),
            schema = descriptor.schema(),
            "creating connection pool for schema"
        );
        let backend: Arc<dyn Backend> =
            Arc::new(PgBackend::new(descriptor.options().clone(), &self.config.pool)?);
        entries.insert(
            descriptor.schema().to_string(),
            PoolEntry {
                backend: backend.clone(),
                last_access: Mutex::new(Instant::now()),
            },
        );
        Ok(backend)
    }

    /// Number of live pools.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the registry holds no pools.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if a pool exists for the given schema namespace.
    pub fn contains(&self, schema: &str) -> bool {
        self.entries.read().contains_key(schema)
    }

    /// Evict and close pools idle longer than the configured timeout.
    ///
    /// Closing is safe with respect to in-flight work: sessions already
    /// acquired keep their connections until they finish; only new acquires
    /// are refused. Returns the number of pools evicted.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut evicted = Vec::new();

        {
            let mut entries = self.entries.write();
            entries.retain(|schema, entry| {
                if now.duration_since(*entry.last_access.lock()) >= self.config.idle_timeout {
                    evicted.push((schema.clone(), entry.backend.clone()));
                    false
                } else {
                    true
                }
            });
        }

        for (schema, backend) in &evicted {
            backend.close();
            info!(schema = %schema, "evicted idle connection pool");
        }
        evicted.len()
    }

    /// Close every pool and empty the registry (process shutdown).
    pub fn close_all(&self) {
        let mut entries = self.entries.write();
        for entry in entries.values() {
            entry.backend.close();
        }
        entries.clear();
    }
}
