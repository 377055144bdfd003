//! End-to-end flow: bootstrap an embedded system database, scope a tenant
//! context, and dispatch units of work through one dispatcher.

use std::sync::Arc;

use aula_tenancy::prelude::*;

async fn embedded_dispatcher() -> Dispatcher {
    // Unconfigured environment resolves to the embedded fallback.
    let config = BootstrapConfig {
        fallback_path: None,
        ..BootstrapConfig::default()
    };
    let system = resolve_system_backend(&MapEnvSource::new(), &config)
        .await
        .unwrap();
    assert!(system.is_degraded());
    Dispatcher::from_bootstrap(&system, RegistryConfig::default())
}

fn descriptor(id: &str, schema: &str) -> TenantDescriptor {
    // A .invalid host: name resolution fails immediately, so pool acquires
    // error out without waiting on a connect timeout.
    let options =
        ConnectOptions::from_url("postgresql://svc:pw@db.invalid/school?connect_timeout=1")
            .unwrap();
    TenantDescriptor::new(id, schema, options)
}

#[tokio::test]
async fn bootstrap_then_system_unit_of_work() {
    let dispatcher = embedded_dispatcher().await;

    dispatcher
        .in_system(|tx| async move {
            tx.batch(
                "CREATE TABLE tenants (id TEXT PRIMARY KEY, schema_name TEXT NOT NULL)",
            )
            .await?;
            tx.execute(
                "INSERT INTO tenants (id, schema_name) VALUES ($1, $2)",
                &[
                    SqlValue::Text("north-hill".into()),
                    SqlValue::Text("tenant_north_hill".into()),
                ],
            )
            .await?;
            Ok(())
        })
        .await
        .unwrap();

    let schema = dispatcher
        .in_system(|tx| async move {
            let row = tx
                .query_one(
                    "SELECT schema_name FROM tenants WHERE id = $1",
                    &[SqlValue::Text("north-hill".into())],
                )
                .await?;
            row.get_text("schema_name")
                .map(str::to_string)
                .map_err(Into::into)
        })
        .await
        .unwrap();
    assert_eq!(schema, "tenant_north_hill");
}

#[tokio::test]
async fn context_scoping_selects_the_tenant() {
    let tenant = descriptor("north-hill", "tenant_north_hill");

    let id = with_tenant(tenant, async {
        current_tenant().unwrap().id().to_string()
    })
    .await;
    assert_eq!(id, "north-hill");

    // Outside the scope there is no tenant.
    assert!(require_tenant().is_err());
}

#[tokio::test]
async fn dispatch_without_context_fails_before_touching_a_pool() {
    let dispatcher = embedded_dispatcher().await;

    let result: TenancyResult<()> = dispatcher
        .in_current(|_tx| async move { unreachable!("unit of work must not run") })
        .await;
    assert!(result.unwrap_err().is_missing_tenant());
    assert!(dispatcher.registry().is_empty());
}

#[tokio::test]
async fn tenant_dispatch_creates_one_pool_per_schema() {
    let dispatcher = Arc::new(embedded_dispatcher().await);
    let tenant = descriptor("north-hill", "tenant_north_hill");

    // The pool is created on first reference; the acquire against the
    // unreachable host then fails, but the registry entry stays.
    for _ in 0..3 {
        let result: TenancyResult<()> = dispatcher
            .in_tenant(&tenant, |_tx| async move { Ok(()) })
            .await;
        assert!(result.is_err());
    }
    assert_eq!(dispatcher.registry().len(), 1);
    assert!(dispatcher.registry().contains("tenant_north_hill"));
}

#[tokio::test]
async fn shutdown_closes_every_pool() {
    let dispatcher = embedded_dispatcher().await;
    let _ = dispatcher
        .in_tenant(&descriptor("a", "tenant_a"), |_tx| async move { Ok(()) })
        .await;
    let _ = dispatcher
        .in_tenant(&descriptor("b", "tenant_b"), |_tx| async move { Ok(()) })
        .await;
    assert_eq!(dispatcher.registry().len(), 2);

    dispatcher.registry().close_all();
    assert!(dispatcher.registry().is_empty());
}
