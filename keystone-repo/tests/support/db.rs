use std::sync::Arc;

use keystone_repo::{DataLayer, DbConfig, PgCounterStore, PgExecutor};

/// A data layer over the Postgres named by `KEYSTONE_DB_*`, with both schemas
/// applied.
pub async fn test_pg_layer() -> (DataLayer, PgCounterStore) {
    let config = DbConfig::from_env();
    let executor = PgExecutor::from_config(&config).expect("Failed to create database pool");
    executor
        .ensure_schema()
        .await
        .expect("Failed to apply entity schema");
    let counters = PgCounterStore::new(executor.pool().clone());
    counters
        .ensure_schema()
        .await
        .expect("Failed to apply counter schema");

    let layer = DataLayer::builder(Arc::new(executor))
        .with_counter_store(Arc::new(counters.clone()))
        .with_recent_audit()
        .build()
        .expect("Failed to build data layer");
    (layer, counters)
}
