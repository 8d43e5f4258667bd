//! Service wiring: one ledger store and one catalog shared by every coordinator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::PgPool;

use partsledger_infra::{
    CatalogGuard, InMemoryLedgerStore, InMemoryProductCatalog, InventoryQueries, LedgerStore,
    PostgresLedgerStore, PostgresProductCatalog, ProductCatalog, ReturnProcessor, SalesCoordinator,
    SerialRegistry, StockLedger,
};

use crate::config::AppConfig;

pub type SharedStore = Arc<dyn LedgerStore>;
pub type SharedCatalog = Arc<dyn ProductCatalog>;

pub struct AppServices {
    pub stock: StockLedger<SharedStore, SharedCatalog>,
    pub serials: SerialRegistry<SharedStore, SharedCatalog>,
    pub sales: SalesCoordinator<SharedStore, SharedCatalog>,
    pub returns: ReturnProcessor<SharedStore>,
    pub queries: InventoryQueries<SharedStore, SharedCatalog>,
    pub catalog_guard: CatalogGuard<SharedStore, SharedCatalog>,
}

impl AppServices {
    pub fn new(store: SharedStore, catalog: SharedCatalog) -> Self {
        Self {
            stock: StockLedger::new(store.clone(), catalog.clone()),
            serials: SerialRegistry::new(store.clone(), catalog.clone()),
            sales: SalesCoordinator::new(store.clone(), catalog.clone()),
            returns: ReturnProcessor::new(store.clone()),
            queries: InventoryQueries::new(store.clone(), catalog.clone()),
            catalog_guard: CatalogGuard::new(store, catalog),
        }
    }

    /// In-memory wiring (dev/test).
    pub fn in_memory(catalog: InMemoryProductCatalog, lock_timeout: Duration) -> Self {
        Self::new(
            Arc::new(InMemoryLedgerStore::with_lock_timeout(lock_timeout)),
            Arc::new(catalog),
        )
    }
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    match &config.database_url {
        Some(url) => build_persistent_services(url, config.lock_timeout).await,
        None => {
            let catalog = match &config.catalog_seed {
                Some(path) => InMemoryProductCatalog::from_json_file(path)?,
                None => {
                    tracing::warn!("PARTSLEDGER_CATALOG_SEED not set; starting with an empty catalog");
                    InMemoryProductCatalog::new()
                }
            };
            Ok(AppServices::in_memory(catalog, config.lock_timeout))
        }
    }
}

async fn build_persistent_services(database_url: &str, lock_timeout: Duration) -> anyhow::Result<AppServices> {
    let pool = PgPool::connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store = PostgresLedgerStore::with_lock_timeout(pool.clone(), lock_timeout);
    store.migrate().await.context("failed to apply ledger schema")?;
    tracing::info!("using persistent ledger store");

    Ok(AppServices::new(
        Arc::new(store),
        Arc::new(PostgresProductCatalog::new(pool)),
    ))
}
