//! Infrastructure layer: storage backends, row locking, catalog access and
//! the coordinators that turn domain rules into atomic units of work.

pub mod catalog;
pub mod catalog_guard;
pub mod error;
pub mod queries;
pub mod return_processor;
pub mod sales_coordinator;
pub mod serial_registry;
pub mod stock_ledger;
pub mod store;

pub use catalog::{InMemoryProductCatalog, PostgresProductCatalog, ProductCatalog};
pub use catalog_guard::CatalogGuard;
pub use error::{LedgerError, LedgerResult, StoreError};
pub use queries::{InventoryQueries, InventoryStats, ProductInventory};
pub use return_processor::{ProcessReturn, ReturnProcessor};
pub use sales_coordinator::{CreateSale, SaleLine, SalesCoordinator, UpdateSaleStatus};
pub use serial_registry::{ReceiveSerialized, RegisterSerials, SerialRegistry, SerializedReceipt};
pub use stock_ledger::{
    AdjustStock, BulkReceive, StockAdjustment, StockLedger, StockLine, StockMeta, SupplierReturn,
};
pub use store::{InMemoryLedgerStore, LedgerStore, LockKey, LockSet, PostgresLedgerStore, UnitOfWork};
