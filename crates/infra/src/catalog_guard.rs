//! Checks the catalog consults before destructive product edits.

use tracing::instrument;

use partsledger_core::{DomainError, ProductId};
use partsledger_products::Product;

use crate::catalog::ProductCatalog;
use crate::error::LedgerResult;
use crate::serial_registry::product_has_immutable_serials;
use crate::store::LedgerStore;

/// Resolve a product or fail with `ProductNotFound`.
pub(crate) async fn require_product<C>(catalog: &C, product_id: ProductId) -> LedgerResult<Product>
where
    C: ProductCatalog + ?Sized,
{
    catalog
        .find_by_id(product_id)
        .await?
        .ok_or_else(|| DomainError::ProductNotFound(product_id).into())
}

#[derive(Debug, Clone)]
pub struct CatalogGuard<S, C> {
    store: S,
    catalog: C,
}

impl<S, C> CatalogGuard<S, C> {
    pub fn new(store: S, catalog: C) -> Self {
        Self { store, catalog }
    }
}

impl<S, C> CatalogGuard<S, C>
where
    S: LedgerStore,
    C: ProductCatalog,
{
    /// `ProductInUse` while any of the product's serials is `sold` or `defective`.
    #[instrument(skip(self), err)]
    pub async fn ensure_serialization_can_be_disabled(&self, product_id: ProductId) -> LedgerResult<()> {
        let product = require_product(&self.catalog, product_id).await?;
        let has_immutable = product_has_immutable_serials(&self.store, product_id).await?;
        product.ensure_serialization_can_be_disabled(has_immutable)?;
        Ok(())
    }

    /// `ProductInUse` while any sale line references the product.
    #[instrument(skip(self), err)]
    pub async fn ensure_product_deletable(&self, product_id: ProductId) -> LedgerResult<()> {
        let product = require_product(&self.catalog, product_id).await?;
        let referencing = self.store.sales_referencing_product(product_id).await?;
        product.ensure_deletable(!referencing.is_empty())?;
        Ok(())
    }
}
