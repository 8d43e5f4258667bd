use serde::{Deserialize, Serialize};

use partsledger_core::{DomainError, DomainResult, Entity, ProductId};

/// Product status as reported by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Inactive,
    Discontinued,
}

/// Catalog view of a product: the fields the ledger reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Individual units are tracked by serial number.
    pub requires_serial: bool,
    /// Price in smallest currency unit (e.g., cents).
    pub price: u64,
    pub status: ProductStatus,
}

impl Product {
    pub fn new(id: ProductId, name: impl Into<String>, price: u64, requires_serial: bool) -> Self {
        Self {
            id,
            name: name.into(),
            requires_serial,
            price,
            status: ProductStatus::Active,
        }
    }

    pub fn with_status(mut self, status: ProductStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == ProductStatus::Active
    }

    /// Turning off serial tracking is only allowed while no unit is held as
    /// evidence (`sold` or `defective`).
    pub fn ensure_serialization_can_be_disabled(&self, has_immutable_serials: bool) -> DomainResult<()> {
        if self.requires_serial && has_immutable_serials {
            return Err(DomainError::product_in_use(
                self.id,
                "serials in sold or defective state cannot be discarded",
            ));
        }
        Ok(())
    }

    /// Catalog deletion is blocked while any sale line references the product.
    pub fn ensure_deletable(&self, referenced_by_sales: bool) -> DomainResult<()> {
        if referenced_by_sales {
            return Err(DomainError::product_in_use(self.id, "referenced by existing sales"));
        }
        Ok(())
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
