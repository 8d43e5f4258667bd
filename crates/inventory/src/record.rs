use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use partsledger_core::{DomainError, DomainResult, Entity, InventoryId, ProductId, SupplierId};

/// Reorder threshold assigned when a record is created lazily.
pub const DEFAULT_REORDER_POINT: i64 = 10;

/// Persisted stock count for one product.
///
/// `stock` is never negative. Records are created lazily on the first stock
/// mutation and are never deleted while referenced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: InventoryId,
    pub product_id: ProductId,
    pub stock: i64,
    pub reorder_point: i64,
    pub supplier_id: Option<SupplierId>,
    pub last_restock_date: Option<DateTime<Utc>>,
}

/// Outcome of one stock mutation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub before: i64,
    pub after: i64,
    /// Signed delta the caller asked for.
    pub requested: i64,
}

impl StockChange {
    /// Signed delta actually applied to the record.
    pub fn applied(&self) -> i64 {
        self.after - self.before
    }

    /// True when the floor at zero absorbed part of a decrement.
    pub fn was_clamped(&self) -> bool {
        self.applied() != self.requested
    }
}

impl InventoryRecord {
    /// Fresh record: zero stock, default reorder point.
    pub fn new(product_id: ProductId) -> Self {
        Self {
            id: InventoryId::new(),
            product_id,
            stock: 0,
            reorder_point: DEFAULT_REORDER_POINT,
            supplier_id: None,
            last_restock_date: None,
        }
    }

    /// Apply a signed delta, flooring the result at zero.
    ///
    /// This is the clamping path used by manual adjustments and sale
    /// decrements; callers that need a hard failure must check
    /// [`ensure_available`](Self::ensure_available) first.
    pub fn apply_delta(&mut self, delta: i64) -> DomainResult<StockChange> {
        if delta == 0 {
            return Err(DomainError::InvalidQuantity(delta));
        }
        let before = self.stock;
        self.stock = before.saturating_add(delta).max(0);
        Ok(StockChange {
            before,
            after: self.stock,
            requested: delta,
        })
    }

    /// Record a receipt: increment only, and stamp restock metadata.
    pub fn receive(
        &mut self,
        quantity: i64,
        supplier_id: Option<SupplierId>,
        received_at: DateTime<Utc>,
    ) -> DomainResult<StockChange> {
        if quantity <= 0 {
            return Err(DomainError::InvalidQuantity(quantity));
        }
        let change = self.apply_delta(quantity)?;
        if supplier_id.is_some() {
            self.supplier_id = supplier_id;
        }
        self.last_restock_date = Some(received_at);
        Ok(change)
    }

    /// Remove an exact quantity; never clamps.
    pub fn remove_exact(&mut self, quantity: i64) -> DomainResult<StockChange> {
        if quantity <= 0 {
            return Err(DomainError::InvalidQuantity(quantity));
        }
        self.ensure_available(quantity)?;
        let before = self.stock;
        self.stock -= quantity;
        Ok(StockChange {
            before,
            after: self.stock,
            requested: -quantity,
        })
    }

    /// Fail with `InsufficientStock` unless `quantity` units are on hand.
    pub fn ensure_available(&self, quantity: i64) -> DomainResult<()> {
        if self.stock < quantity {
            return Err(DomainError::InsufficientStock {
                product_id: self.product_id,
                requested: quantity,
                available: self.stock,
            });
        }
        Ok(())
    }

    pub fn set_reorder_point(&mut self, reorder_point: i64) -> DomainResult<()> {
        if reorder_point < 0 {
            return Err(DomainError::InvalidQuantity(reorder_point));
        }
        self.reorder_point = reorder_point;
        Ok(())
    }

    pub fn is_out_of_stock(&self) -> bool {
        self.stock == 0
    }

    /// In stock, but at or below the reorder threshold.
    pub fn is_low_stock(&self) -> bool {
        self.stock > 0 && self.stock <= self.reorder_point
    }
}

impl Entity for InventoryRecord {
    type Id = InventoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record_with_stock(stock: i64) -> InventoryRecord {
        let mut record = InventoryRecord::new(ProductId::new());
        record.stock = stock;
        record
    }

    #[test]
    fn new_record_uses_default_reorder_point() {
        let record = InventoryRecord::new(ProductId::new());
        assert_eq!(record.stock, 0);
        assert_eq!(record.reorder_point, DEFAULT_REORDER_POINT);
        assert!(record.last_restock_date.is_none());
    }

    #[test]
    fn decrement_beyond_stock_clamps_at_zero() {
        let mut record = record_with_stock(5);
        let change = record.apply_delta(-3).unwrap();
        assert_eq!(record.stock, 2);
        assert!(!change.was_clamped());

        let change = record.apply_delta(-10).unwrap();
        assert_eq!(record.stock, 0);
        assert_eq!(change.requested, -10);
        assert_eq!(change.applied(), -2);
        assert!(change.was_clamped());
    }

    #[test]
    fn zero_delta_is_rejected() {
        let mut record = record_with_stock(5);
        assert_eq!(record.apply_delta(0).unwrap_err(), DomainError::InvalidQuantity(0));
        assert_eq!(record.stock, 5);
    }

    #[test]
    fn remove_exact_refuses_to_clamp() {
        let mut record = record_with_stock(2);
        let err = record.remove_exact(3).unwrap_err();
        match err {
            DomainError::InsufficientStock { requested, available, .. } => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(record.stock, 2);

        record.remove_exact(2).unwrap();
        assert!(record.is_out_of_stock());
    }

    #[test]
    fn receive_stamps_supplier_and_restock_date() {
        let mut record = record_with_stock(0);
        let supplier = SupplierId::new();
        let at = Utc::now();
        record.receive(4, Some(supplier), at).unwrap();
        assert_eq!(record.stock, 4);
        assert_eq!(record.supplier_id, Some(supplier));
        assert_eq!(record.last_restock_date, Some(at));

        // A receipt without supplier keeps the previous reference.
        record.receive(1, None, at).unwrap();
        assert_eq!(record.supplier_id, Some(supplier));
    }

    #[test]
    fn receive_rejects_non_positive_quantities() {
        let mut record = record_with_stock(1);
        assert!(record.receive(0, None, Utc::now()).is_err());
        assert!(record.receive(-4, None, Utc::now()).is_err());
        assert_eq!(record.stock, 1);
    }

    #[test]
    fn low_stock_excludes_empty_records() {
        let mut record = record_with_stock(10);
        assert!(record.is_low_stock());
        record.stock = 11;
        assert!(!record.is_low_stock());
        record.stock = 0;
        assert!(!record.is_low_stock());
        assert!(record.is_out_of_stock());
    }

    #[test]
    fn negative_reorder_point_is_rejected() {
        let mut record = record_with_stock(1);
        assert!(record.set_reorder_point(-1).is_err());
        record.set_reorder_point(0).unwrap();
        assert_eq!(record.reorder_point, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: clamping is applied per step, so the final stock equals a
        /// sequential fold with a floor at every step (not one floor at the end).
        #[test]
        fn clamping_is_applied_per_step(
            initial in 0i64..50,
            deltas in prop::collection::vec((-40i64..40).prop_filter("non-zero", |d| *d != 0), 1..30)
        ) {
            let mut record = record_with_stock(initial);
            let mut expected = initial;
            for delta in &deltas {
                record.apply_delta(*delta).unwrap();
                expected = (expected + delta).max(0);
                prop_assert!(record.stock >= 0);
            }
            prop_assert_eq!(record.stock, expected);
        }
    }
}
