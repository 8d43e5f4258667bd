//! Property tests for the stock ledger's audit trail.

use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;

use partsledger_core::{ProductId, UserId};
use partsledger_infra::{AdjustStock, InMemoryLedgerStore, InMemoryProductCatalog, LedgerStore, StockLedger, StockMeta};
use partsledger_inventory::replay_with_clamping;
use partsledger_products::Product;

fn nonzero_delta() -> impl Strategy<Value = i64> {
    (-25i64..25).prop_filter("zero deltas are rejected", |d| *d != 0)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn stock_follows_per_step_clamping(deltas in prop::collection::vec(nonzero_delta(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (stock, replayed, entries) = runtime.block_on(async {
            let product = Product::new(ProductId::new(), "Gasket", 2_00, false);
            let store = InMemoryLedgerStore::new();
            let ledger = StockLedger::new(
                store.clone(),
                Arc::new(InMemoryProductCatalog::from_products([product.clone()])),
            );

            for delta in &deltas {
                ledger
                    .adjust_stock(AdjustStock {
                        product_id: product.id,
                        delta: *delta,
                        reorder_point: None,
                        meta: StockMeta::new(UserId::new(), Utc::now()),
                    })
                    .await
                    .unwrap();
            }

            let stock = store.inventory_record(product.id).await.unwrap().unwrap().stock;
            let history = store.transactions_for_product(product.id).await.unwrap();
            (stock, replay_with_clamping(&history), history.len())
        });

        let expected = deltas.iter().fold(0i64, |s, d| (s + d).max(0));
        prop_assert_eq!(stock, expected);
        prop_assert_eq!(replayed, stock);
        prop_assert_eq!(entries, deltas.len());
    }
}
