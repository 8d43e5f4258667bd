//! Postgres-backed ledger store.
//!
//! One unit of work is one SQL transaction. Row locks are transaction-scoped
//! advisory locks on a 64-bit hash of the [`LockKey`], taken in lock-set order
//! right after `BEGIN` and released by Postgres at `COMMIT`/`ROLLBACK`. The
//! lock wait is bounded by `SET LOCAL lock_timeout`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database | `55P03` | `Contention` | lock_timeout exceeded |
//! | Database | `40001` / `40P01` | `Contention` | serialization failure / deadlock |
//! | Database | `23505` | `Contention` | concurrent insert of the same key |
//! | Database | `23514` | `Corrupt` | check constraint (negative stock etc.) |
//! | Database (other) | Any other | `Backend` | |
//! | PoolClosed / Io / other | N/A | `Backend` | connection failures |

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use partsledger_core::{InventoryId, ProductId, SaleId, SupplierId, TransactionId, UserId};
use partsledger_inventory::{
    InventoryRecord, LedgerEntry, SerialCounts, SerialNumber, SerialStatus, TransactionType,
};
use partsledger_sales::{ReturnRecord, Sale};

use super::in_memory::DEFAULT_LOCK_TIMEOUT;
use super::{LedgerStore, LockKey, LockSet, UnitOfWork};
use crate::error::StoreError;

/// Schema applied by [`PostgresLedgerStore::migrate`]. Idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    product_id      UUID PRIMARY KEY,
    name            TEXT NOT NULL,
    requires_serial BOOLEAN NOT NULL DEFAULT FALSE,
    price           BIGINT NOT NULL CHECK (price >= 0),
    status          TEXT NOT NULL DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS inventory (
    inventory_id      UUID PRIMARY KEY,
    product_id        UUID NOT NULL UNIQUE,
    stock             BIGINT NOT NULL CHECK (stock >= 0),
    reorder_point     BIGINT NOT NULL CHECK (reorder_point >= 0),
    supplier_id       UUID NULL,
    last_restock_date TIMESTAMPTZ NULL
);

CREATE TABLE IF NOT EXISTS inventory_transactions (
    position         BIGSERIAL PRIMARY KEY,
    transaction_id   UUID NOT NULL UNIQUE,
    inventory_id     UUID NOT NULL,
    product_id       UUID NOT NULL,
    transaction_type TEXT NOT NULL,
    quantity         BIGINT NOT NULL CHECK (quantity > 0),
    serial_number    TEXT NULL,
    notes            TEXT NULL,
    transaction_date TIMESTAMPTZ NOT NULL,
    created_by       UUID NOT NULL
);
CREATE INDEX IF NOT EXISTS inventory_transactions_product_idx
    ON inventory_transactions (product_id, position);

CREATE TABLE IF NOT EXISTS serial_numbers (
    serial_number TEXT PRIMARY KEY,
    product_id    UUID NOT NULL,
    status        TEXT NOT NULL,
    notes         TEXT NULL,
    supplier_id   UUID NULL,
    created_at    TIMESTAMPTZ NOT NULL,
    updated_at    TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS serial_numbers_product_idx ON serial_numbers (product_id);

CREATE TABLE IF NOT EXISTS sales (
    sale_id        UUID PRIMARY KEY,
    sale_number    TEXT NOT NULL UNIQUE,
    status         TEXT NOT NULL,
    payment_status TEXT NOT NULL,
    total          BIGINT NOT NULL,
    document       JSONB NOT NULL,
    created_at     TIMESTAMPTZ NOT NULL,
    updated_at     TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS sale_returns (
    return_id  UUID PRIMARY KEY,
    sale_id    UUID NOT NULL REFERENCES sales (sale_id) ON DELETE CASCADE,
    document   JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS sale_returns_sale_idx ON sale_returns (sale_id);

CREATE SEQUENCE IF NOT EXISTS sale_number_seq;
"#;

/// Postgres-backed ledger store.
///
/// Uses the SQLx connection pool, which is thread-safe; each unit of work
/// checks out one connection for its transaction.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_lock_timeout(pool, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply [`SCHEMA`].
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

struct PostgresUnit {
    tx: Transaction<'static, Postgres>,
    locks: LockSet,
}

#[async_trait]
impl UnitOfWork for PostgresUnit {
    fn locks(&self) -> &LockSet {
        &self.locks
    }

    async fn inventory(&mut self, product_id: ProductId) -> Result<Option<InventoryRecord>, StoreError> {
        self.locks.ensure(&LockKey::Product(product_id))?;
        let row = sqlx::query(
            r#"
            SELECT inventory_id, product_id, stock, reorder_point, supplier_id, last_restock_date
            FROM inventory
            WHERE product_id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_inventory", e))?;

        row.as_ref().map(inventory_from_row).transpose()
    }

    async fn put_inventory(&mut self, record: &InventoryRecord) -> Result<(), StoreError> {
        self.locks.ensure(&LockKey::Product(record.product_id))?;
        sqlx::query(
            r#"
            INSERT INTO inventory (inventory_id, product_id, stock, reorder_point, supplier_id, last_restock_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (product_id) DO UPDATE SET
                stock = EXCLUDED.stock,
                reorder_point = EXCLUDED.reorder_point,
                supplier_id = EXCLUDED.supplier_id,
                last_restock_date = EXCLUDED.last_restock_date
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.product_id.as_uuid())
        .bind(record.stock)
        .bind(record.reorder_point)
        .bind(record.supplier_id.map(uuid::Uuid::from))
        .bind(record.last_restock_date)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("put_inventory", e))?;
        Ok(())
    }

    async fn serial(&mut self, serial: &str) -> Result<Option<SerialNumber>, StoreError> {
        self.locks.ensure(&LockKey::Serial(serial.to_string()))?;
        let row = sqlx::query(
            r#"
            SELECT serial_number, product_id, status, notes, supplier_id, created_at, updated_at
            FROM serial_numbers
            WHERE serial_number = $1
            "#,
        )
        .bind(serial)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_serial", e))?;

        row.as_ref().map(serial_from_row).transpose()
    }

    async fn put_serial(&mut self, serial: &SerialNumber) -> Result<(), StoreError> {
        self.locks.ensure(&LockKey::Serial(serial.serial.clone()))?;
        sqlx::query(
            r#"
            INSERT INTO serial_numbers (serial_number, product_id, status, notes, supplier_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (serial_number) DO UPDATE SET
                status = EXCLUDED.status,
                notes = EXCLUDED.notes,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&serial.serial)
        .bind(serial.product_id.as_uuid())
        .bind(serial.status.as_str())
        .bind(&serial.notes)
        .bind(serial.supplier_id.map(uuid::Uuid::from))
        .bind(serial.created_at)
        .bind(serial.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("put_serial", e))?;
        Ok(())
    }

    async fn append_transaction(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.locks.ensure(&LockKey::Product(entry.product_id))?;
        sqlx::query(
            r#"
            INSERT INTO inventory_transactions (
                transaction_id, inventory_id, product_id, transaction_type, quantity,
                serial_number, notes, transaction_date, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.transaction_id.as_uuid())
        .bind(entry.inventory_id.as_uuid())
        .bind(entry.product_id.as_uuid())
        .bind(entry.transaction_type.as_str())
        .bind(entry.quantity)
        .bind(&entry.serial_number)
        .bind(&entry.notes)
        .bind(entry.transaction_date)
        .bind(entry.created_by.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_transaction", e))?;
        Ok(())
    }

    async fn sale(&mut self, sale_id: SaleId) -> Result<Option<Sale>, StoreError> {
        self.locks.ensure(&LockKey::Sale(sale_id))?;
        let row = sqlx::query("SELECT document FROM sales WHERE sale_id = $1")
            .bind(sale_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_sale", e))?;

        row.as_ref().map(|r| document_from_row(r, "sale")).transpose()
    }

    async fn put_sale(&mut self, sale: &Sale) -> Result<(), StoreError> {
        self.locks.ensure(&LockKey::Sale(sale.id))?;
        let document = to_document(sale, "sale")?;
        sqlx::query(
            r#"
            INSERT INTO sales (sale_id, sale_number, status, payment_status, total, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (sale_id) DO UPDATE SET
                status = EXCLUDED.status,
                payment_status = EXCLUDED.payment_status,
                document = EXCLUDED.document,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(sale.id.as_uuid())
        .bind(&sale.sale_number)
        .bind(sale.status.as_str())
        .bind(sale.payment_status.as_str())
        .bind(i64::try_from(sale.total).map_err(|_| StoreError::Corrupt("sale total overflows BIGINT".to_string()))?)
        .bind(document)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("put_sale", e))?;
        Ok(())
    }

    async fn delete_sale(&mut self, sale_id: SaleId) -> Result<(), StoreError> {
        self.locks.ensure(&LockKey::Sale(sale_id))?;
        sqlx::query("DELETE FROM sales WHERE sale_id = $1")
            .bind(sale_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_sale", e))?;
        Ok(())
    }

    async fn put_return(&mut self, record: &ReturnRecord) -> Result<(), StoreError> {
        self.locks.ensure(&LockKey::Sale(record.sale_id))?;
        let document = to_document(record, "return")?;
        sqlx::query(
            r#"
            INSERT INTO sale_returns (return_id, sale_id, document, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.sale_id.as_uuid())
        .bind(document)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("put_return", e))?;
        Ok(())
    }

    async fn next_sale_sequence(&mut self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT nextval('sale_number_seq') AS seq")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("next_sale_sequence", e))?;
        let seq: i64 = row
            .try_get("seq")
            .map_err(|e| StoreError::Corrupt(format!("failed to read sale sequence: {e}")))?;
        Ok(seq as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self, locks), fields(lock_count = locks.len(), operation), err)]
    async fn begin(&self, locks: LockSet) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let span = Span::current();
        span.record("operation", "begin");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // SET does not take bind parameters.
        let timeout_ms = self.lock_timeout.as_millis().max(1);
        sqlx::query(&format!("SET LOCAL lock_timeout = '{timeout_ms}ms'"))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        for key in locks.iter() {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(key.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("acquire_lock", e))?;
        }

        Ok(Box::new(PostgresUnit { tx, locks }))
    }

    async fn inventory_record(&self, product_id: ProductId) -> Result<Option<InventoryRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT inventory_id, product_id, stock, reorder_point, supplier_id, last_restock_date
            FROM inventory
            WHERE product_id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("inventory_record", e))?;

        row.as_ref().map(inventory_from_row).transpose()
    }

    async fn inventory_records(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT inventory_id, product_id, stock, reorder_point, supplier_id, last_restock_date
            FROM inventory
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("inventory_records", e))?;

        rows.iter().map(inventory_from_row).collect()
    }

    async fn serial(&self, serial: &str) -> Result<Option<SerialNumber>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT serial_number, product_id, status, notes, supplier_id, created_at, updated_at
            FROM serial_numbers
            WHERE serial_number = $1
            "#,
        )
        .bind(serial)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("serial", e))?;

        row.as_ref().map(serial_from_row).transpose()
    }

    #[instrument(skip(self), fields(product_id = %product_id, operation), err)]
    async fn serials_for_product(
        &self,
        product_id: ProductId,
        status: Option<SerialStatus>,
    ) -> Result<Vec<SerialNumber>, StoreError> {
        let span = Span::current();
        span.record("operation", "serials_for_product");

        let rows = sqlx::query(
            r#"
            SELECT serial_number, product_id, status, notes, supplier_id, created_at, updated_at
            FROM serial_numbers
            WHERE product_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY serial_number ASC
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("serials_for_product", e))?;

        rows.iter().map(serial_from_row).collect()
    }

    async fn serial_counts(&self) -> Result<HashMap<ProductId, SerialCounts>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, status, COUNT(*) AS n
            FROM serial_numbers
            GROUP BY product_id, status
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("serial_counts", e))?;

        let mut counts: HashMap<ProductId, SerialCounts> = HashMap::new();
        for row in rows {
            let product_id: uuid::Uuid = row.try_get("product_id").map_err(corrupt)?;
            let status: String = row.try_get("status").map_err(corrupt)?;
            let n: i64 = row.try_get("n").map_err(corrupt)?;
            let status = SerialStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown serial status '{status}'")))?;
            counts
                .entry(ProductId::from_uuid(product_id))
                .or_default()
                .add(status, n as u64);
        }
        Ok(counts)
    }

    #[instrument(skip(self), fields(product_id = %product_id, operation, entry_count), err)]
    async fn transactions_for_product(&self, product_id: ProductId) -> Result<Vec<LedgerEntry>, StoreError> {
        let span = Span::current();
        span.record("operation", "transactions_for_product");

        let rows = sqlx::query(
            r#"
            SELECT transaction_id, inventory_id, product_id, transaction_type, quantity,
                   serial_number, notes, transaction_date, created_by
            FROM inventory_transactions
            WHERE product_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("transactions_for_product", e))?;

        let entries = rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()?;
        span.record("entry_count", entries.len());
        Ok(entries)
    }

    async fn sale(&self, sale_id: SaleId) -> Result<Option<Sale>, StoreError> {
        let row = sqlx::query("SELECT document FROM sales WHERE sale_id = $1")
            .bind(sale_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("sale", e))?;

        row.as_ref().map(|r| document_from_row(r, "sale")).transpose()
    }

    async fn returns_for_sale(&self, sale_id: SaleId) -> Result<Vec<ReturnRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT document FROM sale_returns WHERE sale_id = $1 ORDER BY created_at ASC",
        )
        .bind(sale_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("returns_for_sale", e))?;

        rows.iter().map(|r| document_from_row(r, "return")).collect()
    }

    async fn sales_referencing_product(&self, product_id: ProductId) -> Result<Vec<SaleId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT sale_id
            FROM sales
            WHERE document -> 'items' @> jsonb_build_array(jsonb_build_object('product_id', $1::text))
            ORDER BY sale_id ASC
            "#,
        )
        .bind(product_id.to_string())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("sales_referencing_product", e))?;

        rows.iter()
            .map(|r| {
                r.try_get::<uuid::Uuid, _>("sale_id")
                    .map(SaleId::from_uuid)
                    .map_err(corrupt)
            })
            .collect()
    }
}

// Row decoding

fn corrupt(err: sqlx::Error) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

fn inventory_from_row(row: &PgRow) -> Result<InventoryRecord, StoreError> {
    let supplier_id: Option<uuid::Uuid> = row.try_get("supplier_id").map_err(corrupt)?;
    Ok(InventoryRecord {
        id: InventoryId::from_uuid(row.try_get("inventory_id").map_err(corrupt)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(corrupt)?),
        stock: row.try_get("stock").map_err(corrupt)?,
        reorder_point: row.try_get("reorder_point").map_err(corrupt)?,
        supplier_id: supplier_id.map(SupplierId::from_uuid),
        last_restock_date: row.try_get::<Option<DateTime<Utc>>, _>("last_restock_date").map_err(corrupt)?,
    })
}

fn serial_from_row(row: &PgRow) -> Result<SerialNumber, StoreError> {
    let status: String = row.try_get("status").map_err(corrupt)?;
    let supplier_id: Option<uuid::Uuid> = row.try_get("supplier_id").map_err(corrupt)?;
    Ok(SerialNumber {
        serial: row.try_get("serial_number").map_err(corrupt)?,
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(corrupt)?),
        status: SerialStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown serial status '{status}'")))?,
        notes: row.try_get("notes").map_err(corrupt)?,
        supplier_id: supplier_id.map(SupplierId::from_uuid),
        created_at: row.try_get("created_at").map_err(corrupt)?,
        updated_at: row.try_get("updated_at").map_err(corrupt)?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let transaction_type: String = row.try_get("transaction_type").map_err(corrupt)?;
    Ok(LedgerEntry {
        transaction_id: TransactionId::from_uuid(row.try_get("transaction_id").map_err(corrupt)?),
        inventory_id: InventoryId::from_uuid(row.try_get("inventory_id").map_err(corrupt)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(corrupt)?),
        transaction_type: TransactionType::parse(&transaction_type).ok_or_else(|| {
            StoreError::Corrupt(format!("unknown transaction type '{transaction_type}'"))
        })?,
        quantity: row.try_get("quantity").map_err(corrupt)?,
        serial_number: row.try_get("serial_number").map_err(corrupt)?,
        notes: row.try_get("notes").map_err(corrupt)?,
        transaction_date: row.try_get("transaction_date").map_err(corrupt)?,
        created_by: UserId::from_uuid(row.try_get("created_by").map_err(corrupt)?),
    })
}

fn to_document<T: serde::Serialize>(value: &T, kind: &str) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Corrupt(format!("failed to encode {kind}: {e}")))
}

fn document_from_row<T: serde::de::DeserializeOwned>(row: &PgRow, kind: &str) -> Result<T, StoreError> {
    let document: serde_json::Value = row.try_get("document").map_err(corrupt)?;
    serde_json::from_value(document).map_err(|e| StoreError::Corrupt(format!("failed to decode {kind}: {e}")))
}

/// Map SQLx errors to StoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("55P03") | Some("40001") | Some("40P01") | Some("23505") => StoreError::Contention(msg),
                Some("23514") => StoreError::Corrupt(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {}", operation)),
        sqlx::Error::PoolTimedOut => StoreError::Contention(format!("connection pool timed out in {}", operation)),
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
