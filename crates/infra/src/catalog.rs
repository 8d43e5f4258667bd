//! Product catalog boundary (read-only from the ledger's perspective).

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

use partsledger_core::ProductId;
use partsledger_products::{Product, ProductStatus};

use crate::error::StoreError;
use crate::store::postgres::map_sqlx_error;

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn find_by_id(&self, product_id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn exists(&self, product_id: ProductId) -> Result<bool, StoreError> {
        Ok(self.find_by_id(product_id).await?.is_some())
    }

    async fn list(&self) -> Result<Vec<Product>, StoreError>;
}

#[async_trait]
impl<C> ProductCatalog for Arc<C>
where
    C: ProductCatalog + ?Sized,
{
    async fn find_by_id(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).find_by_id(product_id).await
    }

    async fn exists(&self, product_id: ProductId) -> Result<bool, StoreError> {
        (**self).exists(product_id).await
    }

    async fn list(&self) -> Result<Vec<Product>, StoreError> {
        (**self).list().await
    }
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProductCatalog {
    products: RwLock<HashMap<ProductId, Product>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_products(products: impl IntoIterator<Item = Product>) -> Self {
        let catalog = Self::new();
        for product in products {
            catalog.insert(product);
        }
        catalog
    }

    /// Load a JSON array of products.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog seed {}", path.display()))?;
        let products: Vec<Product> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse catalog seed {}", path.display()))?;
        Ok(Self::from_products(products))
    }

    pub fn insert(&self, product: Product) {
        if let Ok(mut map) = self.products.write() {
            map.insert(product.id, product);
        }
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn find_by_id(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        let map = self
            .products
            .read()
            .map_err(|_| StoreError::Backend("catalog poisoned".to_string()))?;
        Ok(map.get(&product_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Product>, StoreError> {
        let map = self
            .products
            .read()
            .map_err(|_| StoreError::Backend("catalog poisoned".to_string()))?;
        let mut products: Vec<Product> = map.values().cloned().collect();
        products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(products)
    }
}

/// Catalog backed by the `products` table.
#[derive(Debug, Clone)]
pub struct PostgresProductCatalog {
    pool: Arc<PgPool>,
}

impl PostgresProductCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

fn product_from_row(row: &sqlx::postgres::PgRow) -> Result<Product, StoreError> {
    let corrupt = |e: sqlx::Error| StoreError::Corrupt(e.to_string());
    let status: String = row.try_get("status").map_err(corrupt)?;
    let price: i64 = row.try_get("price").map_err(corrupt)?;
    Ok(Product {
        id: ProductId::from_uuid(row.try_get("product_id").map_err(corrupt)?),
        name: row.try_get("name").map_err(corrupt)?,
        requires_serial: row.try_get("requires_serial").map_err(corrupt)?,
        price: u64::try_from(price).map_err(|_| StoreError::Corrupt(format!("negative price {price}")))?,
        status: match status.as_str() {
            "active" => ProductStatus::Active,
            "inactive" => ProductStatus::Inactive,
            "discontinued" => ProductStatus::Discontinued,
            other => return Err(StoreError::Corrupt(format!("unknown product status '{other}'"))),
        },
    })
}

#[async_trait]
impl ProductCatalog for PostgresProductCatalog {
    async fn find_by_id(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(
            "SELECT product_id, name, requires_serial, price, status FROM products WHERE product_id = $1",
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_product", e))?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(
            "SELECT product_id, name, requires_serial, price, status FROM products ORDER BY name ASC",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_products", e))?;

        rows.iter().map(product_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_catalog_finds_inserted_products() {
        let product = Product::new(ProductId::new(), "Brake pad set", 45_00, false);
        let catalog = InMemoryProductCatalog::from_products([product.clone()]);

        assert_eq!(catalog.find_by_id(product.id).await.unwrap(), Some(product.clone()));
        assert!(catalog.exists(product.id).await.unwrap());
        assert!(!catalog.exists(ProductId::new()).await.unwrap());
    }

    #[test]
    fn seed_file_is_parsed() {
        let product = Product::new(ProductId::new(), "Spark plug", 9_50, false);
        let path = std::env::temp_dir().join(format!("partsledger-seed-{}.json", product.id));
        std::fs::write(&path, serde_json::to_string(&vec![product.clone()]).unwrap()).unwrap();

        let catalog = InMemoryProductCatalog::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let listed = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(catalog.list())
            .unwrap();
        assert_eq!(listed, vec![product]);
    }

    #[test]
    fn missing_seed_file_names_the_path() {
        let err = InMemoryProductCatalog::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
