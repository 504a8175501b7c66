use anyhow::Result;
use async_trait::async_trait;
use domain::{Brand, Category, Product};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

/// Products, categories, and brands share the same thin CRUD shape, so one
/// repository covers the catalog.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn list_products(&self, tenant_id: Uuid) -> Result<Vec<Product>>;
    async fn find_product(&self, tenant_id: Uuid, product_id: Uuid) -> Result<Option<Product>>;
    async fn create_product(&self, product: &Product) -> Result<()>;

    async fn list_categories(&self, tenant_id: Uuid) -> Result<Vec<Category>>;
    async fn create_category(&self, category: &Category) -> Result<()>;

    async fn list_brands(&self, tenant_id: Uuid) -> Result<Vec<Brand>>;
    async fn find_brand(&self, tenant_id: Uuid, brand_id: Uuid) -> Result<Option<Brand>>;
    async fn create_brand(&self, brand: &Brand) -> Result<()>;
}

#[derive(Clone)]
pub struct PostgresCatalogRepository {
    pool: PgPool,
}

impl PostgresCatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_product(row: &PgRow) -> Result<Product> {
    Ok(Product {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        sku: row.try_get("sku")?,
        category_id: row.try_get("category_id")?,
        brand_id: row.try_get("brand_id")?,
        unit_price: row.try_get("unit_price")?,
        active: row.try_get("active")?,
    })
}

#[async_trait]
impl CatalogRepository for PostgresCatalogRepository {
    async fn list_products(&self, tenant_id: Uuid) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, sku, category_id, brand_id, unit_price, active
             FROM products WHERE tenant_id = $1 ORDER BY created_at ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_product).collect()
    }

    async fn find_product(&self, tenant_id: Uuid, product_id: Uuid) -> Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, sku, category_id, brand_id, unit_price, active
             FROM products WHERE id = $1 AND tenant_id = $2",
        )
        .bind(product_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_product).transpose()
    }

    async fn create_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            "INSERT INTO products (id, tenant_id, name, sku, category_id, brand_id, unit_price, active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(product.id)
        .bind(product.tenant_id)
        .bind(&product.name)
        .bind(&product.sku)
        .bind(product.category_id)
        .bind(product.brand_id)
        .bind(product.unit_price)
        .bind(product.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_categories(&self, tenant_id: Uuid) -> Result<Vec<Category>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name FROM categories
             WHERE tenant_id = $1 ORDER BY name ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Category {
                    id: row.try_get("id")?,
                    tenant_id: row.try_get("tenant_id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn create_category(&self, category: &Category) -> Result<()> {
        sqlx::query("INSERT INTO categories (id, tenant_id, name) VALUES ($1, $2, $3)")
            .bind(category.id)
            .bind(category.tenant_id)
            .bind(&category.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_brands(&self, tenant_id: Uuid) -> Result<Vec<Brand>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name FROM brands
             WHERE tenant_id = $1 ORDER BY name ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Brand {
                    id: row.try_get("id")?,
                    tenant_id: row.try_get("tenant_id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn find_brand(&self, tenant_id: Uuid, brand_id: Uuid) -> Result<Option<Brand>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name FROM brands WHERE id = $1 AND tenant_id = $2",
        )
        .bind(brand_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(Brand {
                id: row.try_get("id")?,
                tenant_id: row.try_get("tenant_id")?,
                name: row.try_get("name")?,
            })
        })
        .transpose()
    }

    async fn create_brand(&self, brand: &Brand) -> Result<()> {
        sqlx::query("INSERT INTO brands (id, tenant_id, name) VALUES ($1, $2, $3)")
            .bind(brand.id)
            .bind(brand.tenant_id)
            .bind(&brand.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
