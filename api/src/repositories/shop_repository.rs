use anyhow::Result;
use async_trait::async_trait;
use domain::Shop;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

#[async_trait]
pub trait ShopRepository: Send + Sync {
    async fn list(&self, tenant_id: Uuid) -> Result<Vec<Shop>>;
    async fn find(&self, tenant_id: Uuid, shop_id: Uuid) -> Result<Option<Shop>>;
    async fn create(&self, shop: &Shop) -> Result<()>;
}

#[derive(Clone)]
pub struct PostgresShopRepository {
    pool: PgPool,
}

impl PostgresShopRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_shop(row: &PgRow) -> Result<Shop> {
    Ok(Shop {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        address: row.try_get("address")?,
        active: row.try_get("active")?,
    })
}

#[async_trait]
impl ShopRepository for PostgresShopRepository {
    async fn list(&self, tenant_id: Uuid) -> Result<Vec<Shop>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, address, active FROM shops
             WHERE tenant_id = $1 ORDER BY created_at ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_shop).collect()
    }

    async fn find(&self, tenant_id: Uuid, shop_id: Uuid) -> Result<Option<Shop>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, address, active FROM shops
             WHERE id = $1 AND tenant_id = $2",
        )
        .bind(shop_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_shop).transpose()
    }

    async fn create(&self, shop: &Shop) -> Result<()> {
        sqlx::query(
            "INSERT INTO shops (id, tenant_id, name, address, active)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(shop.id)
        .bind(shop.tenant_id)
        .bind(&shop.name)
        .bind(&shop.address)
        .bind(shop.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
