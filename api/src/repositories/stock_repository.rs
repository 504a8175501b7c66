use anyhow::Result;
use async_trait::async_trait;
use domain::StockLevel;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug)]
pub enum StockAdjustOutcome {
    Adjusted(StockLevel),
    /// The adjustment would drive the level negative.
    WouldGoNegative { current: i64 },
}

#[async_trait]
pub trait StockRepository: Send + Sync {
    async fn list(&self, tenant_id: Uuid, shop_id: Uuid) -> Result<Vec<StockLevel>>;
    async fn adjust(
        &self,
        tenant_id: Uuid,
        shop_id: Uuid,
        product_id: Uuid,
        delta: i64,
    ) -> Result<StockAdjustOutcome>;
}

#[derive(Clone)]
pub struct PostgresStockRepository {
    pool: PgPool,
}

impl PostgresStockRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StockRepository for PostgresStockRepository {
    async fn list(&self, tenant_id: Uuid, shop_id: Uuid) -> Result<Vec<StockLevel>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, shop_id, product_id, quantity, updated_at
             FROM stock_levels WHERE tenant_id = $1 AND shop_id = $2
             ORDER BY updated_at DESC",
        )
        .bind(tenant_id)
        .bind(shop_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(StockLevel {
                    id: row.try_get("id")?,
                    tenant_id: row.try_get("tenant_id")?,
                    shop_id: row.try_get("shop_id")?,
                    product_id: row.try_get("product_id")?,
                    quantity: row.try_get("quantity")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    async fn adjust(
        &self,
        tenant_id: Uuid,
        shop_id: Uuid,
        product_id: Uuid,
        delta: i64,
    ) -> Result<StockAdjustOutcome> {
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT quantity FROM stock_levels
             WHERE tenant_id = $1 AND shop_id = $2 AND product_id = $3
             FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(shop_id)
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;

        let current = current.unwrap_or(0);
        let next = current + delta;
        if next < 0 {
            return Ok(StockAdjustOutcome::WouldGoNegative { current });
        }

        let row = sqlx::query(
            "INSERT INTO stock_levels (id, tenant_id, shop_id, product_id, quantity)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (shop_id, product_id)
             DO UPDATE SET quantity = $5, updated_at = NOW()
             RETURNING id, tenant_id, shop_id, product_id, quantity, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(shop_id)
        .bind(product_id)
        .bind(next)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(StockAdjustOutcome::Adjusted(StockLevel {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            shop_id: row.try_get("shop_id")?,
            product_id: row.try_get("product_id")?,
            quantity: row.try_get("quantity")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}
