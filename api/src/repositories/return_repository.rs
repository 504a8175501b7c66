use anyhow::Result;
use async_trait::async_trait;
use domain::{ApprovalStatus, SaleReturn, SaleReturnItem};
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewReturnItem {
    pub sale_item_id: Uuid,
    pub quantity: i64,
    pub refund_amount: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewReturn {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub sale_id: Uuid,
    pub reason: Option<String>,
    pub total_refund: Decimal,
    pub created_by: Uuid,
    pub items: Vec<NewReturnItem>,
}

#[async_trait]
pub trait ReturnRepository: Send + Sync {
    async fn create(&self, ret: &NewReturn) -> Result<SaleReturn>;
    async fn find(&self, tenant_id: Uuid, return_id: Uuid) -> Result<Option<SaleReturn>>;
    async fn list(
        &self,
        tenant_id: Uuid,
        sale_id: Option<Uuid>,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<SaleReturn>>;
}

#[derive(Clone)]
pub struct PostgresReturnRepository {
    pool: PgPool,
}

impl PostgresReturnRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_items(&self, return_id: Uuid) -> Result<Vec<SaleReturnItem>> {
        let rows = sqlx::query(
            "SELECT id, sale_item_id, quantity, refund_amount
             FROM sale_return_items WHERE return_id = $1",
        )
        .bind(return_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(SaleReturnItem {
                    id: row.try_get("id")?,
                    sale_item_id: row.try_get("sale_item_id")?,
                    quantity: row.try_get("quantity")?,
                    refund_amount: row.try_get("refund_amount")?,
                })
            })
            .collect()
    }
}

const RETURN_COLUMNS: &str = "id, tenant_id, sale_id, reason, total_refund, status, created_by, \
     approved_by, approved_at, rejection_reason, created_at";

fn map_return(row: &PgRow, items: Vec<SaleReturnItem>) -> Result<SaleReturn> {
    let status_raw: String = row.try_get("status")?;
    let status = ApprovalStatus::parse(&status_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown stored status: {status_raw}"))?;
    Ok(SaleReturn {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        sale_id: row.try_get("sale_id")?,
        reason: row.try_get("reason")?,
        total_refund: row.try_get("total_refund")?,
        status,
        created_by: row.try_get("created_by")?,
        approved_by: row.try_get("approved_by")?,
        approved_at: row.try_get("approved_at")?,
        rejection_reason: row.try_get("rejection_reason")?,
        items,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ReturnRepository for PostgresReturnRepository {
    async fn create(&self, ret: &NewReturn) -> Result<SaleReturn> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "INSERT INTO sale_returns (id, tenant_id, sale_id, reason, total_refund, created_by)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {RETURN_COLUMNS}"
        ))
        .bind(ret.id)
        .bind(ret.tenant_id)
        .bind(ret.sale_id)
        .bind(&ret.reason)
        .bind(ret.total_refund)
        .bind(ret.created_by)
        .fetch_one(&mut *tx)
        .await?;

        for item in &ret.items {
            sqlx::query(
                "INSERT INTO sale_return_items (id, return_id, sale_item_id, quantity, refund_amount)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(Uuid::new_v4())
            .bind(ret.id)
            .bind(item.sale_item_id)
            .bind(item.quantity)
            .bind(item.refund_amount)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let items = self.load_items(ret.id).await?;
        map_return(&row, items)
    }

    async fn find(&self, tenant_id: Uuid, return_id: Uuid) -> Result<Option<SaleReturn>> {
        let row = sqlx::query(&format!(
            "SELECT {RETURN_COLUMNS} FROM sale_returns WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(return_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let items = self.load_items(return_id).await?;
        Ok(Some(map_return(&row, items)?))
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        sale_id: Option<Uuid>,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<SaleReturn>> {
        let rows = sqlx::query(&format!(
            "SELECT {RETURN_COLUMNS} FROM sale_returns
             WHERE tenant_id = $1
               AND ($2::uuid IS NULL OR sale_id = $2)
               AND ($3::text IS NULL OR status = $3)
             ORDER BY created_at DESC"
        ))
        .bind(tenant_id)
        .bind(sale_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| map_return(row, Vec::new())).collect()
    }
}
