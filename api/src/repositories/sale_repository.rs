use anyhow::Result;
use async_trait::async_trait;
use domain::{ApprovalStatus, PaymentBreakdown, Sale, SaleItem};
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewSaleItem {
    pub product_id: Uuid,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewSale {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub shop_id: Uuid,
    pub customer_name: Option<String>,
    pub payments: PaymentBreakdown,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub due_amount: Decimal,
    pub created_by: Uuid,
    pub items: Vec<NewSaleItem>,
}

#[async_trait]
pub trait SaleRepository: Send + Sync {
    async fn create(&self, sale: &NewSale) -> Result<Sale>;
    async fn find(&self, tenant_id: Uuid, sale_id: Uuid) -> Result<Option<Sale>>;
    async fn list(
        &self,
        tenant_id: Uuid,
        shop_id: Option<Uuid>,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<Sale>>;
}

#[derive(Clone)]
pub struct PostgresSaleRepository {
    pool: PgPool,
}

impl PostgresSaleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_items(&self, sale_id: Uuid) -> Result<Vec<SaleItem>> {
        let rows = sqlx::query(
            "SELECT id, product_id, quantity, unit_price, total_amount
             FROM sale_items WHERE sale_id = $1 ORDER BY position ASC",
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(SaleItem {
                    id: row.try_get("id")?,
                    product_id: row.try_get("product_id")?,
                    quantity: row.try_get("quantity")?,
                    unit_price: row.try_get("unit_price")?,
                    total_amount: row.try_get("total_amount")?,
                })
            })
            .collect()
    }
}

const SALE_COLUMNS: &str = "id, tenant_id, shop_id, customer_name, cash_amount, card_amount, \
     upi_amount, credit_amount, total_amount, paid_amount, due_amount, status, created_by, \
     approved_by, approved_at, rejection_reason, created_at";

fn map_sale(row: &PgRow, items: Vec<SaleItem>) -> Result<Sale> {
    let status_raw: String = row.try_get("status")?;
    let status = ApprovalStatus::parse(&status_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown stored status: {status_raw}"))?;
    Ok(Sale {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        shop_id: row.try_get("shop_id")?,
        customer_name: row.try_get("customer_name")?,
        payments: PaymentBreakdown {
            cash: row.try_get("cash_amount")?,
            card: row.try_get("card_amount")?,
            upi: row.try_get("upi_amount")?,
            credit: row.try_get("credit_amount")?,
        },
        total_amount: row.try_get("total_amount")?,
        paid_amount: row.try_get("paid_amount")?,
        due_amount: row.try_get("due_amount")?,
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
impl SaleRepository for PostgresSaleRepository {
    async fn create(&self, sale: &NewSale) -> Result<Sale> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "INSERT INTO sales
                 (id, tenant_id, shop_id, customer_name, cash_amount, card_amount,
                  upi_amount, credit_amount, total_amount, paid_amount, due_amount, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING {SALE_COLUMNS}"
        ))
        .bind(sale.id)
        .bind(sale.tenant_id)
        .bind(sale.shop_id)
        .bind(&sale.customer_name)
        .bind(sale.payments.cash)
        .bind(sale.payments.card)
        .bind(sale.payments.upi)
        .bind(sale.payments.credit)
        .bind(sale.total_amount)
        .bind(sale.paid_amount)
        .bind(sale.due_amount)
        .bind(sale.created_by)
        .fetch_one(&mut *tx)
        .await?;

        for (position, item) in sale.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO sale_items (id, sale_id, product_id, quantity, unit_price, total_amount, position)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(Uuid::new_v4())
            .bind(sale.id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.total_amount)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let items = self.load_items(sale.id).await?;
        map_sale(&row, items)
    }

    async fn find(&self, tenant_id: Uuid, sale_id: Uuid) -> Result<Option<Sale>> {
        let row = sqlx::query(&format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(sale_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let items = self.load_items(sale_id).await?;
        Ok(Some(map_sale(&row, items)?))
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        shop_id: Option<Uuid>,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<Sale>> {
        let rows = sqlx::query(&format!(
            "SELECT {SALE_COLUMNS} FROM sales
             WHERE tenant_id = $1
               AND ($2::uuid IS NULL OR shop_id = $2)
               AND ($3::text IS NULL OR status = $3)
             ORDER BY created_at DESC"
        ))
        .bind(tenant_id)
        .bind(shop_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| map_sale(row, Vec::new())).collect()
    }
}
