use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use domain::{ApprovalStatus, DailySalesItem, DailySalesRecord, PaymentBreakdown};
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewDailyItem {
    pub product_id: Uuid,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewDailyRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub shop_id: Uuid,
    pub salesman_id: Uuid,
    pub record_date: NaiveDate,
    pub payments: PaymentBreakdown,
    pub total_sales_amount: Decimal,
    pub created_by: Uuid,
    pub items: Vec<NewDailyItem>,
}

#[async_trait]
pub trait DailyRecordRepository: Send + Sync {
    async fn create(&self, record: &NewDailyRecord) -> Result<DailySalesRecord>;
    async fn find(&self, tenant_id: Uuid, record_id: Uuid) -> Result<Option<DailySalesRecord>>;
    async fn list(
        &self,
        tenant_id: Uuid,
        shop_id: Option<Uuid>,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<DailySalesRecord>>;
    /// Replaces the item lines and totals. Guarded to `pending` at the row
    /// level; returns false when the record was not pending (or absent).
    async fn replace_items(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
        payments: PaymentBreakdown,
        total_sales_amount: Decimal,
        items: &[NewDailyItem],
    ) -> Result<bool>;
}

#[derive(Clone)]
pub struct PostgresDailyRecordRepository {
    pool: PgPool,
}

impl PostgresDailyRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_items(&self, record_id: Uuid) -> Result<Vec<DailySalesItem>> {
        let rows = sqlx::query(
            "SELECT id, product_id, quantity, unit_price, total_amount
             FROM daily_sales_items WHERE record_id = $1 ORDER BY position ASC",
        )
        .bind(record_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_item).collect()
    }
}

fn map_item(row: &PgRow) -> Result<DailySalesItem> {
    Ok(DailySalesItem {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        quantity: row.try_get("quantity")?,
        unit_price: row.try_get("unit_price")?,
        total_amount: row.try_get("total_amount")?,
    })
}

fn map_record(row: &PgRow, items: Vec<DailySalesItem>) -> Result<DailySalesRecord> {
    let status_raw: String = row.try_get("status")?;
    let status = ApprovalStatus::parse(&status_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown stored status: {status_raw}"))?;
    Ok(DailySalesRecord {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        shop_id: row.try_get("shop_id")?,
        salesman_id: row.try_get("salesman_id")?,
        record_date: row.try_get("record_date")?,
        payments: PaymentBreakdown {
            cash: row.try_get("cash_amount")?,
            card: row.try_get("card_amount")?,
            upi: row.try_get("upi_amount")?,
            credit: row.try_get("credit_amount")?,
        },
        total_sales_amount: row.try_get("total_sales_amount")?,
        status,
        created_by: row.try_get("created_by")?,
        approved_by: row.try_get("approved_by")?,
        approved_at: row.try_get("approved_at")?,
        rejection_reason: row.try_get("rejection_reason")?,
        items,
        created_at: row.try_get("created_at")?,
    })
}

const RECORD_COLUMNS: &str = "id, tenant_id, shop_id, salesman_id, record_date, cash_amount, \
     card_amount, upi_amount, credit_amount, total_sales_amount, status, created_by, \
     approved_by, approved_at, rejection_reason, created_at";

async fn insert_items(
    tx: &mut Transaction<'_, Postgres>,
    record_id: Uuid,
    items: &[NewDailyItem],
) -> Result<()> {
    for (position, item) in items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO daily_sales_items (id, record_id, product_id, quantity, unit_price, total_amount, position)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(record_id)
        .bind(item.product_id)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.total_amount)
        .bind(position as i32)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl DailyRecordRepository for PostgresDailyRecordRepository {
    async fn create(&self, record: &NewDailyRecord) -> Result<DailySalesRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "INSERT INTO daily_sales_records
                 (id, tenant_id, shop_id, salesman_id, record_date,
                  cash_amount, card_amount, upi_amount, credit_amount,
                  total_sales_amount, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(record.id)
        .bind(record.tenant_id)
        .bind(record.shop_id)
        .bind(record.salesman_id)
        .bind(record.record_date)
        .bind(record.payments.cash)
        .bind(record.payments.card)
        .bind(record.payments.upi)
        .bind(record.payments.credit)
        .bind(record.total_sales_amount)
        .bind(record.created_by)
        .fetch_one(&mut *tx)
        .await?;

        insert_items(&mut tx, record.id, &record.items).await?;
        tx.commit().await?;

        let items = self.load_items(record.id).await?;
        map_record(&row, items)
    }

    async fn find(&self, tenant_id: Uuid, record_id: Uuid) -> Result<Option<DailySalesRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM daily_sales_records
             WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(record_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let items = self.load_items(record_id).await?;
        Ok(Some(map_record(&row, items)?))
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        shop_id: Option<Uuid>,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<DailySalesRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM daily_sales_records
             WHERE tenant_id = $1
               AND ($2::uuid IS NULL OR shop_id = $2)
               AND ($3::text IS NULL OR status = $3)
             ORDER BY record_date DESC, created_at DESC"
        ))
        .bind(tenant_id)
        .bind(shop_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| map_record(row, Vec::new())).collect()
    }

    async fn replace_items(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
        payments: PaymentBreakdown,
        total_sales_amount: Decimal,
        items: &[NewDailyItem],
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // The status guard runs under the row lock so a concurrent approval
        // cannot interleave with the edit.
        let updated = sqlx::query(
            "UPDATE daily_sales_records
             SET cash_amount = $3, card_amount = $4, upi_amount = $5, credit_amount = $6,
                 total_sales_amount = $7
             WHERE id = $1 AND tenant_id = $2 AND status = 'pending'",
        )
        .bind(record_id)
        .bind(tenant_id)
        .bind(payments.cash)
        .bind(payments.card)
        .bind(payments.upi)
        .bind(payments.credit)
        .bind(total_sales_amount)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM daily_sales_items WHERE record_id = $1")
            .bind(record_id)
            .execute(&mut *tx)
            .await?;
        insert_items(&mut tx, record_id, items).await?;

        tx.commit().await?;
        Ok(true)
    }
}
