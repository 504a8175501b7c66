use anyhow::Result;
use async_trait::async_trait;
use domain::{ApprovalStatus, Expense};
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewExpense {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub shop_id: Uuid,
    pub description: String,
    pub amount: Decimal,
    pub created_by: Uuid,
}

#[async_trait]
pub trait ExpenseRepository: Send + Sync {
    async fn create(&self, expense: &NewExpense) -> Result<Expense>;
    async fn find(&self, tenant_id: Uuid, expense_id: Uuid) -> Result<Option<Expense>>;
    async fn list(
        &self,
        tenant_id: Uuid,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<Expense>>;
}

#[derive(Clone)]
pub struct PostgresExpenseRepository {
    pool: PgPool,
}

impl PostgresExpenseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const EXPENSE_COLUMNS: &str = "id, tenant_id, shop_id, description, amount, status, created_by, \
     approved_by, approved_at, rejection_reason, created_at";

fn map_expense(row: &PgRow) -> Result<Expense> {
    let status_raw: String = row.try_get("status")?;
    let status = ApprovalStatus::parse(&status_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown stored status: {status_raw}"))?;
    Ok(Expense {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        shop_id: row.try_get("shop_id")?,
        description: row.try_get("description")?,
        amount: row.try_get("amount")?,
        status,
        created_by: row.try_get("created_by")?,
        approved_by: row.try_get("approved_by")?,
        approved_at: row.try_get("approved_at")?,
        rejection_reason: row.try_get("rejection_reason")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ExpenseRepository for PostgresExpenseRepository {
    async fn create(&self, expense: &NewExpense) -> Result<Expense> {
        let row = sqlx::query(&format!(
            "INSERT INTO expenses (id, tenant_id, shop_id, description, amount, created_by)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {EXPENSE_COLUMNS}"
        ))
        .bind(expense.id)
        .bind(expense.tenant_id)
        .bind(expense.shop_id)
        .bind(&expense.description)
        .bind(expense.amount)
        .bind(expense.created_by)
        .fetch_one(&self.pool)
        .await?;

        map_expense(&row)
    }

    async fn find(&self, tenant_id: Uuid, expense_id: Uuid) -> Result<Option<Expense>> {
        let row = sqlx::query(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(expense_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_expense).transpose()
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<Expense>> {
        let rows = sqlx::query(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expenses
             WHERE tenant_id = $1
               AND ($2::text IS NULL OR status = $2)
             ORDER BY created_at DESC"
        ))
        .bind(tenant_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_expense).collect()
    }
}
