use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadline_scheduler::SchedulerHandle;
use domain::{ApprovalStatus, BankDeposit, CollectionType, MoneyCollection};
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewCollection {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub shop_id: Uuid,
    pub originator_id: Uuid,
    pub counterparty_id: Uuid,
    pub amount: Decimal,
    pub collection_type: CollectionType,
    pub submitted_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDeposit {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub collection_id: Uuid,
    pub amount: Decimal,
    pub bank_reference: String,
    pub deposited_by: Uuid,
}

#[derive(Debug)]
pub enum DepositOutcome {
    Created(BankDeposit),
    CollectionNotFound,
    /// Deposits may only be booked against an approved collection.
    CollectionNotApproved(ApprovalStatus),
}

#[async_trait]
pub trait CollectionRepository: Send + Sync {
    /// Inserts the pending collection and registers its deadline timer in
    /// one atomic operation; a failed registration rolls the insert back.
    async fn create(
        &self,
        collection: &NewCollection,
        scheduler: &SchedulerHandle,
    ) -> Result<MoneyCollection>;
    async fn find(&self, tenant_id: Uuid, collection_id: Uuid) -> Result<Option<MoneyCollection>>;
    async fn list(
        &self,
        tenant_id: Uuid,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<MoneyCollection>>;
    async fn create_deposit(&self, deposit: &NewDeposit) -> Result<DepositOutcome>;
    async fn list_deposits(&self, tenant_id: Uuid) -> Result<Vec<BankDeposit>>;
}

#[derive(Clone)]
pub struct PostgresCollectionRepository {
    pool: PgPool,
}

impl PostgresCollectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const COLLECTION_COLUMNS: &str = "id, tenant_id, shop_id, originator_id, counterparty_id, \
     amount, collection_type, submitted_at, deadline_at, status, approved_by, approved_at, \
     rejection_reason";

fn map_collection(row: &PgRow) -> Result<MoneyCollection> {
    let status_raw: String = row.try_get("status")?;
    let status = ApprovalStatus::parse(&status_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown stored status: {status_raw}"))?;
    let type_raw: String = row.try_get("collection_type")?;
    let collection_type = CollectionType::parse(&type_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown collection type: {type_raw}"))?;
    Ok(MoneyCollection {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        shop_id: row.try_get("shop_id")?,
        originator_id: row.try_get("originator_id")?,
        counterparty_id: row.try_get("counterparty_id")?,
        amount: row.try_get("amount")?,
        collection_type,
        submitted_at: row.try_get("submitted_at")?,
        deadline_at: row.try_get("deadline_at")?,
        status,
        approved_by: row.try_get("approved_by")?,
        approved_at: row.try_get("approved_at")?,
        rejection_reason: row.try_get("rejection_reason")?,
    })
}

#[async_trait]
impl CollectionRepository for PostgresCollectionRepository {
    async fn create(
        &self,
        collection: &NewCollection,
        scheduler: &SchedulerHandle,
    ) -> Result<MoneyCollection> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "INSERT INTO money_collections
                 (id, tenant_id, shop_id, originator_id, counterparty_id, amount,
                  collection_type, submitted_at, deadline_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {COLLECTION_COLUMNS}"
        ))
        .bind(collection.id)
        .bind(collection.tenant_id)
        .bind(collection.shop_id)
        .bind(collection.originator_id)
        .bind(collection.counterparty_id)
        .bind(collection.amount)
        .bind(collection.collection_type.as_str())
        .bind(collection.submitted_at)
        .bind(collection.deadline_at)
        .fetch_one(&mut *tx)
        .await?;

        // Dropping the open transaction on error rolls the insert back; the
        // collection never exists without an armed timer.
        scheduler.register(collection.id, collection.deadline_at)?;

        tx.commit().await?;
        map_collection(&row)
    }

    async fn find(&self, tenant_id: Uuid, collection_id: Uuid) -> Result<Option<MoneyCollection>> {
        let row = sqlx::query(&format!(
            "SELECT {COLLECTION_COLUMNS} FROM money_collections
             WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(collection_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_collection).transpose()
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<MoneyCollection>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLLECTION_COLUMNS} FROM money_collections
             WHERE tenant_id = $1
               AND ($2::text IS NULL OR status = $2)
             ORDER BY submitted_at DESC"
        ))
        .bind(tenant_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_collection).collect()
    }

    async fn create_deposit(&self, deposit: &NewDeposit) -> Result<DepositOutcome> {
        let mut tx = self.pool.begin().await?;

        let status_raw: Option<String> = sqlx::query_scalar(
            "SELECT status FROM money_collections WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
        )
        .bind(deposit.collection_id)
        .bind(deposit.tenant_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(status_raw) = status_raw else {
            return Ok(DepositOutcome::CollectionNotFound);
        };
        let status = ApprovalStatus::parse(&status_raw)
            .ok_or_else(|| anyhow::anyhow!("unknown stored status: {status_raw}"))?;
        if status != ApprovalStatus::Approved {
            return Ok(DepositOutcome::CollectionNotApproved(status));
        }

        let deposited_at: DateTime<Utc> = sqlx::query_scalar(
            "INSERT INTO bank_deposits (id, tenant_id, collection_id, amount, bank_reference, deposited_by)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING deposited_at",
        )
        .bind(deposit.id)
        .bind(deposit.tenant_id)
        .bind(deposit.collection_id)
        .bind(deposit.amount)
        .bind(&deposit.bank_reference)
        .bind(deposit.deposited_by)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(DepositOutcome::Created(BankDeposit {
            id: deposit.id,
            tenant_id: deposit.tenant_id,
            collection_id: deposit.collection_id,
            amount: deposit.amount,
            bank_reference: deposit.bank_reference.clone(),
            deposited_by: deposit.deposited_by,
            deposited_at,
        }))
    }

    async fn list_deposits(&self, tenant_id: Uuid) -> Result<Vec<BankDeposit>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, collection_id, amount, bank_reference, deposited_by, deposited_at
             FROM bank_deposits WHERE tenant_id = $1 ORDER BY deposited_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(BankDeposit {
                    id: row.try_get("id")?,
                    tenant_id: row.try_get("tenant_id")?,
                    collection_id: row.try_get("collection_id")?,
                    amount: row.try_get("amount")?,
                    bank_reference: row.try_get("bank_reference")?,
                    deposited_by: row.try_get("deposited_by")?,
                    deposited_at: row.try_get("deposited_at")?,
                })
            })
            .collect()
    }
}
