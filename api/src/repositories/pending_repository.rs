use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Per-tenant pending-queue sizes, the dashboard's most-read derived value.
/// Reads go through the invariant cache; this repository is the recompute
/// path on a miss.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingCounts {
    pub daily_records: i64,
    pub sales: i64,
    pub sale_returns: i64,
    pub expenses: i64,
    pub money_collections: i64,
}

#[async_trait]
pub trait PendingRepository: Send + Sync {
    async fn count_pending(&self, tenant_id: Uuid) -> Result<PendingCounts>;
}

#[derive(Clone)]
pub struct PostgresPendingRepository {
    pool: PgPool,
}

impl PostgresPendingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendingRepository for PostgresPendingRepository {
    async fn count_pending(&self, tenant_id: Uuid) -> Result<PendingCounts> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM daily_sales_records WHERE tenant_id = $1 AND status = 'pending') AS daily_records,
                (SELECT COUNT(*) FROM sales WHERE tenant_id = $1 AND status = 'pending') AS sales,
                (SELECT COUNT(*) FROM sale_returns WHERE tenant_id = $1 AND status = 'pending') AS sale_returns,
                (SELECT COUNT(*) FROM expenses WHERE tenant_id = $1 AND status = 'pending') AS expenses,
                (SELECT COUNT(*) FROM money_collections WHERE tenant_id = $1 AND status = 'pending') AS money_collections",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(PendingCounts {
            daily_records: row.try_get("daily_records")?,
            sales: row.try_get("sales")?,
            sale_returns: row.try_get("sale_returns")?,
            expenses: row.try_get("expenses")?,
            money_collections: row.try_get("money_collections")?,
        })
    }
}
