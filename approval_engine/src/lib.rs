//! Shared approval lifecycle for daily sales records, sales, sale returns,
//! expenses, and money collections. Every status mutation in the system goes
//! through [`ApprovalEngine::transition`], which locks the target row, checks
//! the per-entity preconditions, and writes the terminal state atomically
//! with its side effects.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{ApprovalStatus, EntityKind, Role};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

mod preconditions;

pub use preconditions::{collection_guard, remaining_returnable, totals_balance, CollectionGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalAction {
    Approve,
    Reject,
    Expire,
}

impl ApprovalAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalAction::Approve => "approve",
            ApprovalAction::Reject => "reject",
            ApprovalAction::Expire => "expire",
        }
    }

    fn terminal_status(self) -> ApprovalStatus {
        match self {
            ApprovalAction::Approve => ApprovalStatus::Approved,
            ApprovalAction::Reject => ApprovalStatus::Rejected,
            ApprovalAction::Expire => ApprovalStatus::Expired,
        }
    }
}

/// Who is driving the transition. The deadline scheduler fires with the
/// system actor; every HTTP-originated transition carries a user.
#[derive(Debug, Clone, Copy)]
pub enum Actor {
    User { id: Uuid, role: Role },
    System,
}

impl Actor {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Actor::User { id, .. } => Some(*id),
            Actor::System => None,
        }
    }
}

/// The columns every lifecycle entity shares, as read back after the
/// transition (or unchanged, for an idempotent repeat).
#[derive(Debug, Clone)]
pub struct EntityHead {
    pub id: Uuid,
    pub kind: EntityKind,
    pub tenant_id: Uuid,
    pub status: ApprovalStatus,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug)]
pub enum TransitionOutcome {
    Applied(EntityHead),
    /// The entity already sits in the state this action produces; the stored
    /// approver and timestamp are untouched.
    NotModified(EntityHead),
}

impl TransitionOutcome {
    pub fn head(&self) -> &EntityHead {
        match self {
            TransitionOutcome::Applied(head) | TransitionOutcome::NotModified(head) => head,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("entity not found")]
    NotFound,
    #[error("entity is {current:?}, cannot {action}")]
    InvalidStateTransition {
        current: ApprovalStatus,
        action: &'static str,
    },
    #[error("collection deadline has passed")]
    DeadlineExceeded,
    #[error("{message}")]
    Precondition {
        message: String,
        details: serde_json::Value,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Seam to the deadline scheduler: collections cancel their timer inside the
/// approve/reject transition. Registration happens at creation time, outside
/// this crate.
#[async_trait]
pub trait DeadlineTimers: Send + Sync {
    async fn cancel(&self, entity_id: Uuid);
}

/// Timers for contexts without a scheduler (tests, offline tools).
#[derive(Clone, Default)]
pub struct NoopTimers;

#[async_trait]
impl DeadlineTimers for NoopTimers {
    async fn cancel(&self, _entity_id: Uuid) {}
}

/// Seam to the invariant cache: every committed transition invalidates the
/// touched (tenant, kind) pair.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, tenant_id: Uuid, kind: EntityKind);
}

#[derive(Clone, Default)]
pub struct NoopInvalidator;

#[async_trait]
impl CacheInvalidator for NoopInvalidator {
    async fn invalidate(&self, _tenant_id: Uuid, _kind: EntityKind) {}
}

pub struct ApprovalEngine {
    pool: PgPool,
    timers: Arc<dyn DeadlineTimers>,
    invalidator: Arc<dyn CacheInvalidator>,
}

struct LockedRow {
    tenant_id: Uuid,
    status: ApprovalStatus,
    approved_by: Option<Uuid>,
    approved_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    // money_collection only
    originator_id: Option<Uuid>,
    deadline_at: Option<DateTime<Utc>>,
}

impl ApprovalEngine {
    pub fn new(
        pool: PgPool,
        timers: Arc<dyn DeadlineTimers>,
        invalidator: Arc<dyn CacheInvalidator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            timers,
            invalidator,
        })
    }

    /// Runs one transition. `tenant_id` is `None` only for the system actor,
    /// whose expirations are keyed by entity id alone.
    pub async fn transition(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        tenant_id: Option<Uuid>,
        actor: Actor,
        action: ApprovalAction,
        reason: Option<&str>,
    ) -> EngineResult<TransitionOutcome> {
        if action == ApprovalAction::Expire && kind != EntityKind::MoneyCollection {
            return Err(EngineError::InvalidStateTransition {
                current: ApprovalStatus::Pending,
                action: "expire",
            });
        }

        let mut tx = self.pool.begin().await?;
        let row = lock_row(&mut tx, kind, entity_id, tenant_id).await?;
        let Some(row) = row else {
            return Err(EngineError::NotFound);
        };

        let now = Utc::now();

        if row.status.is_terminal() {
            // Repeating the action that produced the current state is a no-op;
            // anything else is a transition out of a terminal state.
            if row.status == action.terminal_status() {
                return Ok(TransitionOutcome::NotModified(EntityHead {
                    id: entity_id,
                    kind,
                    tenant_id: row.tenant_id,
                    status: row.status,
                    approved_by: row.approved_by,
                    approved_at: row.approved_at,
                    rejection_reason: row.rejection_reason,
                }));
            }
            return Err(EngineError::InvalidStateTransition {
                current: row.status,
                action: action.as_str(),
            });
        }

        self.check_preconditions(&mut tx, kind, entity_id, &row, actor, action, reason, now)
            .await?;

        let head = apply_transition(&mut tx, kind, entity_id, row.tenant_id, actor, action, reason, now)
            .await?;

        if kind == EntityKind::SaleReturn && action == ApprovalAction::Approve {
            settle_approved_return(&mut tx, entity_id).await?;
        }

        if kind == EntityKind::MoneyCollection
            && matches!(action, ApprovalAction::Approve | ApprovalAction::Reject)
        {
            self.timers.cancel(entity_id).await;
        }

        tx.commit().await?;

        info!(
            kind = kind.as_str(),
            entity = %entity_id,
            action = action.as_str(),
            "transition applied"
        );
        self.invalidator.invalidate(head.tenant_id, kind).await;

        Ok(TransitionOutcome::Applied(head))
    }

    #[allow(clippy::too_many_arguments)]
    async fn check_preconditions(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        kind: EntityKind,
        entity_id: Uuid,
        row: &LockedRow,
        actor: Actor,
        action: ApprovalAction,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        match (kind, action) {
            (EntityKind::DailyRecord, ApprovalAction::Approve) => {
                check_daily_record_totals(tx, entity_id).await
            }
            (EntityKind::Sale, ApprovalAction::Approve) => check_sale_totals(tx, entity_id).await,
            (EntityKind::SaleReturn, ApprovalAction::Approve) => {
                check_return_lines(tx, entity_id).await
            }
            (EntityKind::MoneyCollection, ApprovalAction::Approve)
            | (EntityKind::MoneyCollection, ApprovalAction::Reject) => {
                let deadline_at = row
                    .deadline_at
                    .ok_or_else(|| EngineError::Precondition {
                        message: "collection has no deadline".into(),
                        details: json!({}),
                    })?;
                let guard = CollectionGuard {
                    now,
                    deadline_at,
                    originator_id: row.originator_id,
                    actor,
                    action,
                    reason,
                };
                collection_guard(&guard)
            }
            (EntityKind::MoneyCollection, ApprovalAction::Expire) => {
                // Backwards clock jumps must not expire early; the scheduler
                // re-queues when this fails.
                let deadline_at = row.deadline_at.unwrap_or(now);
                if now < deadline_at {
                    return Err(EngineError::Precondition {
                        message: "deadline has not been reached".into(),
                        details: json!({ "deadline_at": deadline_at }),
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

async fn lock_row(
    tx: &mut Transaction<'_, Postgres>,
    kind: EntityKind,
    entity_id: Uuid,
    tenant_id: Option<Uuid>,
) -> EngineResult<Option<LockedRow>> {
    let sql = match kind {
        EntityKind::DailyRecord => {
            "SELECT tenant_id, status, approved_by, approved_at, rejection_reason,
                    NULL::uuid AS originator_id, NULL::timestamptz AS deadline_at
             FROM daily_sales_records WHERE id = $1 AND ($2::uuid IS NULL OR tenant_id = $2)
             FOR UPDATE"
        }
        EntityKind::Sale => {
            "SELECT tenant_id, status, approved_by, approved_at, rejection_reason,
                    NULL::uuid AS originator_id, NULL::timestamptz AS deadline_at
             FROM sales WHERE id = $1 AND ($2::uuid IS NULL OR tenant_id = $2)
             FOR UPDATE"
        }
        EntityKind::SaleReturn => {
            "SELECT tenant_id, status, approved_by, approved_at, rejection_reason,
                    NULL::uuid AS originator_id, NULL::timestamptz AS deadline_at
             FROM sale_returns WHERE id = $1 AND ($2::uuid IS NULL OR tenant_id = $2)
             FOR UPDATE"
        }
        EntityKind::Expense => {
            "SELECT tenant_id, status, approved_by, approved_at, rejection_reason,
                    NULL::uuid AS originator_id, NULL::timestamptz AS deadline_at
             FROM expenses WHERE id = $1 AND ($2::uuid IS NULL OR tenant_id = $2)
             FOR UPDATE"
        }
        EntityKind::MoneyCollection => {
            "SELECT tenant_id, status, approved_by, approved_at, rejection_reason,
                    originator_id, deadline_at
             FROM money_collections WHERE id = $1 AND ($2::uuid IS NULL OR tenant_id = $2)
             FOR UPDATE"
        }
    };

    let row = sqlx::query(sql)
        .bind(entity_id)
        .bind(tenant_id)
        .fetch_optional(&mut **tx)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status_raw: String = row.try_get("status")?;
    let status = ApprovalStatus::parse(&status_raw).ok_or_else(|| {
        warn!(status = %status_raw, "unknown status string in storage");
        sqlx::Error::Decode(format!("unknown status: {status_raw}").into())
    })?;

    Ok(Some(LockedRow {
        tenant_id: row.try_get("tenant_id")?,
        status,
        approved_by: row.try_get("approved_by")?,
        approved_at: row.try_get("approved_at")?,
        rejection_reason: row.try_get("rejection_reason")?,
        originator_id: row.try_get("originator_id")?,
        deadline_at: row.try_get("deadline_at")?,
    }))
}

#[allow(clippy::too_many_arguments)]
async fn apply_transition(
    tx: &mut Transaction<'_, Postgres>,
    kind: EntityKind,
    entity_id: Uuid,
    tenant_id: Uuid,
    actor: Actor,
    action: ApprovalAction,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> EngineResult<EntityHead> {
    let table = table_for(kind);
    let status = action.terminal_status();

    let (approved_by, approved_at, rejection_reason) = match action {
        ApprovalAction::Approve => (actor.user_id(), Some(now), None),
        ApprovalAction::Reject => (actor.user_id(), Some(now), reason.map(str::to_string)),
        // Expiry is system-driven; no approver is recorded.
        ApprovalAction::Expire => (None, None, None),
    };

    let sql = format!(
        "UPDATE {table}
         SET status = $2, approved_by = $3, approved_at = $4, rejection_reason = $5
         WHERE id = $1"
    );
    sqlx::query(&sql)
        .bind(entity_id)
        .bind(status.as_str())
        .bind(approved_by)
        .bind(approved_at)
        .bind(&rejection_reason)
        .execute(&mut **tx)
        .await?;

    Ok(EntityHead {
        id: entity_id,
        kind,
        tenant_id,
        status,
        approved_by,
        approved_at,
        rejection_reason,
    })
}

fn table_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::DailyRecord => "daily_sales_records",
        EntityKind::Sale => "sales",
        EntityKind::SaleReturn => "sale_returns",
        EntityKind::Expense => "expenses",
        EntityKind::MoneyCollection => "money_collections",
    }
}

async fn check_daily_record_totals(
    tx: &mut Transaction<'_, Postgres>,
    record_id: Uuid,
) -> EngineResult<()> {
    let row = sqlx::query(
        "SELECT r.total_sales_amount,
                r.cash_amount + r.card_amount + r.upi_amount + r.credit_amount AS method_sum,
                COALESCE((SELECT SUM(total_amount) FROM daily_sales_items WHERE record_id = r.id), 0) AS item_sum
         FROM daily_sales_records r WHERE r.id = $1",
    )
    .bind(record_id)
    .fetch_one(&mut **tx)
    .await?;

    let total: Decimal = row.try_get("total_sales_amount")?;
    let method_sum: Decimal = row.try_get("method_sum")?;
    let item_sum: Decimal = row.try_get("item_sum")?;

    totals_balance(total, item_sum, method_sum)
}

async fn check_sale_totals(tx: &mut Transaction<'_, Postgres>, sale_id: Uuid) -> EngineResult<()> {
    let row = sqlx::query(
        "SELECT s.total_amount,
                s.cash_amount + s.card_amount + s.upi_amount + s.credit_amount AS method_sum,
                COALESCE((SELECT SUM(total_amount) FROM sale_items WHERE sale_id = s.id), 0) AS item_sum
         FROM sales s WHERE s.id = $1",
    )
    .bind(sale_id)
    .fetch_one(&mut **tx)
    .await?;

    let total: Decimal = row.try_get("total_amount")?;
    let method_sum: Decimal = row.try_get("method_sum")?;
    let item_sum: Decimal = row.try_get("item_sum")?;

    totals_balance(total, item_sum, method_sum)
}

/// Return approval preconditions: the parent sale is approved, every line is
/// positive, and no line exceeds what is still returnable on its sale line
/// (sold minus previously approved returns).
async fn check_return_lines(
    tx: &mut Transaction<'_, Postgres>,
    return_id: Uuid,
) -> EngineResult<()> {
    let sale_status: Option<String> = sqlx::query_scalar(
        "SELECT s.status FROM sales s JOIN sale_returns r ON r.sale_id = s.id WHERE r.id = $1",
    )
    .bind(return_id)
    .fetch_optional(&mut **tx)
    .await?;

    match sale_status.as_deref().and_then(ApprovalStatus::parse) {
        Some(ApprovalStatus::Approved) => {}
        _ => {
            return Err(EngineError::Precondition {
                message: "parent sale is not approved".into(),
                details: json!({}),
            })
        }
    }

    let lines = sqlx::query(
        "SELECT ri.sale_item_id,
                ri.quantity AS return_qty,
                si.quantity AS sold_qty,
                COALESCE((
                    SELECT SUM(pri.quantity)
                    FROM sale_return_items pri
                    JOIN sale_returns pr ON pr.id = pri.return_id
                    WHERE pri.sale_item_id = ri.sale_item_id
                      AND pr.status = 'approved'
                      AND pr.id <> $1
                ), 0)::bigint AS returned_qty
         FROM sale_return_items ri
         JOIN sale_items si ON si.id = ri.sale_item_id
         WHERE ri.return_id = $1",
    )
    .bind(return_id)
    .fetch_all(&mut **tx)
    .await?;

    if lines.is_empty() {
        return Err(EngineError::Precondition {
            message: "return has no lines".into(),
            details: json!({}),
        });
    }

    for line in lines {
        let sale_item_id: Uuid = line.try_get("sale_item_id")?;
        let return_qty: i64 = line.try_get("return_qty")?;
        let sold_qty: i64 = line.try_get("sold_qty")?;
        let returned_qty: i64 = line.try_get("returned_qty")?;

        if return_qty <= 0 {
            return Err(EngineError::Precondition {
                message: "return quantities must be positive".into(),
                details: json!({ "sale_item_id": sale_item_id }),
            });
        }

        let remaining = remaining_returnable(sold_qty, returned_qty);
        if return_qty > remaining {
            return Err(EngineError::Precondition {
                message: "return exceeds remaining returnable quantity".into(),
                details: json!({
                    "sale_item_id": sale_item_id,
                    "requested": return_qty,
                    "remaining_returnable": remaining,
                }),
            });
        }
    }

    Ok(())
}

/// Side effects of an approved return: returned stock goes back to the shop
/// and the sale's outstanding due shrinks by the refund.
async fn settle_approved_return(
    tx: &mut Transaction<'_, Postgres>,
    return_id: Uuid,
) -> EngineResult<()> {
    sqlx::query(
        "UPDATE stock_levels sl
         SET quantity = sl.quantity + ri.quantity, updated_at = NOW()
         FROM sale_return_items ri
         JOIN sale_items si ON si.id = ri.sale_item_id
         JOIN sales s ON s.id = si.sale_id
         WHERE ri.return_id = $1
           AND sl.product_id = si.product_id
           AND sl.shop_id = s.shop_id",
    )
    .bind(return_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "UPDATE sales s
         SET due_amount = GREATEST(s.due_amount - r.total_refund, 0)
         FROM sale_returns r
         WHERE r.id = $1 AND s.id = r.sale_id",
    )
    .bind(return_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
