//! Pure precondition checks, separated from the row-locking plumbing so they
//! can be exercised without a database.

use chrono::{DateTime, Utc};
use domain::{amounts_match, Role};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::{Actor, ApprovalAction, EngineError, EngineResult};

/// Both sum invariants on a record: items against the declared total and the
/// payment-method legs against the declared total, each within 0.01.
pub fn totals_balance(total: Decimal, item_sum: Decimal, method_sum: Decimal) -> EngineResult<()> {
    if !amounts_match(item_sum, total) {
        return Err(EngineError::Precondition {
            message: "item totals do not sum to the declared total".into(),
            details: json!({
                "declared_total": total,
                "item_sum": item_sum,
            }),
        });
    }
    if !amounts_match(method_sum, total) {
        return Err(EngineError::Precondition {
            message: "payment methods do not sum to the declared total".into(),
            details: json!({
                "declared_total": total,
                "method_sum": method_sum,
            }),
        });
    }
    Ok(())
}

pub fn remaining_returnable(sold_qty: i64, approved_returned_qty: i64) -> i64 {
    (sold_qty - approved_returned_qty).max(0)
}

pub struct CollectionGuard<'a> {
    pub now: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub originator_id: Option<Uuid>,
    pub actor: Actor,
    pub action: ApprovalAction,
    pub reason: Option<&'a str>,
}

/// Money-collection approve/reject guard: strictly before the deadline, the
/// approver holds one of the allowed roles and is not the originator, and a
/// rejection carries a reason.
pub fn collection_guard(guard: &CollectionGuard<'_>) -> EngineResult<()> {
    if guard.now >= guard.deadline_at {
        return Err(EngineError::DeadlineExceeded);
    }

    let Actor::User { id, role } = guard.actor else {
        return Err(EngineError::Precondition {
            message: "collections require a user actor".into(),
            details: json!({}),
        });
    };

    if !matches!(role, Role::Manager | Role::Admin | Role::Executive) {
        return Err(EngineError::Precondition {
            message: "approver role is not allowed for collections".into(),
            details: json!({ "role": role.as_str() }),
        });
    }

    if guard.originator_id == Some(id) {
        return Err(EngineError::Precondition {
            message: "originator cannot decide their own collection".into(),
            details: json!({}),
        });
    }

    if guard.action == ApprovalAction::Reject
        && guard.reason.map_or(true, |reason| reason.trim().is_empty())
    {
        return Err(EngineError::Precondition {
            message: "rejection requires a reason".into(),
            details: json!({ "reason": ["must not be empty"] }),
        });
    }

    Ok(())
}
