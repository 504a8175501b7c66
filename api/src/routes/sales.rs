use approval_engine::{Actor, ApprovalAction, TransitionOutcome};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use domain::{
    ApprovalStatus, DailySalesRecord, EntityKind, PaymentBreakdown, Role, Sale, SaleReturn,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth_middleware::CurrentUser,
    error::{ApiError, ApiResult},
    repositories::{NewDailyItem, NewDailyRecord, NewReturn, NewReturnItem, NewSale, NewSaleItem},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/sales/daily-records",
            get(list_daily_records).post(create_daily_record),
        )
        .route("/sales/daily-records/:record_id", put(update_daily_record))
        .route(
            "/sales/daily-records/:record_id/approve",
            post(approve_daily_record),
        )
        .route(
            "/sales/daily-records/:record_id/reject",
            post(reject_daily_record),
        )
        .route("/sales/sales", get(list_sales).post(create_sale))
        .route("/sales/sales/:sale_id/approve", post(approve_sale))
        .route("/sales/sales/:sale_id/reject", post(reject_sale))
        .route("/sales/returns", get(list_returns).post(create_return))
        .route("/sales/returns/:return_id/approve", post(approve_return))
        .route("/sales/returns/:return_id/reject", post(reject_return))
        .route("/sales/pending/daily-records", get(pending_daily_records))
        .route("/sales/pending/sales", get(pending_sales))
        .route("/sales/pending/returns", get(pending_returns))
}

#[derive(Debug, Deserialize)]
pub struct PaymentsPayload {
    cash: Decimal,
    card: Decimal,
    upi: Decimal,
    credit: Decimal,
}

impl PaymentsPayload {
    fn into_breakdown(self) -> ApiResult<PaymentBreakdown> {
        let payments = PaymentBreakdown {
            cash: self.cash,
            card: self.card,
            upi: self.upi,
            credit: self.credit,
        };
        if payments.any_negative() {
            return Err(ApiError::validation(
                "payments",
                "amounts must be non-negative",
            ));
        }
        Ok(payments)
    }
}

#[derive(Debug, Deserialize)]
struct ItemPayload {
    product_id: Uuid,
    quantity: i64,
    unit_price: Decimal,
    total_amount: Decimal,
}

fn validate_items(items: &[ItemPayload]) -> ApiResult<()> {
    if items.is_empty() {
        return Err(ApiError::validation("items", "must not be empty"));
    }
    for item in items {
        if item.quantity <= 0 {
            return Err(ApiError::validation("items", "quantities must be positive"));
        }
        if item.unit_price < Decimal::ZERO || item.total_amount < Decimal::ZERO {
            return Err(ApiError::validation("items", "amounts must be non-negative"));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RejectPayload {
    reason: String,
}

/// Wraps a record with the idempotency indicator for repeated terminal
/// actions.
#[derive(Serialize)]
struct TransitionResponse<T: Serialize> {
    #[serde(flatten)]
    record: T,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    not_modified: bool,
}

fn transition_response<T: Serialize>(outcome: &TransitionOutcome, record: T) -> TransitionResponse<T> {
    TransitionResponse {
        record,
        not_modified: matches!(outcome, TransitionOutcome::NotModified(_)),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    shop_id: Option<Uuid>,
    status: Option<String>,
    sale_id: Option<Uuid>,
}

fn parse_status(raw: &Option<String>) -> ApiResult<Option<ApprovalStatus>> {
    match raw.as_deref() {
        None => Ok(None),
        Some(raw) => ApprovalStatus::parse(raw)
            .map(Some)
            .ok_or_else(|| ApiError::validation("status", "unknown status")),
    }
}

// ---- daily records ----

#[derive(Debug, Deserialize)]
struct CreateDailyRecordPayload {
    shop_id: Uuid,
    salesman_id: Option<Uuid>,
    record_date: NaiveDate,
    payments: PaymentsPayload,
    total_sales_amount: Decimal,
    items: Vec<ItemPayload>,
}

async fn create_daily_record(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateDailyRecordPayload>,
) -> ApiResult<(StatusCode, Json<DailySalesRecord>)> {
    user.ensure_at_least(Role::Salesman)?;
    validate_items(&payload.items)?;
    if payload.total_sales_amount < Decimal::ZERO {
        return Err(ApiError::validation(
            "total_sales_amount",
            "must be non-negative",
        ));
    }
    let payments = payload.payments.into_breakdown()?;

    // The shop lookup doubles as the tenant check.
    state
        .shop_repo
        .find(user.tenant_id, payload.shop_id)
        .await?
        .ok_or_else(|| ApiError::not_found("shop"))?;

    let record = state
        .daily_record_repo
        .create(&NewDailyRecord {
            id: Uuid::new_v4(),
            tenant_id: user.tenant_id,
            shop_id: payload.shop_id,
            salesman_id: payload.salesman_id.unwrap_or(user.user_id),
            record_date: payload.record_date,
            payments,
            total_sales_amount: payload.total_sales_amount,
            created_by: user.user_id,
            items: payload
                .items
                .iter()
                .map(|item| NewDailyItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    total_amount: item.total_amount,
                })
                .collect(),
        })
        .await?;

    state
        .cache
        .invalidate_kind(user.tenant_id, EntityKind::DailyRecord)
        .await;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_daily_records(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<DailySalesRecord>>> {
    let status = parse_status(&query.status)?;
    let records = state
        .daily_record_repo
        .list(user.tenant_id, query.shop_id, status)
        .await?;
    Ok(Json(records))
}

#[derive(Debug, Deserialize)]
struct UpdateDailyRecordPayload {
    payments: PaymentsPayload,
    total_sales_amount: Decimal,
    items: Vec<ItemPayload>,
}

/// Item lines may be replaced while the record is still pending; terminal
/// records are immutable.
async fn update_daily_record(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(record_id): Path<Uuid>,
    Json(payload): Json<UpdateDailyRecordPayload>,
) -> ApiResult<Json<DailySalesRecord>> {
    user.ensure_at_least(Role::Salesman)?;
    validate_items(&payload.items)?;
    let payments = payload.payments.into_breakdown()?;

    let existing = state
        .daily_record_repo
        .find(user.tenant_id, record_id)
        .await?
        .ok_or_else(|| ApiError::not_found("daily record"))?;
    if existing.status != ApprovalStatus::Pending {
        return Err(ApiError::new(
            domain::ErrorKind::InvalidStateTransition,
            "only pending records can be edited",
        ));
    }

    let items: Vec<NewDailyItem> = payload
        .items
        .iter()
        .map(|item| NewDailyItem {
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_amount: item.total_amount,
        })
        .collect();

    let replaced = state
        .daily_record_repo
        .replace_items(
            user.tenant_id,
            record_id,
            payments,
            payload.total_sales_amount,
            &items,
        )
        .await?;
    if !replaced {
        // Lost the race against a concurrent transition.
        return Err(ApiError::new(
            domain::ErrorKind::InvalidStateTransition,
            "only pending records can be edited",
        ));
    }

    let record = state
        .daily_record_repo
        .find(user.tenant_id, record_id)
        .await?
        .ok_or_else(|| ApiError::not_found("daily record"))?;
    Ok(Json(record))
}

async fn approve_daily_record(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(record_id): Path<Uuid>,
) -> ApiResult<Json<TransitionResponse<DailySalesRecord>>> {
    user.ensure_at_least(Role::Manager)?;
    let outcome = state
        .engine
        .transition(
            EntityKind::DailyRecord,
            record_id,
            Some(user.tenant_id),
            Actor::User {
                id: user.user_id,
                role: user.role,
            },
            ApprovalAction::Approve,
            None,
        )
        .await?;

    let record = state
        .daily_record_repo
        .find(user.tenant_id, record_id)
        .await?
        .ok_or_else(|| ApiError::not_found("daily record"))?;
    Ok(Json(transition_response(&outcome, record)))
}

async fn reject_daily_record(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(record_id): Path<Uuid>,
    Json(payload): Json<RejectPayload>,
) -> ApiResult<Json<TransitionResponse<DailySalesRecord>>> {
    user.ensure_at_least(Role::Manager)?;
    if payload.reason.trim().is_empty() {
        return Err(ApiError::validation("reason", "must not be empty"));
    }
    let outcome = state
        .engine
        .transition(
            EntityKind::DailyRecord,
            record_id,
            Some(user.tenant_id),
            Actor::User {
                id: user.user_id,
                role: user.role,
            },
            ApprovalAction::Reject,
            Some(payload.reason.trim()),
        )
        .await?;

    let record = state
        .daily_record_repo
        .find(user.tenant_id, record_id)
        .await?
        .ok_or_else(|| ApiError::not_found("daily record"))?;
    Ok(Json(transition_response(&outcome, record)))
}

// ---- sales ----

#[derive(Debug, Deserialize)]
struct CreateSalePayload {
    shop_id: Uuid,
    customer_name: Option<String>,
    payments: PaymentsPayload,
    total_amount: Decimal,
    paid_amount: Decimal,
    items: Vec<ItemPayload>,
}

async fn create_sale(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateSalePayload>,
) -> ApiResult<(StatusCode, Json<Sale>)> {
    user.ensure_at_least(Role::Salesman)?;
    validate_items(&payload.items)?;
    if payload.total_amount < Decimal::ZERO {
        return Err(ApiError::validation("total_amount", "must be non-negative"));
    }
    if payload.paid_amount < Decimal::ZERO || payload.paid_amount > payload.total_amount {
        return Err(ApiError::validation(
            "paid_amount",
            "must be between 0 and total_amount",
        ));
    }
    let payments = payload.payments.into_breakdown()?;

    state
        .shop_repo
        .find(user.tenant_id, payload.shop_id)
        .await?
        .ok_or_else(|| ApiError::not_found("shop"))?;

    let sale = state
        .sale_repo
        .create(&NewSale {
            id: Uuid::new_v4(),
            tenant_id: user.tenant_id,
            shop_id: payload.shop_id,
            customer_name: payload.customer_name,
            payments,
            total_amount: payload.total_amount,
            paid_amount: payload.paid_amount,
            due_amount: payload.total_amount - payload.paid_amount,
            created_by: user.user_id,
            items: payload
                .items
                .iter()
                .map(|item| NewSaleItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    total_amount: item.total_amount,
                })
                .collect(),
        })
        .await?;

    state
        .cache
        .invalidate_kind(user.tenant_id, EntityKind::Sale)
        .await;
    Ok((StatusCode::CREATED, Json(sale)))
}

async fn list_sales(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Sale>>> {
    let status = parse_status(&query.status)?;
    let sales = state
        .sale_repo
        .list(user.tenant_id, query.shop_id, status)
        .await?;
    Ok(Json(sales))
}

async fn approve_sale(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(sale_id): Path<Uuid>,
) -> ApiResult<Json<TransitionResponse<Sale>>> {
    user.ensure_at_least(Role::Manager)?;
    let outcome = state
        .engine
        .transition(
            EntityKind::Sale,
            sale_id,
            Some(user.tenant_id),
            Actor::User {
                id: user.user_id,
                role: user.role,
            },
            ApprovalAction::Approve,
            None,
        )
        .await?;

    let sale = state
        .sale_repo
        .find(user.tenant_id, sale_id)
        .await?
        .ok_or_else(|| ApiError::not_found("sale"))?;
    Ok(Json(transition_response(&outcome, sale)))
}

async fn reject_sale(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(sale_id): Path<Uuid>,
    Json(payload): Json<RejectPayload>,
) -> ApiResult<Json<TransitionResponse<Sale>>> {
    user.ensure_at_least(Role::Manager)?;
    if payload.reason.trim().is_empty() {
        return Err(ApiError::validation("reason", "must not be empty"));
    }
    let outcome = state
        .engine
        .transition(
            EntityKind::Sale,
            sale_id,
            Some(user.tenant_id),
            Actor::User {
                id: user.user_id,
                role: user.role,
            },
            ApprovalAction::Reject,
            Some(payload.reason.trim()),
        )
        .await?;

    let sale = state
        .sale_repo
        .find(user.tenant_id, sale_id)
        .await?
        .ok_or_else(|| ApiError::not_found("sale"))?;
    Ok(Json(transition_response(&outcome, sale)))
}

// ---- returns ----

#[derive(Debug, Deserialize)]
struct ReturnItemPayload {
    sale_item_id: Uuid,
    quantity: i64,
    refund_amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct CreateReturnPayload {
    sale_id: Uuid,
    reason: Option<String>,
    items: Vec<ReturnItemPayload>,
}

async fn create_return(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateReturnPayload>,
) -> ApiResult<(StatusCode, Json<SaleReturn>)> {
    user.ensure_at_least(Role::Salesman)?;
    if payload.items.is_empty() {
        return Err(ApiError::validation("items", "must not be empty"));
    }
    for item in &payload.items {
        if item.quantity <= 0 {
            return Err(ApiError::validation("items", "quantities must be positive"));
        }
        if item.refund_amount < Decimal::ZERO {
            return Err(ApiError::validation(
                "items",
                "refund amounts must be non-negative",
            ));
        }
    }

    // Returns hang off a sale in the caller's tenant; the line references are
    // re-validated against remaining quantities at approval time.
    let sale = state
        .sale_repo
        .find(user.tenant_id, payload.sale_id)
        .await?
        .ok_or_else(|| ApiError::not_found("sale"))?;
    for item in &payload.items {
        if !sale.items.iter().any(|line| line.id == item.sale_item_id) {
            return Err(ApiError::validation(
                "items",
                "sale_item_id does not belong to the sale",
            ));
        }
    }

    let total_refund: Decimal = payload.items.iter().map(|item| item.refund_amount).sum();
    let ret = state
        .return_repo
        .create(&NewReturn {
            id: Uuid::new_v4(),
            tenant_id: user.tenant_id,
            sale_id: payload.sale_id,
            reason: payload.reason,
            total_refund,
            created_by: user.user_id,
            items: payload
                .items
                .iter()
                .map(|item| NewReturnItem {
                    sale_item_id: item.sale_item_id,
                    quantity: item.quantity,
                    refund_amount: item.refund_amount,
                })
                .collect(),
        })
        .await?;

    state
        .cache
        .invalidate_kind(user.tenant_id, EntityKind::SaleReturn)
        .await;
    Ok((StatusCode::CREATED, Json(ret)))
}

async fn list_returns(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<SaleReturn>>> {
    let status = parse_status(&query.status)?;
    let returns = state
        .return_repo
        .list(user.tenant_id, query.sale_id, status)
        .await?;
    Ok(Json(returns))
}

async fn approve_return(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(return_id): Path<Uuid>,
) -> ApiResult<Json<TransitionResponse<SaleReturn>>> {
    user.ensure_at_least(Role::Manager)?;
    let outcome = state
        .engine
        .transition(
            EntityKind::SaleReturn,
            return_id,
            Some(user.tenant_id),
            Actor::User {
                id: user.user_id,
                role: user.role,
            },
            ApprovalAction::Approve,
            None,
        )
        .await?;

    let ret = state
        .return_repo
        .find(user.tenant_id, return_id)
        .await?
        .ok_or_else(|| ApiError::not_found("return"))?;
    Ok(Json(transition_response(&outcome, ret)))
}

async fn reject_return(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(return_id): Path<Uuid>,
    Json(payload): Json<RejectPayload>,
) -> ApiResult<Json<TransitionResponse<SaleReturn>>> {
    user.ensure_at_least(Role::Manager)?;
    if payload.reason.trim().is_empty() {
        return Err(ApiError::validation("reason", "must not be empty"));
    }
    let outcome = state
        .engine
        .transition(
            EntityKind::SaleReturn,
            return_id,
            Some(user.tenant_id),
            Actor::User {
                id: user.user_id,
                role: user.role,
            },
            ApprovalAction::Reject,
            Some(payload.reason.trim()),
        )
        .await?;

    let ret = state
        .return_repo
        .find(user.tenant_id, return_id)
        .await?
        .ok_or_else(|| ApiError::not_found("return"))?;
    Ok(Json(transition_response(&outcome, ret)))
}

// ---- pending queues ----

async fn pending_daily_records(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<DailySalesRecord>>> {
    user.ensure_at_least(Role::Manager)?;
    let records = state
        .daily_record_repo
        .list(user.tenant_id, None, Some(ApprovalStatus::Pending))
        .await?;
    Ok(Json(records))
}

async fn pending_sales(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<Sale>>> {
    user.ensure_at_least(Role::Manager)?;
    let sales = state
        .sale_repo
        .list(user.tenant_id, None, Some(ApprovalStatus::Pending))
        .await?;
    Ok(Json(sales))
}

async fn pending_returns(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<SaleReturn>>> {
    user.ensure_at_least(Role::Manager)?;
    let returns = state
        .return_repo
        .list(user.tenant_id, None, Some(ApprovalStatus::Pending))
        .await?;
    Ok(Json(returns))
}
