use approval_engine::{Actor, ApprovalAction, TransitionOutcome};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use domain::{
    ApprovalStatus, BankDeposit, CollectionResponse, CollectionType, EntityKind, Expense,
    MoneyCollection, Role,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth_middleware::CurrentUser,
    error::{ApiError, ApiResult},
    repositories::{DepositOutcome, NewCollection, NewDeposit, NewExpense},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/finance/money-collection",
            get(list_collections).post(create_collection),
        )
        .route("/finance/money-collection/:collection_id", get(get_collection))
        .route(
            "/finance/money-collection/:collection_id/approve",
            post(approve_collection),
        )
        .route(
            "/finance/money-collection/:collection_id/reject",
            post(reject_collection),
        )
        .route("/finance/deposits", get(list_deposits).post(create_deposit))
        .route("/finance/expenses", get(list_expenses).post(create_expense))
        .route("/finance/expenses/:expense_id/approve", post(approve_expense))
        .route("/finance/expenses/:expense_id/reject", post(reject_expense))
}

const COLLECTION_APPROVER_ROLES: &[Role] = &[Role::Manager, Role::Admin, Role::Executive];

fn collection_window_secs(collection: &MoneyCollection) -> i64 {
    (collection.deadline_at - collection.submitted_at).num_seconds()
}

fn respond(collection: MoneyCollection) -> CollectionResponse {
    let window = collection_window_secs(&collection);
    CollectionResponse::at(collection, Utc::now(), window)
}

#[derive(Debug, Deserialize)]
struct CreateCollectionPayload {
    shop_id: Uuid,
    counterparty_id: Uuid,
    amount: Decimal,
    collection_type: String,
}

/// Creates the pending collection and arms its deadline timer atomically.
/// The response carries the wall-clock budget the client must act within.
async fn create_collection(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateCollectionPayload>,
) -> ApiResult<(StatusCode, Json<CollectionResponse>)> {
    user.ensure_at_least(Role::AssistantManager)?;

    if payload.amount <= Decimal::ZERO {
        return Err(ApiError::validation("amount", "must be positive"));
    }
    let collection_type = CollectionType::parse(&payload.collection_type)
        .ok_or_else(|| ApiError::validation("collection_type", "unknown collection type"))?;

    state
        .shop_repo
        .find(user.tenant_id, payload.shop_id)
        .await?
        .ok_or_else(|| ApiError::not_found("shop"))?;

    // The counterparty is the user expected to decide the collection, so it
    // must hold a deciding role and differ from the originator.
    let counterparty = state
        .user_repo
        .find(user.tenant_id, payload.counterparty_id)
        .await?
        .ok_or_else(|| ApiError::not_found("counterparty"))?;
    if !COLLECTION_APPROVER_ROLES.contains(&counterparty.role) {
        return Err(ApiError::validation(
            "counterparty_id",
            "must hold an executive, manager, or admin role",
        ));
    }
    if counterparty.id == user.user_id {
        return Err(ApiError::validation(
            "counterparty_id",
            "must differ from the originator",
        ));
    }

    let submitted_at = Utc::now();
    let window = ChronoDuration::from_std(state.config.collection_deadline)
        .unwrap_or_else(|_| ChronoDuration::minutes(15));
    let collection = state
        .collection_repo
        .create(
            &NewCollection {
                id: Uuid::new_v4(),
                tenant_id: user.tenant_id,
                shop_id: payload.shop_id,
                originator_id: user.user_id,
                counterparty_id: payload.counterparty_id,
                amount: payload.amount,
                collection_type,
                submitted_at,
                deadline_at: submitted_at + window,
            },
            &state.scheduler,
        )
        .await?;

    state
        .cache
        .invalidate_kind(user.tenant_id, EntityKind::MoneyCollection)
        .await;
    Ok((StatusCode::CREATED, Json(respond(collection))))
}

#[derive(Debug, Deserialize)]
struct CollectionQuery {
    status: Option<String>,
}

async fn list_collections(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<CollectionQuery>,
) -> ApiResult<Json<Vec<CollectionResponse>>> {
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(
            ApprovalStatus::parse(raw)
                .ok_or_else(|| ApiError::validation("status", "unknown status"))?,
        ),
    };
    let collections = state.collection_repo.list(user.tenant_id, status).await?;
    Ok(Json(collections.into_iter().map(respond).collect()))
}

async fn get_collection(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(collection_id): Path<Uuid>,
) -> ApiResult<Json<CollectionResponse>> {
    let collection = state
        .collection_repo
        .find(user.tenant_id, collection_id)
        .await?
        .ok_or_else(|| ApiError::not_found("collection"))?;
    Ok(Json(respond(collection)))
}

#[derive(Serialize)]
struct CollectionTransitionResponse {
    #[serde(flatten)]
    record: CollectionResponse,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    not_modified: bool,
}

async fn approve_collection(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(collection_id): Path<Uuid>,
) -> ApiResult<Json<CollectionTransitionResponse>> {
    user.ensure_one_of(COLLECTION_APPROVER_ROLES)?;
    let outcome = state
        .engine
        .transition(
            EntityKind::MoneyCollection,
            collection_id,
            Some(user.tenant_id),
            Actor::User {
                id: user.user_id,
                role: user.role,
            },
            ApprovalAction::Approve,
            None,
        )
        .await?;

    let collection = state
        .collection_repo
        .find(user.tenant_id, collection_id)
        .await?
        .ok_or_else(|| ApiError::not_found("collection"))?;
    Ok(Json(CollectionTransitionResponse {
        record: respond(collection),
        not_modified: matches!(outcome, TransitionOutcome::NotModified(_)),
    }))
}

#[derive(Debug, Deserialize)]
struct RejectPayload {
    reason: String,
}

async fn reject_collection(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(collection_id): Path<Uuid>,
    Json(payload): Json<RejectPayload>,
) -> ApiResult<Json<CollectionTransitionResponse>> {
    user.ensure_one_of(COLLECTION_APPROVER_ROLES)?;
    let outcome = state
        .engine
        .transition(
            EntityKind::MoneyCollection,
            collection_id,
            Some(user.tenant_id),
            Actor::User {
                id: user.user_id,
                role: user.role,
            },
            ApprovalAction::Reject,
            Some(payload.reason.trim()),
        )
        .await?;

    let collection = state
        .collection_repo
        .find(user.tenant_id, collection_id)
        .await?
        .ok_or_else(|| ApiError::not_found("collection"))?;
    Ok(Json(CollectionTransitionResponse {
        record: respond(collection),
        not_modified: matches!(outcome, TransitionOutcome::NotModified(_)),
    }))
}

// ---- bank deposits ----

#[derive(Debug, Deserialize)]
struct CreateDepositPayload {
    collection_id: Uuid,
    amount: Decimal,
    bank_reference: String,
}

async fn create_deposit(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateDepositPayload>,
) -> ApiResult<(StatusCode, Json<BankDeposit>)> {
    user.ensure_at_least(Role::AssistantManager)?;
    if payload.amount <= Decimal::ZERO {
        return Err(ApiError::validation("amount", "must be positive"));
    }
    if payload.bank_reference.trim().is_empty() {
        return Err(ApiError::validation("bank_reference", "must not be empty"));
    }

    match state
        .collection_repo
        .create_deposit(&NewDeposit {
            id: Uuid::new_v4(),
            tenant_id: user.tenant_id,
            collection_id: payload.collection_id,
            amount: payload.amount,
            bank_reference: payload.bank_reference.trim().to_string(),
            deposited_by: user.user_id,
        })
        .await?
    {
        DepositOutcome::Created(deposit) => Ok((StatusCode::CREATED, Json(deposit))),
        DepositOutcome::CollectionNotFound => Err(ApiError::not_found("collection")),
        DepositOutcome::CollectionNotApproved(status) => Err(ApiError::new(
            domain::ErrorKind::PreconditionFailed,
            format!(
                "deposits require an approved collection, found {}",
                status.as_str()
            ),
        )),
    }
}

async fn list_deposits(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<BankDeposit>>> {
    let deposits = state.collection_repo.list_deposits(user.tenant_id).await?;
    Ok(Json(deposits))
}

// ---- expenses ----

#[derive(Debug, Deserialize)]
struct CreateExpensePayload {
    shop_id: Uuid,
    description: String,
    amount: Decimal,
}

async fn create_expense(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateExpensePayload>,
) -> ApiResult<(StatusCode, Json<Expense>)> {
    user.ensure_at_least(Role::Salesman)?;
    if payload.description.trim().is_empty() {
        return Err(ApiError::validation("description", "must not be empty"));
    }
    if payload.amount <= Decimal::ZERO {
        return Err(ApiError::validation("amount", "must be positive"));
    }

    state
        .shop_repo
        .find(user.tenant_id, payload.shop_id)
        .await?
        .ok_or_else(|| ApiError::not_found("shop"))?;

    let expense = state
        .expense_repo
        .create(&NewExpense {
            id: Uuid::new_v4(),
            tenant_id: user.tenant_id,
            shop_id: payload.shop_id,
            description: payload.description.trim().to_string(),
            amount: payload.amount,
            created_by: user.user_id,
        })
        .await?;

    state
        .cache
        .invalidate_kind(user.tenant_id, EntityKind::Expense)
        .await;
    Ok((StatusCode::CREATED, Json(expense)))
}

#[derive(Debug, Deserialize)]
struct ExpenseQuery {
    status: Option<String>,
}

async fn list_expenses(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ExpenseQuery>,
) -> ApiResult<Json<Vec<Expense>>> {
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(
            ApprovalStatus::parse(raw)
                .ok_or_else(|| ApiError::validation("status", "unknown status"))?,
        ),
    };
    let expenses = state.expense_repo.list(user.tenant_id, status).await?;
    Ok(Json(expenses))
}

async fn approve_expense(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(expense_id): Path<Uuid>,
) -> ApiResult<Json<Expense>> {
    user.ensure_at_least(Role::Manager)?;
    state
        .engine
        .transition(
            EntityKind::Expense,
            expense_id,
            Some(user.tenant_id),
            Actor::User {
                id: user.user_id,
                role: user.role,
            },
            ApprovalAction::Approve,
            None,
        )
        .await?;

    let expense = state
        .expense_repo
        .find(user.tenant_id, expense_id)
        .await?
        .ok_or_else(|| ApiError::not_found("expense"))?;
    Ok(Json(expense))
}

async fn reject_expense(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(expense_id): Path<Uuid>,
    Json(payload): Json<RejectPayload>,
) -> ApiResult<Json<Expense>> {
    user.ensure_at_least(Role::Manager)?;
    if payload.reason.trim().is_empty() {
        return Err(ApiError::validation("reason", "must not be empty"));
    }
    state
        .engine
        .transition(
            EntityKind::Expense,
            expense_id,
            Some(user.tenant_id),
            Actor::User {
                id: user.user_id,
                role: user.role,
            },
            ApprovalAction::Reject,
            Some(payload.reason.trim()),
        )
        .await?;

    let expense = state
        .expense_repo
        .find(user.tenant_id, expense_id)
        .await?
        .ok_or_else(|| ApiError::not_found("expense"))?;
    Ok(Json(expense))
}
