use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use domain::{Role, SessionInfo, Shop, Tenant, User};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth_middleware::CurrentUser,
    error::{ApiError, ApiResult},
    repositories::{NewUser, UserUpdate},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users).post(create_user))
        .route("/admin/users/:user_id", put(update_user))
        .route("/admin/shops", get(list_shops).post(create_shop))
        .route("/admin/sessions", get(list_sessions))
        .route("/admin/sessions/:session_id/revoke", post(revoke_session))
        .route("/admin/tenants", get(list_tenants))
}

async fn list_users(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<User>>> {
    user.ensure_at_least(Role::Admin)?;
    let users = state.user_repo.list(user.tenant_id).await?;
    Ok(Json(users))
}

#[derive(Debug, Deserialize)]
struct CreateUserPayload {
    username: String,
    email: String,
    password: String,
    role: String,
}

async fn create_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateUserPayload>,
) -> ApiResult<(StatusCode, Json<User>)> {
    user.ensure_at_least(Role::Admin)?;

    if payload.username.trim().is_empty() {
        return Err(ApiError::validation("username", "must not be empty"));
    }
    if !payload.email.contains('@') {
        return Err(ApiError::validation("email", "must be an email address"));
    }
    if payload.password.len() < 8 {
        return Err(ApiError::validation(
            "password",
            "must be at least 8 characters",
        ));
    }
    let role = Role::parse(&payload.role)
        .ok_or_else(|| ApiError::validation("role", "unknown role"))?;
    // The platform role is never granted through the tenant surface.
    if role == Role::SaasAdmin {
        return Err(ApiError::validation("role", "cannot be assigned"));
    }

    let password_hash = auth::hash_password(payload.password).await?;
    let created = state
        .user_repo
        .create(&NewUser {
            id: Uuid::new_v4(),
            tenant_id: user.tenant_id,
            username: payload.username.trim().to_string(),
            email: payload.email.trim().to_string(),
            password_hash,
            role,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
struct UpdateUserPayload {
    role: Option<String>,
    active: Option<bool>,
}

async fn update_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateUserPayload>,
) -> ApiResult<Json<User>> {
    user.ensure_at_least(Role::Admin)?;

    let role = payload
        .role
        .as_deref()
        .map(|raw| Role::parse(raw).ok_or_else(|| ApiError::validation("role", "unknown role")))
        .transpose()?;
    if role == Some(Role::SaasAdmin) {
        return Err(ApiError::validation("role", "cannot be assigned"));
    }

    // Role changes only affect new sessions; existing sessions keep their
    // issued role snapshot until they expire or are revoked.
    let updated = state
        .user_repo
        .update(
            user.tenant_id,
            user_id,
            &UserUpdate {
                role,
                active: payload.active,
            },
        )
        .await?;

    updated.map(Json).ok_or_else(|| ApiError::not_found("user"))
}

async fn list_shops(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<Shop>>> {
    user.ensure_at_least(Role::Admin)?;
    let shops = state.shop_repo.list(user.tenant_id).await?;
    Ok(Json(shops))
}

#[derive(Debug, Deserialize)]
struct CreateShopPayload {
    name: String,
    address: Option<String>,
}

async fn create_shop(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateShopPayload>,
) -> ApiResult<(StatusCode, Json<Shop>)> {
    user.ensure_at_least(Role::Admin)?;
    if payload.name.trim().is_empty() {
        return Err(ApiError::validation("name", "must not be empty"));
    }

    let shop = Shop {
        id: Uuid::new_v4(),
        tenant_id: user.tenant_id,
        name: payload.name.trim().to_string(),
        address: payload.address,
        active: true,
    };
    state.shop_repo.create(&shop).await?;
    Ok((StatusCode::CREATED, Json(shop)))
}

async fn list_sessions(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<SessionInfo>>> {
    user.ensure_at_least(Role::Admin)?;
    let sessions = state.session_repo.list(user.tenant_id).await?;
    Ok(Json(sessions))
}

async fn revoke_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    user.ensure_at_least(Role::Admin)?;
    let revoked = state.session_repo.revoke(user.tenant_id, session_id).await?;
    if revoked {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("session"))
    }
}

/// The one declared cross-tenant endpoint; everything else is tenant-bound.
async fn list_tenants(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<Tenant>>> {
    user.ensure_at_least(Role::SaasAdmin)?;
    let tenants = state.user_repo.list_tenants().await?;
    Ok(Json(tenants))
}
