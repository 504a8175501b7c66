use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    typed_header::TypedHeader,
};
use domain::{LoginRequest, LoginResponse, RegisterRequest, UserProfile};

use crate::{
    auth_middleware::CurrentUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/profile", get(profile))
}

/// Self-registration bootstraps a tenant: the payload must carry a
/// `tenant_name`, and the caller becomes that tenant's admin.
async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<LoginResponse>)> {
    let login = state.auth.register(payload).await?;
    Ok((StatusCode::CREATED, Json(login)))
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let login = state.auth.login(payload).await?;
    Ok(Json(login))
}

#[derive(serde::Deserialize)]
struct RefreshPayload {
    refresh_token: String,
}

async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshPayload>,
) -> ApiResult<Json<LoginResponse>> {
    let login = state.auth.refresh_session(&payload.refresh_token).await?;
    Ok(Json(login))
}

/// Logout revokes the session behind the presented bearer token; trusted
/// identity headers are not enough because they do not carry the session id.
async fn logout(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> ApiResult<StatusCode> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or_else(ApiError::unauthenticated)?;
    let claims = state.auth.validate_token(bearer.token()).await?;
    state.auth.logout(claims.session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn profile(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<UserProfile>> {
    let profile = state
        .user_repo
        .find_profile(user.tenant_id, user.user_id)
        .await?;
    profile.map(Json).ok_or_else(|| ApiError::not_found("user"))
}
