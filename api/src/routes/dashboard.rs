use axum::{extract::State, routing::get, Json, Router};
use tracing::warn;

use crate::{
    auth_middleware::CurrentUser,
    cache::InvariantCache,
    error::ApiResult,
    repositories::PendingCounts,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/dashboard/summary", get(summary))
}

/// Pending-queue sizes per entity kind, served from the invariant cache.
/// A miss recomputes from storage and fills the cache; transitions delete
/// the entry, so staleness is bounded by the hard TTL only when an
/// invalidation is lost.
async fn summary(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<PendingCounts>> {
    let key = InvariantCache::dashboard_key(user.tenant_id);

    if let Some(cached) = state.cache.get(&key).await {
        match serde_json::from_str::<PendingCounts>(&cached) {
            Ok(counts) => return Ok(Json(counts)),
            Err(err) => warn!(error = %err, "discarding malformed dashboard cache entry"),
        }
    }

    let counts = state.pending_repo.count_pending(user.tenant_id).await?;
    if let Ok(serialized) = serde_json::to_string(&counts) {
        state.cache.put(&key, serialized).await;
    }
    Ok(Json(counts))
}
