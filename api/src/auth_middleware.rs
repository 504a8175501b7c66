use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    typed_header::TypedHeader,
};
use domain::Role;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const GATEWAY_TOKEN_HEADER: &str = "x-gateway-token";

/// The verified identity for this request. Resolved from the gateway's
/// trusted headers when the shared gateway token matches, otherwise from a
/// full bearer-token validation (defense in depth for direct callers on the
/// internal plane).
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: Role,
}

impl CurrentUser {
    pub fn ensure_at_least(&self, required: Role) -> Result<(), ApiError> {
        if self.role.at_least(required) {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }

    pub fn ensure_one_of(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|value| value.to_str().ok())
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let gateway_token = header_str(parts, GATEWAY_TOKEN_HEADER);
        if gateway_token == Some(state.config.gateway_shared_token.as_str()) {
            if let (Some(user_id), Some(tenant_id), Some(role)) = (
                header_str(parts, USER_ID_HEADER),
                header_str(parts, TENANT_ID_HEADER),
                header_str(parts, USER_ROLE_HEADER),
            ) {
                let user_id = Uuid::parse_str(user_id)
                    .map_err(|_| ApiError::unauthenticated())?;
                let tenant_id = Uuid::parse_str(tenant_id)
                    .map_err(|_| ApiError::unauthenticated())?;
                let role = Role::parse(role).ok_or_else(|| {
                    auth::log_unknown_role(role);
                    ApiError::unauthenticated()
                })?;
                return Ok(CurrentUser {
                    user_id,
                    tenant_id,
                    role,
                });
            }
        }

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::unauthenticated())?;

        let claims = state.auth.validate_token(bearer.token()).await?;
        Ok(CurrentUser {
            user_id: claims.user_id,
            tenant_id: claims.tenant_id,
            role: claims.role,
        })
    }
}
