use auth::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{ErrorBody, ErrorKind};
use serde_json::{json, Value};

use approval_engine::EngineError;

/// Every handler error funnels through here so the wire always carries the
/// `{ error, code, request_id, details? }` envelope. The request id itself is
/// filled in by the envelope middleware in `app.rs`.
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn validation(field: &str, message: &str) -> Self {
        Self::new(ErrorKind::ValidationFailed, "validation failed")
            .with_details(json!({ field: [message] }))
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("{what} not found"))
    }

    pub fn forbidden() -> Self {
        Self::new(ErrorKind::Forbidden, "insufficient role for this action")
    }

    pub fn unauthenticated() -> Self {
        Self::new(ErrorKind::Unauthenticated, "missing or invalid token")
    }

    pub fn internal() -> Self {
        Self::new(ErrorKind::InternalError, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = ErrorBody::new(self.kind, self.message);
        body.details = self.details;
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => {
                ApiError::new(ErrorKind::InvalidCredentials, "invalid credentials")
            }
            AuthError::RateLimited => ApiError::new(
                ErrorKind::AuthRateLimited,
                "too many failed attempts, try again later",
            ),
            AuthError::InvalidToken | AuthError::RefreshTokenInvalid => ApiError::unauthenticated(),
            AuthError::AccountInactive => {
                ApiError::new(ErrorKind::Forbidden, "account is inactive")
            }
            AuthError::Validation { field, message } => ApiError::validation(field, message),
            AuthError::Duplicate(what) => {
                ApiError::new(ErrorKind::Conflict, format!("duplicate {what}"))
            }
            AuthError::Internal(message) => {
                tracing::error!(error = %message, "auth internal error");
                ApiError::internal()
            }
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound => ApiError::not_found("entity"),
            EngineError::InvalidStateTransition { current, action } => ApiError::new(
                ErrorKind::InvalidStateTransition,
                format!("cannot {action} an entity that is {}", current.as_str()),
            ),
            EngineError::DeadlineExceeded => ApiError::new(
                ErrorKind::DeadlineExceeded,
                "collection deadline has passed",
            ),
            EngineError::Precondition { message, details } => {
                ApiError::new(ErrorKind::PreconditionFailed, message).with_details(details)
            }
            EngineError::Database(err) => {
                tracing::error!(error = %err, "approval engine database error");
                ApiError::internal()
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.constraint().is_some() {
                return ApiError::new(ErrorKind::Conflict, "duplicate value");
            }
        }
        tracing::error!(error = %err, "database error");
        ApiError::internal()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        // Constraint violations bubble up from the repositories as conflicts.
        if let Some(sqlx_err) = err.downcast_ref::<sqlx::Error>() {
            if let sqlx::Error::Database(db) = sqlx_err {
                if db.constraint().is_some() {
                    return ApiError::new(ErrorKind::Conflict, "duplicate value");
                }
            }
        }
        tracing::error!(error = %err, "internal error");
        ApiError::internal()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_spec_codes() {
        let err: ApiError = EngineError::DeadlineExceeded.into();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);

        let err: ApiError = EngineError::Precondition {
            message: "totals mismatch".into(),
            details: json!({}),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

        let err: ApiError = EngineError::InvalidStateTransition {
            current: domain::ApprovalStatus::Rejected,
            action: "approve",
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
    }

    #[test]
    fn auth_errors_keep_credentials_private() {
        let err: ApiError = AuthError::InvalidCredentials.into();
        assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
        let err: ApiError = AuthError::RateLimited.into();
        assert_eq!(err.kind(), ErrorKind::AuthRateLimited);
    }

    #[test]
    fn validation_error_carries_field_details() {
        let err = ApiError::validation("amount", "must be positive");
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert_eq!(
            err.details,
            Some(json!({ "amount": ["must be positive"] }))
        );
    }
}
