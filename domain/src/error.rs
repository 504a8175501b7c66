use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Machine error codes shared by the gateway and every resource service.
/// Each code has exactly one HTTP status.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationFailed,
    InvalidCredentials,
    AuthRateLimited,
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    InvalidStateTransition,
    DeadlineExceeded,
    PreconditionFailed,
    RateLimited,
    ServiceUnavailable,
    Timeout,
    InternalError,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::InvalidCredentials => "invalid_credentials",
            ErrorKind::AuthRateLimited => "auth_rate_limited",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidStateTransition => "invalid_state_transition",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InternalError => "internal_error",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::ValidationFailed => 400,
            ErrorKind::InvalidCredentials => 401,
            ErrorKind::AuthRateLimited => 429,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::InvalidStateTransition => 409,
            ErrorKind::DeadlineExceeded => 409,
            ErrorKind::PreconditionFailed => 422,
            ErrorKind::RateLimited => 429,
            ErrorKind::ServiceUnavailable => 502,
            ErrorKind::Timeout => 504,
            ErrorKind::InternalError => 500,
        }
    }
}

/// The uniform wire envelope: `{ error, code, request_id, details? }`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: kind,
            request_id: None,
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorKind::DeadlineExceeded.code(), "deadline_exceeded");
        assert_eq!(ErrorKind::DeadlineExceeded.http_status(), 409);
        assert_eq!(ErrorKind::PreconditionFailed.http_status(), 422);
        assert_eq!(ErrorKind::Timeout.http_status(), 504);
        assert_eq!(ErrorKind::ServiceUnavailable.http_status(), 502);
    }

    #[test]
    fn envelope_omits_empty_fields() {
        let body = ErrorBody::new(ErrorKind::NotFound, "shop not found");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], "not_found");
        assert!(json.get("details").is_none());
        assert!(json.get("request_id").is_none());
    }
}
