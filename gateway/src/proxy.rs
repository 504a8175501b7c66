use std::net::SocketAddr;
use std::time::Duration;

use auth::JwtClaims;
use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use metrics::counter;
use rand::Rng;
use tracing::{debug, warn};

use crate::{
    config::{PrefixRule, ServiceTarget},
    error::GatewayError,
    rate_limit::RateDecision,
    state::GatewayState,
};

/// Generous cap for buffered proxy bodies.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Paths reachable without a token: registration, login, refresh.
const PUBLIC_PATHS: &[&str] = &["/api/auth/register", "/api/auth/login", "/api/auth/refresh"];

pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
}

/// Resolves a request path to its upstream target and rewritten path.
/// `/api/<svc>/x` strips the service segment for every service except the
/// identity service, which is passed through verbatim.
pub fn resolve_upstream<'a>(
    services: &'a std::collections::HashMap<String, ServiceTarget>,
    path: &str,
) -> Option<(&'a ServiceTarget, String)> {
    let rest = path.strip_prefix("/api/")?;
    let (service_name, tail) = match rest.split_once('/') {
        Some((name, tail)) => (name, Some(tail)),
        None => (rest, None),
    };
    let target = services.get(service_name)?;
    let upstream_path = match target.prefix_rule {
        PrefixRule::Passthrough => path.to_string(),
        PrefixRule::StripService => match tail {
            Some(tail) if !tail.is_empty() => format!("/api/{tail}"),
            _ => "/api".to_string(),
        },
    };
    Some((target, upstream_path))
}

fn client_ip(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn request_id(req: &Request) -> Option<String> {
    req.headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// The forwarding handler behind the middleware chain. Order of operations:
/// per-IP admission, token validation (public paths skip it), per-user
/// admission, then the upstream exchange with identity headers attached.
pub async fn proxy(State(state): State<GatewayState>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let Some((target, upstream_path)) = resolve_upstream(&state.config.services, &path) else {
        return GatewayError::new(domain::ErrorKind::NotFound, "unknown service").into_response();
    };
    let target = target.clone();

    let ip = client_ip(&req);
    match state
        .limiter
        .check(&format!("ip:{ip}"), state.config.ip_rate_per_min)
        .await
    {
        RateDecision::Allowed => {}
        RateDecision::Limited { retry_after_secs } => {
            counter!("gateway_rate_limited_total", "scope" => "ip").increment(1);
            return GatewayError::rate_limited(retry_after_secs).into_response();
        }
    }

    let claims = if is_public_path(&path) {
        None
    } else {
        let Some(token) = bearer_token(&req) else {
            return GatewayError::unauthenticated().into_response();
        };
        match state.auth.validate_token(&token).await {
            Ok(claims) => Some(claims),
            Err(_) => return GatewayError::unauthenticated().into_response(),
        }
    };

    if let Some(claims) = &claims {
        match state
            .limiter
            .check(
                &format!("user:{}", claims.user_id),
                state.config.user_rate_per_min,
            )
            .await
        {
            RateDecision::Allowed => {}
            RateDecision::Limited { retry_after_secs } => {
                counter!("gateway_rate_limited_total", "scope" => "user").increment(1);
                return GatewayError::rate_limited(retry_after_secs).into_response();
            }
        }
    }

    counter!("gateway_requests_total", "service" => target.name.clone()).increment(1);
    match forward(&state, req, &target, &upstream_path, claims.as_ref()).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

fn bearer_token(req: &Request) -> Option<String> {
    let header = req.headers().get(axum::http::header::AUTHORIZATION)?;
    let value = header.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::to_owned)
}

async fn forward(
    state: &GatewayState,
    req: Request,
    target: &ServiceTarget,
    upstream_path: &str,
    claims: Option<&JwtClaims>,
) -> Result<Response, GatewayError> {
    let rid = request_id(&req);
    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES).await.map_err(|_| {
        GatewayError::new(domain::ErrorKind::ValidationFailed, "request body too large")
    })?;

    let mut url = format!("{}{}", target.base_url, upstream_path);
    if let Some(query) = parts.uri.query() {
        url.push('?');
        url.push_str(query);
    }

    let mut headers = parts.headers.clone();
    headers.remove(axum::http::header::HOST);
    headers.remove(axum::http::header::CONTENT_LENGTH);
    // Identity propagation: authoritative only because upstreams check the
    // shared gateway token and listen on the internal plane.
    if let Some(claims) = claims {
        insert_header(&mut headers, "x-user-id", &claims.user_id.to_string());
        insert_header(&mut headers, "x-tenant-id", &claims.tenant_id.to_string());
        insert_header(&mut headers, "x-user-role", claims.role.as_str());
    }
    insert_header(
        &mut headers,
        "x-gateway-token",
        &state.config.gateway_shared_token,
    );
    if let Some(rid) = &rid {
        insert_header(&mut headers, "x-request-id", rid);
    }

    let is_idempotent = parts.method == axum::http::Method::GET;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = state
            .client
            .request(parts.method.clone(), &url)
            .headers(headers.clone())
            .body(bytes.clone())
            .timeout(state.config.upstream_timeout)
            .send()
            .await;

        match result {
            Ok(upstream) => {
                let status = upstream.status();
                // Retry upstream 5xx once, and only for reads; mutations are
                // never replayed.
                if status.is_server_error() && is_idempotent && attempt == 1 {
                    backoff_with_jitter().await;
                    continue;
                }
                return upstream_response(upstream).await;
            }
            Err(err) => {
                warn!(service = %target.name, error = %err, "upstream exchange failed");
                if is_idempotent && attempt == 1 {
                    backoff_with_jitter().await;
                    continue;
                }
                return Err(GatewayError::service_unavailable(&target.name));
            }
        }
    }
}

fn insert_header(headers: &mut axum::http::HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

async fn backoff_with_jitter() {
    let jitter_ms = rand::thread_rng().gen_range(50..250);
    debug!(jitter_ms, "retrying idempotent upstream request");
    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
}

/// Upstream statuses (including >= 400) pass through unchanged, body and all.
async fn upstream_response(upstream: reqwest::Response) -> Result<Response, GatewayError> {
    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let headers = upstream.headers().clone();
    let body = upstream.bytes().await.map_err(|err| {
        warn!(error = %err, "failed to read upstream body");
        GatewayError::new(domain::ErrorKind::ServiceUnavailable, "upstream read failed")
    })?;

    let mut response = Response::builder().status(status);
    if let Some(content_type) = headers.get(axum::http::header::CONTENT_TYPE) {
        response = response.header(axum::http::header::CONTENT_TYPE, content_type);
    }
    if let Some(rid) = headers.get("x-request-id") {
        response = response.header("x-request-id", rid);
    }
    response
        .body(Body::from(body))
        .map_err(|_| GatewayError::new(domain::ErrorKind::InternalError, "response build failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_services;

    fn services() -> std::collections::HashMap<String, ServiceTarget> {
        parse_services("SERVICE_MAP_TEST_UNSET")
    }

    #[test]
    fn strips_service_segment_for_resource_services() {
        let services = services();
        let (target, path) = resolve_upstream(&services, "/api/sales/daily-records").unwrap();
        assert_eq!(target.name, "sales");
        assert_eq!(path, "/api/daily-records");

        let (_, path) = resolve_upstream(&services, "/api/inventory/stock/adjust").unwrap();
        assert_eq!(path, "/api/stock/adjust");
    }

    #[test]
    fn identity_service_is_passthrough() {
        let services = services();
        let (target, path) = resolve_upstream(&services, "/api/auth/login").unwrap();
        assert_eq!(target.name, "auth");
        assert_eq!(path, "/api/auth/login");
    }

    #[test]
    fn unknown_service_resolves_to_none() {
        let services = services();
        assert!(resolve_upstream(&services, "/api/nonexistent/x").is_none());
        assert!(resolve_upstream(&services, "/metrics").is_none());
    }

    #[test]
    fn bare_service_path_maps_to_api_root() {
        let services = services();
        let (_, path) = resolve_upstream(&services, "/api/sales").unwrap();
        assert_eq!(path, "/api");
    }

    #[test]
    fn public_paths_skip_authentication() {
        assert!(is_public_path("/api/auth/login"));
        assert!(is_public_path("/api/auth/register"));
        assert!(is_public_path("/api/auth/refresh"));
        assert!(!is_public_path("/api/auth/profile"));
        assert!(!is_public_path("/api/sales/daily-records"));
    }
}
