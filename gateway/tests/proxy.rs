use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use auth::{AuthError, AuthResult, AuthService, JwtClaims};
use axum::{
    body::{to_bytes, Body},
    extract::Request as AxumRequest,
    http::{HeaderValue, Request, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use domain::{LoginRequest, LoginResponse, RegisterRequest, Role};
use gateway::{
    app::build_router,
    config::{GatewayConfig, PrefixRule, ServiceTarget},
    rate_limit::RateLimiter,
    state::GatewayState,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

#[derive(Clone)]
struct SingleTokenAuthService {
    token: String,
    claims: JwtClaims,
}

#[async_trait]
impl AuthService for SingleTokenAuthService {
    async fn register(&self, _payload: RegisterRequest) -> AuthResult<LoginResponse> {
        Err(AuthError::Internal("not wired in tests".into()))
    }

    async fn login(&self, _payload: LoginRequest) -> AuthResult<LoginResponse> {
        Err(AuthError::InvalidCredentials)
    }

    async fn validate_token(&self, token: &str) -> AuthResult<JwtClaims> {
        if token == self.token {
            Ok(self.claims.clone())
        } else {
            Err(AuthError::InvalidToken)
        }
    }

    async fn logout(&self, _session_id: Uuid) -> AuthResult<()> {
        Ok(())
    }

    async fn refresh_session(&self, _refresh_token: &str) -> AuthResult<LoginResponse> {
        Err(AuthError::RefreshTokenInvalid)
    }
}

fn test_claims(role: Role) -> JwtClaims {
    let now = Utc::now();
    JwtClaims {
        sub: "tester".to_string(),
        role,
        aud: "retailops".to_string(),
        iss: "retailops-api".to_string(),
        exp: (now + ChronoDuration::minutes(15)).timestamp() as usize,
        iat: now.timestamp() as usize,
        session_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
    }
}

async fn teapot() -> impl IntoResponse {
    (StatusCode::IM_A_TEAPOT, "short and stout")
}

/// Echoes back the identity headers the gateway attached.
async fn echo_headers(req: AxumRequest) -> Json<Value> {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    };
    Json(json!({
        "x_user_id": header("x-user-id"),
        "x_tenant_id": header("x-tenant-id"),
        "x_user_role": header("x-user-role"),
        "x_gateway_token": header("x-gateway-token"),
        "x_request_id": header("x-request-id"),
        "authorization": header("authorization"),
    }))
}

async fn spawn_upstream() -> String {
    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/teapot", get(teapot))
        .route("/api/echo", get(echo_headers))
        .route("/api/auth/login", post(|| async { Json(json!({"ok": true})) }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .await
            .expect("upstream serve");
    });
    format!("http://{addr}")
}

fn service_map(base_url: &str) -> HashMap<String, ServiceTarget> {
    let mut services = HashMap::new();
    services.insert(
        "sales".to_string(),
        ServiceTarget {
            name: "sales".to_string(),
            base_url: base_url.to_string(),
            prefix_rule: PrefixRule::StripService,
        },
    );
    services.insert(
        "auth".to_string(),
        ServiceTarget {
            name: "auth".to_string(),
            base_url: base_url.to_string(),
            prefix_rule: PrefixRule::Passthrough,
        },
    );
    services
}

fn test_config(base_url: &str, user_rate_per_min: u32) -> GatewayConfig {
    GatewayConfig {
        database_url: String::new(),
        jwt_secret: "dev-secret".to_string(),
        jwt_audience: "retailops".to_string(),
        jwt_issuer: "retailops-api".to_string(),
        gateway_shared_token: "test-gateway-token".to_string(),
        frontend_origins: vec!["http://localhost:3000".to_string()],
        services: service_map(base_url),
        request_timeout: Duration::from_secs(30),
        upstream_timeout: Duration::from_secs(5),
        health_probe_timeout: Duration::from_secs(1),
        user_rate_per_min,
        ip_rate_per_min: 10_000,
        redis_url: None,
        port: 0,
    }
}

fn build_gateway(base_url: &str, user_rate_per_min: u32, token: &str, role: Role) -> Router {
    let state = GatewayState {
        config: test_config(base_url, user_rate_per_min),
        auth: Arc::new(SingleTokenAuthService {
            token: token.to_string(),
            claims: test_claims(role),
        }),
        limiter: RateLimiter::new(None).expect("limiter"),
        client: reqwest::Client::new(),
    };
    build_router(
        state,
        vec![HeaderValue::from_static("http://localhost:3000")],
    )
}

fn get_with_token(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn upstream_status_passes_through_verbatim() {
    let base_url = spawn_upstream().await;
    let router = build_gateway(&base_url, 100, "valid-token", Role::Manager);

    let response = router
        .oneshot(get_with_token("/api/sales/teapot", "valid-token"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    assert_eq!(&bytes[..], b"short and stout");
}

#[tokio::test]
async fn identity_headers_are_attached_for_upstreams() {
    let base_url = spawn_upstream().await;
    let state_claims = test_claims(Role::Executive);
    let state = GatewayState {
        config: test_config(&base_url, 100),
        auth: Arc::new(SingleTokenAuthService {
            token: "valid-token".to_string(),
            claims: state_claims.clone(),
        }),
        limiter: RateLimiter::new(None).expect("limiter"),
        client: reqwest::Client::new(),
    };
    let router = build_router(
        state,
        vec![HeaderValue::from_static("http://localhost:3000")],
    );

    let response = router
        .oneshot(get_with_token("/api/sales/echo", "valid-token"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(
        body["x_user_id"],
        json!(state_claims.user_id.to_string())
    );
    assert_eq!(
        body["x_tenant_id"],
        json!(state_claims.tenant_id.to_string())
    );
    assert_eq!(body["x_user_role"], json!("executive"));
    assert_eq!(body["x_gateway_token"], json!("test-gateway-token"));
    assert!(body["x_request_id"].is_string());
    // The original bearer travels along for defense-in-depth re-validation.
    assert_eq!(body["authorization"], json!("Bearer valid-token"));
}

#[tokio::test]
async fn missing_or_invalid_token_is_unauthenticated() {
    let base_url = spawn_upstream().await;
    let router = build_gateway(&base_url, 100, "valid-token", Role::Manager);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/sales/teapot")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], json!("unauthenticated"));

    let response = router
        .oneshot(get_with_token("/api/sales/teapot", "wrong-token"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn public_auth_paths_skip_token_validation() {
    let base_url = spawn_upstream().await;
    let router = build_gateway(&base_url, 100, "valid-token", Role::Manager);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/auth/login")
                .method("POST")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["ok"], json!(true));
}

#[tokio::test]
async fn unknown_service_is_not_found() {
    let base_url = spawn_upstream().await;
    let router = build_gateway(&base_url, 100, "valid-token", Role::Manager);

    let response = router
        .oneshot(get_with_token("/api/billing/invoices", "valid-token"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn per_user_rate_limit_returns_retry_after() {
    let base_url = spawn_upstream().await;
    let router = build_gateway(&base_url, 2, "valid-token", Role::Manager);

    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(get_with_token("/api/sales/teapot", "valid-token"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    let response = router
        .oneshot(get_with_token("/api/sales/teapot", "valid-token"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().get("retry-after").is_some());
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], json!("rate_limited"));
}

#[tokio::test]
async fn unreachable_upstream_maps_to_service_unavailable() {
    // Nothing listens here; connection is refused immediately.
    let dead = SocketAddr::from(([127, 0, 0, 1], 1));
    let router = build_gateway(&format!("http://{dead}"), 100, "valid-token", Role::Manager);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/sales/teapot")
                .method("POST")
                .header("Authorization", "Bearer valid-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], json!("service_unavailable"));
}

#[tokio::test]
async fn gateway_health_reports_upstream_status() {
    let base_url = spawn_upstream().await;
    let router = build_gateway(&base_url, 100, "valid-token", Role::Manager);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/gateway/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["healthy"], json!(true));

    let response = router
        .oneshot(
            Request::builder()
                .uri("/gateway/services")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|entry| entry["name"].as_str())
        .collect();
    assert_eq!(names, vec!["auth", "sales"]);
}
