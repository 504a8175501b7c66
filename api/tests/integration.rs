use std::{collections::HashMap, sync::Arc, time::Duration};

use api::{
    app::build_router,
    cache::InvariantCache,
    config::AppConfig,
    repositories::{
        PostgresCatalogRepository, PostgresCollectionRepository, PostgresDailyRecordRepository,
        PostgresExpenseRepository, PostgresPendingRepository, PostgresReturnRepository,
        PostgresSaleRepository, PostgresSessionRepository, PostgresShopRepository,
        PostgresStockRepository, PostgresUserRepository,
    },
    state::AppState,
};
use approval_engine::ApprovalEngine;
use async_trait::async_trait;
use auth::{AuthError, AuthResult, AuthService, JwtClaims};
use axum::{
    body::{to_bytes, Body},
    http::{HeaderValue, Request, StatusCode},
};
use chrono::{Duration as ChronoDuration, Utc};
use deadline_scheduler::DeadlineScheduler;
use domain::{LoginRequest, LoginResponse, RegisterRequest, Role};
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

/// Maps fixed bearer tokens onto claims; everything else is rejected.
#[derive(Clone, Default)]
struct TokenMapAuthService {
    tokens: HashMap<String, JwtClaims>,
}

#[async_trait]
impl AuthService for TokenMapAuthService {
    async fn register(&self, _payload: RegisterRequest) -> AuthResult<LoginResponse> {
        Err(AuthError::Internal("not wired in tests".into()))
    }

    async fn login(&self, _payload: LoginRequest) -> AuthResult<LoginResponse> {
        Err(AuthError::InvalidCredentials)
    }

    async fn validate_token(&self, token: &str) -> AuthResult<JwtClaims> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }

    async fn logout(&self, _session_id: Uuid) -> AuthResult<()> {
        Ok(())
    }

    async fn refresh_session(&self, _refresh_token: &str) -> AuthResult<LoginResponse> {
        Err(AuthError::RefreshTokenInvalid)
    }
}

fn claims_for(user_id: Uuid, tenant_id: Uuid, role: Role) -> JwtClaims {
    let now = Utc::now();
    JwtClaims {
        sub: "test".to_string(),
        role,
        aud: "retailops".to_string(),
        iss: "retailops-api".to_string(),
        exp: (now + ChronoDuration::minutes(15)).timestamp() as usize,
        iat: now.timestamp() as usize,
        session_id: Uuid::new_v4(),
        user_id,
        tenant_id,
    }
}

fn test_config(database_url: String) -> AppConfig {
    AppConfig {
        database_url,
        jwt_secret: "dev-secret".to_string(),
        jwt_audience: "retailops".to_string(),
        jwt_issuer: "retailops-api".to_string(),
        gateway_shared_token: "test-gateway-token".to_string(),
        frontend_origins: vec!["http://localhost:3000".to_string()],
        access_token_ttl: Duration::from_secs(86_400),
        refresh_token_ttl: Duration::from_secs(604_800),
        collection_deadline: Duration::from_secs(900),
        scheduler_sweep_interval: Duration::from_secs(30),
        cache_ttl: Duration::from_secs(300),
        session_cache_ttl: Duration::from_secs(5),
        max_login_failures: 5,
        login_failure_window: Duration::from_secs(300),
        login_cooldown: Duration::from_secs(300),
        request_timeout: Duration::from_secs(30),
        db_statement_timeout: Duration::from_secs(10),
        redis_url: None,
        port: 0,
    }
}

fn build_state(pool: PgPool, tokens: HashMap<String, JwtClaims>) -> AppState {
    let config = test_config(std::env::var("DATABASE_URL").unwrap_or_default());
    let cache = Arc::new(InvariantCache::new(config.cache_ttl, None).expect("cache"));
    let (scheduler, scheduler_handle) =
        DeadlineScheduler::new(pool.clone(), config.scheduler_sweep_interval);
    let engine = ApprovalEngine::new(
        pool.clone(),
        Arc::new(scheduler_handle.clone()),
        cache.clone(),
    );
    scheduler.spawn(engine.clone());

    AppState {
        config,
        db: pool.clone(),
        auth: Arc::new(TokenMapAuthService { tokens }),
        engine,
        scheduler: scheduler_handle,
        cache,
        user_repo: Arc::new(PostgresUserRepository::new(pool.clone())),
        shop_repo: Arc::new(PostgresShopRepository::new(pool.clone())),
        session_repo: Arc::new(PostgresSessionRepository::new(pool.clone())),
        catalog_repo: Arc::new(PostgresCatalogRepository::new(pool.clone())),
        stock_repo: Arc::new(PostgresStockRepository::new(pool.clone())),
        daily_record_repo: Arc::new(PostgresDailyRecordRepository::new(pool.clone())),
        sale_repo: Arc::new(PostgresSaleRepository::new(pool.clone())),
        return_repo: Arc::new(PostgresReturnRepository::new(pool.clone())),
        collection_repo: Arc::new(PostgresCollectionRepository::new(pool.clone())),
        expense_repo: Arc::new(PostgresExpenseRepository::new(pool.clone())),
        pending_repo: Arc::new(PostgresPendingRepository::new(pool)),
    }
}

async fn seed_tenant(pool: &PgPool, name: &str) -> Uuid {
    let tenant_id = Uuid::new_v4();
    sqlx::query("INSERT INTO tenants (id, name) VALUES ($1, $2)")
        .bind(tenant_id)
        .bind(name)
        .execute(pool)
        .await
        .expect("insert tenant");
    tenant_id
}

async fn seed_user(pool: &PgPool, tenant_id: Uuid, username: &str, role: Role) -> Uuid {
    let user_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (id, tenant_id, username, email, password_hash, role)
         VALUES ($1, $2, $3, $4, 'x', $5)",
    )
    .bind(user_id)
    .bind(tenant_id)
    .bind(username)
    .bind(format!("{username}@example.com"))
    .bind(role.as_str())
    .execute(pool)
    .await
    .expect("insert user");
    user_id
}

async fn seed_shop(pool: &PgPool, tenant_id: Uuid, name: &str) -> Uuid {
    let shop_id = Uuid::new_v4();
    sqlx::query("INSERT INTO shops (id, tenant_id, name) VALUES ($1, $2, $3)")
        .bind(shop_id)
        .bind(tenant_id)
        .bind(name)
        .execute(pool)
        .await
        .expect("insert shop");
    shop_id
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header("Authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[sqlx::test(migrations = "../migrations")]
async fn profile_returns_current_user(pool: PgPool) {
    let tenant_id = seed_tenant(&pool, "Acme Wines").await;
    let user_id = seed_user(&pool, tenant_id, "alice", Role::Manager).await;

    let mut tokens = HashMap::new();
    tokens.insert(
        "alice-token".to_string(),
        claims_for(user_id, tenant_id, Role::Manager),
    );
    let router = build_router(
        build_state(pool, tokens),
        vec![HeaderValue::from_static("http://localhost:3000")],
    );

    let response = router
        .oneshot(get("/api/auth/profile", "alice-token"))
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["id"], json!(user_id.to_string()));
    assert_eq!(body["tenant_id"], json!(tenant_id.to_string()));
    assert_eq!(body["role"], json!("manager"));
}

#[sqlx::test(migrations = "../migrations")]
async fn gateway_identity_headers_are_trusted_with_shared_token(pool: PgPool) {
    let tenant_id = seed_tenant(&pool, "Acme Wines").await;
    let user_id = seed_user(&pool, tenant_id, "alice", Role::Admin).await;

    // No bearer token at all; identity comes from the gateway headers.
    let router = build_router(
        build_state(pool, HashMap::new()),
        vec![HeaderValue::from_static("http://localhost:3000")],
    );

    let request = Request::builder()
        .uri("/api/auth/profile")
        .header("x-gateway-token", "test-gateway-token")
        .header("x-user-id", user_id.to_string())
        .header("x-tenant-id", tenant_id.to_string())
        .header("x-user-role", "admin")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    // Wrong shared token: the headers are ignored and the request must carry
    // a valid bearer token instead.
    let request = Request::builder()
        .uri("/api/auth/profile")
        .header("x-gateway-token", "forged")
        .header("x-user-id", user_id.to_string())
        .header("x-tenant-id", tenant_id.to_string())
        .header("x-user-role", "admin")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[sqlx::test(migrations = "../migrations")]
async fn error_envelope_carries_code_and_request_id(pool: PgPool) {
    let router = build_router(
        build_state(pool, HashMap::new()),
        vec![HeaderValue::from_static("http://localhost:3000")],
    );

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/sales/sales")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = json_body(response).await;
    assert_eq!(body["code"], json!("unauthenticated"));
    assert!(body["request_id"].is_string(), "request id must be stamped");
}

#[sqlx::test(migrations = "../migrations")]
async fn role_gate_returns_forbidden_not_unauthenticated(pool: PgPool) {
    let tenant_id = seed_tenant(&pool, "Acme Wines").await;
    let user_id = seed_user(&pool, tenant_id, "sam", Role::Salesman).await;

    let mut tokens = HashMap::new();
    tokens.insert(
        "sam-token".to_string(),
        claims_for(user_id, tenant_id, Role::Salesman),
    );
    let router = build_router(
        build_state(pool, tokens),
        vec![HeaderValue::from_static("http://localhost:3000")],
    );

    let response = router
        .oneshot(get("/api/admin/users", "sam-token"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["code"], json!("forbidden"));
}

#[sqlx::test(migrations = "../migrations")]
async fn brands_are_tenant_isolated(pool: PgPool) {
    let tenant_a = seed_tenant(&pool, "Tenant A").await;
    let tenant_b = seed_tenant(&pool, "Tenant B").await;
    let admin_a = seed_user(&pool, tenant_a, "admin-a", Role::Admin).await;
    let admin_b = seed_user(&pool, tenant_b, "admin-b", Role::Admin).await;

    let mut tokens = HashMap::new();
    tokens.insert(
        "token-a".to_string(),
        claims_for(admin_a, tenant_a, Role::Admin),
    );
    tokens.insert(
        "token-b".to_string(),
        claims_for(admin_b, tenant_b, Role::Admin),
    );
    let router = build_router(
        build_state(pool, tokens),
        vec![HeaderValue::from_static("http://localhost:3000")],
    );

    let response = router
        .clone()
        .oneshot(post_json(
            "/api/inventory/brands",
            "token-a",
            json!({ "name": "X" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    let brand_id = created["id"].as_str().expect("brand id").to_string();

    // Tenant B's listing must not include tenant A's brand.
    let response = router
        .clone()
        .oneshot(get("/api/inventory/brands", "token-b"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let listing = json_body(response).await;
    let names: Vec<&str> = listing
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|brand| brand["name"].as_str())
        .collect();
    assert!(!names.contains(&"X"));

    // Direct fetch by id from the wrong tenant is indistinguishable from a
    // missing record.
    let response = router
        .clone()
        .oneshot(get(&format!("/api/inventory/brands/{brand_id}"), "token-b"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["code"], json!("not_found"));

    // The owner still sees it.
    let response = router
        .oneshot(get(&format!("/api/inventory/brands/{brand_id}"), "token-a"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[sqlx::test(migrations = "../migrations")]
async fn collection_creation_reports_deadline_and_urgency(pool: PgPool) {
    let tenant_id = seed_tenant(&pool, "Acme Wines").await;
    let assistant = seed_user(&pool, tenant_id, "asst", Role::AssistantManager).await;
    let manager = seed_user(&pool, tenant_id, "mgr", Role::Manager).await;
    let shop_id = seed_shop(&pool, tenant_id, "Main Street").await;

    let mut tokens = HashMap::new();
    tokens.insert(
        "asst-token".to_string(),
        claims_for(assistant, tenant_id, Role::AssistantManager),
    );
    tokens.insert(
        "mgr-token".to_string(),
        claims_for(manager, tenant_id, Role::Manager),
    );
    let router = build_router(
        build_state(pool.clone(), tokens),
        vec![HeaderValue::from_static("http://localhost:3000")],
    );

    let response = router
        .clone()
        .oneshot(post_json(
            "/api/finance/money-collection",
            "asst-token",
            json!({
                "shop_id": shop_id.to_string(),
                "counterparty_id": manager.to_string(),
                "amount": "25000.00",
                "collection_type": "daily_sales",
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    assert_eq!(created["status"], json!("pending"));
    assert_eq!(created["urgency"], json!("low"));
    let remaining = created["time_remaining_seconds"]
        .as_i64()
        .expect("remaining");
    assert!((895..=900).contains(&remaining), "remaining={remaining}");

    let collection_id = created["id"].as_str().expect("id").to_string();

    // Manager approves well inside the window.
    let response = router
        .clone()
        .oneshot(post_json(
            &format!("/api/finance/money-collection/{collection_id}/approve"),
            "mgr-token",
            json!({}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let approved = json_body(response).await;
    assert_eq!(approved["status"], json!("approved"));
    assert_eq!(approved["approved_by"], json!(manager.to_string()));

    // Repeating the approval is a no-op, flagged as such.
    let response = router
        .oneshot(post_json(
            &format!("/api/finance/money-collection/{collection_id}/approve"),
            "mgr-token",
            json!({}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let repeated = json_body(response).await;
    assert_eq!(repeated["not_modified"], json!(true));
}

#[sqlx::test(migrations = "../migrations")]
async fn originator_cannot_approve_own_collection(pool: PgPool) {
    let tenant_id = seed_tenant(&pool, "Acme Wines").await;
    // The originator also holds an approving role, so only the self-approval
    // rule stands between them and the transition.
    let originator = seed_user(&pool, tenant_id, "exec", Role::Executive).await;
    let manager = seed_user(&pool, tenant_id, "mgr", Role::Manager).await;
    let shop_id = seed_shop(&pool, tenant_id, "Main Street").await;

    let mut tokens = HashMap::new();
    tokens.insert(
        "exec-token".to_string(),
        claims_for(originator, tenant_id, Role::Executive),
    );
    tokens.insert(
        "mgr-token".to_string(),
        claims_for(manager, tenant_id, Role::Manager),
    );
    let router = build_router(
        build_state(pool, tokens),
        vec![HeaderValue::from_static("http://localhost:3000")],
    );

    let response = router
        .clone()
        .oneshot(post_json(
            "/api/finance/money-collection",
            "exec-token",
            json!({
                "shop_id": shop_id.to_string(),
                "counterparty_id": manager.to_string(),
                "amount": "100.00",
                "collection_type": "other",
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let collection_id = json_body(response).await["id"]
        .as_str()
        .expect("id")
        .to_string();

    let response = router
        .oneshot(post_json(
            &format!("/api/finance/money-collection/{collection_id}/approve"),
            "exec-token",
            json!({}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["code"], json!("precondition_failed"));
}
