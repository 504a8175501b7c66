use std::net::SocketAddr;

use axum::{http::HeaderValue, routing::Router};
use gateway::{
    app::build_router, config::GatewayConfig, rate_limit::RateLimiter, state::GatewayState,
    telemetry,
};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing()?;

    let config = GatewayConfig::from_env()?;
    let allowed_origins = config
        .frontend_origins
        .iter()
        .map(|value| {
            HeaderValue::from_str(value)
                .map_err(|err| anyhow::anyhow!("invalid FRONTEND_ORIGINS entry {value}: {err}"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let pool = PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;

    let auth_service = auth::PasswordAuthService::new(
        auth::AuthConfig {
            jwt_secret: config.jwt_secret.clone(),
            jwt_audience: config.jwt_audience.clone(),
            jwt_issuer: config.jwt_issuer.clone(),
            ..auth::AuthConfig::default()
        },
        pool,
    )
    .await?;

    let state = GatewayState {
        limiter: RateLimiter::new(config.redis_url.clone())?,
        client: reqwest::Client::new(),
        auth: auth_service,
        config: config.clone(),
    };

    let app: Router = build_router(state, allowed_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app).await?;

    Ok(())
}
