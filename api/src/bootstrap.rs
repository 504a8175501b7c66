use std::{sync::Arc, time::Duration};

use anyhow::Result;
use approval_engine::ApprovalEngine;
use auth::{AuthConfig, PasswordAuthService};
use chrono::Duration as ChronoDuration;
use deadline_scheduler::DeadlineScheduler;
use sqlx::postgres::PgPoolOptions;

use crate::{
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

pub async fn build_state(config: &AppConfig) -> Result<AppState> {
    let statement_timeout_ms = config.db_statement_timeout.as_millis();
    let pool = PgPoolOptions::new()
        .acquire_timeout(Duration::from_secs(5))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                // Database work inherits the request deadline discipline.
                sqlx::query(&format!("SET statement_timeout = {statement_timeout_ms}"))
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("../migrations").run(&pool).await?;

    let auth_service = PasswordAuthService::new(
        AuthConfig {
            jwt_secret: config.jwt_secret.clone(),
            jwt_audience: config.jwt_audience.clone(),
            jwt_issuer: config.jwt_issuer.clone(),
            access_token_ttl: chrono_duration(config.access_token_ttl),
            refresh_token_ttl: chrono_duration(config.refresh_token_ttl),
            max_login_failures: config.max_login_failures,
            login_failure_window: config.login_failure_window,
            login_cooldown: config.login_cooldown,
            session_cache_ttl: config.session_cache_ttl,
        },
        pool.clone(),
    )
    .await?;

    let cache = Arc::new(InvariantCache::new(
        config.cache_ttl,
        config.redis_url.clone(),
    )?);

    // Handle first, engine second, loop last: the engine cancels timers
    // through the handle, the loop fires expirations through the engine.
    let (scheduler, scheduler_handle) =
        DeadlineScheduler::new(pool.clone(), config.scheduler_sweep_interval);
    let engine = ApprovalEngine::new(
        pool.clone(),
        Arc::new(scheduler_handle.clone()),
        cache.clone(),
    );
    scheduler.spawn(engine.clone());

    Ok(AppState {
        config: config.clone(),
        db: pool.clone(),
        auth: auth_service,
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
    })
}

fn chrono_duration(value: Duration) -> ChronoDuration {
    ChronoDuration::from_std(value).unwrap_or_else(|_| ChronoDuration::seconds(1))
}
