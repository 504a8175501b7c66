use std::{env, time::Duration};

use anyhow::{Context, Result};

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_issuer: String,
    /// Shared secret that marks a request as gateway-originated; identity
    /// headers are trusted only when it matches.
    pub gateway_shared_token: String,
    pub frontend_origins: Vec<String>,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// Wall-clock budget for a pending money collection (D).
    pub collection_deadline: Duration,
    pub scheduler_sweep_interval: Duration,
    pub cache_ttl: Duration,
    pub session_cache_ttl: Duration,
    pub max_login_failures: u32,
    pub login_failure_window: Duration,
    pub login_cooldown: Duration,
    pub request_timeout: Duration,
    pub db_statement_timeout: Duration,
    pub redis_url: Option<String>,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| "dev-secret".to_string());
        let gateway_shared_token =
            env::var("GATEWAY_SHARED_TOKEN").unwrap_or_else(|_| "dev-gateway-token".to_string());

        if is_production_environment() {
            if jwt_secret == "dev-secret" {
                anyhow::bail!(
                    "JWT_SECRET is still the default 'dev-secret' in production; \
                     anyone could forge tokens. Set a strong random value."
                );
            }
            if gateway_shared_token == "dev-gateway-token" {
                anyhow::bail!(
                    "GATEWAY_SHARED_TOKEN is still the default in production; \
                     identity headers could be forged. Set a strong random value."
                );
            }
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set for the API server")?,
            jwt_secret,
            jwt_audience: env::var("JWT_AUDIENCE").unwrap_or_else(|_| "retailops".to_string()),
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "retailops-api".to_string()),
            gateway_shared_token,
            frontend_origins: parse_origins(),
            access_token_ttl: parse_duration_seconds("ACCESS_TOKEN_TTL_SECS", 86_400),
            refresh_token_ttl: parse_duration_seconds("REFRESH_TOKEN_TTL_SECS", 604_800),
            collection_deadline: parse_duration_seconds("COLLECTION_DEADLINE_SECS", 900),
            scheduler_sweep_interval: parse_duration_seconds("SCHEDULER_SWEEP_SECS", 30),
            cache_ttl: parse_duration_seconds("CACHE_TTL_SECS", 300),
            session_cache_ttl: parse_duration_seconds("SESSION_CACHE_TTL_SECS", 5),
            max_login_failures: parse_u32("MAX_LOGIN_FAILURES", 5),
            login_failure_window: parse_duration_seconds("LOGIN_FAILURE_WINDOW_SECS", 300),
            login_cooldown: parse_duration_seconds("LOGIN_COOLDOWN_SECS", 300),
            request_timeout: parse_duration_seconds("REQUEST_TIMEOUT_SECS", 30),
            db_statement_timeout: parse_duration_seconds("DB_STATEMENT_TIMEOUT_SECS", 10),
            redis_url: env::var("REDIS_URL").ok(),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8081".to_string())
                .parse()
                .context("PORT must be a valid u16")?,
        })
    }
}

fn is_production_environment() -> bool {
    env::var("ENVIRONMENT")
        .or_else(|_| env::var("ENV"))
        .map(|e| {
            let lower = e.to_lowercase();
            lower == "production" || lower == "prod"
        })
        .unwrap_or(false)
}

fn parse_origins() -> Vec<String> {
    if let Ok(list) = env::var("FRONTEND_ORIGINS") {
        split_origins(&list)
    } else if let Ok(origin) = env::var("FRONTEND_ORIGIN") {
        split_origins(&origin)
    } else {
        vec!["http://localhost:3000".to_string()]
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|item| {
            let trimmed = item.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

fn parse_duration_seconds(key: &str, default: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default))
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
