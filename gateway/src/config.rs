use std::{collections::HashMap, env, time::Duration};

use anyhow::{Context, Result};

/// How a service's path segment maps onto its upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixRule {
    /// `/api/<svc>/x` is forwarded as `/api/x`.
    StripService,
    /// The identity service sees its paths verbatim (`/api/auth/...`).
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct ServiceTarget {
    pub name: String,
    pub base_url: String,
    pub prefix_rule: PrefixRule,
}

#[derive(Clone)]
pub struct GatewayConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_issuer: String,
    pub gateway_shared_token: String,
    pub frontend_origins: Vec<String>,
    /// Static service discovery: name → upstream, no load balancing.
    pub services: HashMap<String, ServiceTarget>,
    pub request_timeout: Duration,
    pub upstream_timeout: Duration,
    pub health_probe_timeout: Duration,
    /// Token-bucket defaults; per-minute rates.
    pub user_rate_per_min: u32,
    pub ip_rate_per_min: u32,
    pub redis_url: Option<String>,
    pub port: u16,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| "dev-secret".to_string());
        let gateway_shared_token =
            env::var("GATEWAY_SHARED_TOKEN").unwrap_or_else(|_| "dev-gateway-token".to_string());

        if is_production_environment() {
            if jwt_secret == "dev-secret" {
                anyhow::bail!("JWT_SECRET is still the default 'dev-secret' in production");
            }
            if gateway_shared_token == "dev-gateway-token" {
                anyhow::bail!("GATEWAY_SHARED_TOKEN is still the default in production");
            }
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set for the gateway")?,
            jwt_secret,
            jwt_audience: env::var("JWT_AUDIENCE").unwrap_or_else(|_| "retailops".to_string()),
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "retailops-api".to_string()),
            gateway_shared_token,
            frontend_origins: parse_origins(),
            services: parse_services("SERVICE_MAP"),
            request_timeout: parse_duration_seconds("REQUEST_TIMEOUT_SECS", 30),
            upstream_timeout: parse_duration_seconds("UPSTREAM_TIMEOUT_SECS", 25),
            health_probe_timeout: parse_duration_seconds("HEALTH_PROBE_TIMEOUT_SECS", 2),
            user_rate_per_min: parse_u32("RATE_LIMIT_USER_PER_MIN", 60),
            ip_rate_per_min: parse_u32("RATE_LIMIT_IP_PER_MIN", 600),
            redis_url: env::var("REDIS_URL").ok(),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
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
    match env::var("FRONTEND_ORIGINS") {
        Ok(list) => list
            .split(',')
            .filter_map(|item| {
                let trimmed = item.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect(),
        Err(_) => vec!["http://localhost:3000".to_string()],
    }
}

/// `SERVICE_MAP=auth=http://127.0.0.1:8081,sales=http://127.0.0.1:8081,...`
/// The identity service (`auth`) is the distinguished pass-through; every
/// other entry strips its service segment.
pub fn parse_services(key: &str) -> HashMap<String, ServiceTarget> {
    let raw = env::var(key).unwrap_or_else(|_| {
        "auth=http://127.0.0.1:8081,admin=http://127.0.0.1:8081,\
         sales=http://127.0.0.1:8081,inventory=http://127.0.0.1:8081,\
         finance=http://127.0.0.1:8081,dashboard=http://127.0.0.1:8081"
            .to_string()
    });

    raw.split(',')
        .filter_map(|item| {
            let (name, url) = item.trim().split_once('=')?;
            let name = name.trim().to_string();
            let url = url.trim().trim_end_matches('/').to_string();
            if name.is_empty() || url.is_empty() {
                return None;
            }
            let prefix_rule = if name == "auth" {
                PrefixRule::Passthrough
            } else {
                PrefixRule::StripService
            };
            Some((
                name.clone(),
                ServiceTarget {
                    name,
                    base_url: url,
                    prefix_rule,
                },
            ))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_service_map_passes_identity_through() {
        // No SERVICE_MAP in the test environment; defaults apply.
        let services = parse_services("SERVICE_MAP_TEST_UNSET");
        assert_eq!(
            services.get("auth").map(|s| s.prefix_rule),
            Some(PrefixRule::Passthrough)
        );
        assert_eq!(
            services.get("sales").map(|s| s.prefix_rule),
            Some(PrefixRule::StripService)
        );
        assert!(services.contains_key("finance"));
    }
}
