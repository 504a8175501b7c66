use axum::{extract::State, routing::get, Json, Router};
use futures::future::join_all;
use serde::Serialize;

use crate::{config::PrefixRule, state::GatewayState};

pub fn router() -> Router<GatewayState> {
    Router::new()
        .route("/gateway/health", get(health))
        .route("/gateway/services", get(services))
}

#[derive(Serialize)]
struct ServiceHealth {
    name: String,
    base_url: String,
    healthy: bool,
}

#[derive(Serialize)]
struct HealthView {
    healthy: bool,
    services: Vec<ServiceHealth>,
}

/// Probes every upstream's `/healthz` and reports the aggregate.
async fn health(State(state): State<GatewayState>) -> Json<HealthView> {
    let probes = state.config.services.values().map(|target| {
        let client = state.client.clone();
        let name = target.name.clone();
        let base_url = target.base_url.clone();
        let timeout = state.config.health_probe_timeout;
        async move {
            let healthy = client
                .get(format!("{base_url}/healthz"))
                .timeout(timeout)
                .send()
                .await
                .map(|resp| resp.status().is_success())
                .unwrap_or(false);
            ServiceHealth {
                name,
                base_url,
                healthy,
            }
        }
    });

    let mut services: Vec<ServiceHealth> = join_all(probes).await;
    services.sort_by(|a, b| a.name.cmp(&b.name));
    let healthy = services.iter().all(|service| service.healthy);
    Json(HealthView { healthy, services })
}

#[derive(Serialize)]
struct ServiceEntry {
    name: String,
    base_url: String,
    prefix_rule: &'static str,
}

/// The static discovery map, as configured.
async fn services(State(state): State<GatewayState>) -> Json<Vec<ServiceEntry>> {
    let mut entries: Vec<ServiceEntry> = state
        .config
        .services
        .values()
        .map(|target| ServiceEntry {
            name: target.name.clone(),
            base_url: target.base_url.clone(),
            prefix_rule: match target.prefix_rule {
                PrefixRule::Passthrough => "passthrough",
                PrefixRule::StripService => "strip_service",
            },
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Json(entries)
}
