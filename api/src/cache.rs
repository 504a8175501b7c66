use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use approval_engine::CacheInvalidator;
use async_trait::async_trait;
use domain::EntityKind;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Shared-cache operations are bounded so a degraded backend cannot stall
/// request handling; a slow cache is treated as a miss.
const CACHE_OP_TIMEOUT: Duration = Duration::from_secs(1);

/// Cache over derived values that are expensive to recompute (pending-queue
/// counts, dashboard summaries). Entries are deleted, not marked stale, on
/// every transition that touches their source set; readers recompute on miss
/// and fill. Hard TTL bounds staleness when an invalidation is lost.
#[derive(Clone)]
pub struct InvariantCache {
    backend: CacheBackend,
}

#[derive(Clone)]
enum CacheBackend {
    Memory {
        inner: Arc<Mutex<HashMap<String, (Instant, String)>>>,
        ttl: Duration,
    },
    Redis {
        client: redis::Client,
        ttl: Duration,
    },
}

impl InvariantCache {
    pub fn new(ttl: Duration, redis_url: Option<String>) -> anyhow::Result<Self> {
        let backend = if let Some(url) = redis_url {
            CacheBackend::Redis {
                client: redis::Client::open(url)?,
                ttl,
            }
        } else {
            CacheBackend::Memory {
                inner: Arc::new(Mutex::new(HashMap::new())),
                ttl,
            }
        };
        Ok(Self { backend })
    }

    pub fn pending_key(tenant_id: Uuid, kind: EntityKind) -> String {
        format!("pending:{tenant_id}:{}", kind.as_str())
    }

    pub fn dashboard_key(tenant_id: Uuid) -> String {
        format!("dashboard:{tenant_id}")
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        match &self.backend {
            CacheBackend::Memory { inner, ttl } => {
                let mut guard = inner.lock().await;
                match guard.get(key) {
                    Some((stored, value)) if stored.elapsed() < *ttl => Some(value.clone()),
                    Some(_) => {
                        guard.remove(key);
                        None
                    }
                    None => None,
                }
            }
            CacheBackend::Redis { client, .. } => {
                let op = async {
                    let mut conn = client.get_multiplexed_async_connection().await?;
                    redis::cmd("GET")
                        .arg(key)
                        .query_async::<_, Option<String>>(&mut conn)
                        .await
                };
                match tokio::time::timeout(CACHE_OP_TIMEOUT, op).await {
                    Ok(Ok(value)) => value,
                    Ok(Err(err)) => {
                        warn!(error = %err, "cache read failed, treating as miss");
                        None
                    }
                    Err(_) => {
                        warn!("cache read timed out, treating as miss");
                        None
                    }
                }
            }
        }
    }

    pub async fn put(&self, key: &str, value: String) {
        match &self.backend {
            CacheBackend::Memory { inner, .. } => {
                inner
                    .lock()
                    .await
                    .insert(key.to_string(), (Instant::now(), value));
            }
            CacheBackend::Redis { client, ttl } => {
                let op = async {
                    let mut conn = client.get_multiplexed_async_connection().await?;
                    redis::cmd("SET")
                        .arg(key)
                        .arg(value)
                        .arg("EX")
                        .arg(ttl.as_secs() as usize)
                        .query_async::<_, ()>(&mut conn)
                        .await
                };
                match tokio::time::timeout(CACHE_OP_TIMEOUT, op).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(error = %err, "cache write failed"),
                    Err(_) => warn!("cache write timed out"),
                }
            }
        }
    }

    /// Drops the derived values whose source set a transition just touched.
    pub async fn invalidate_kind(&self, tenant_id: Uuid, kind: EntityKind) {
        self.remove(&Self::pending_key(tenant_id, kind)).await;
        self.remove(&Self::dashboard_key(tenant_id)).await;
    }

    pub async fn remove(&self, key: &str) {
        match &self.backend {
            CacheBackend::Memory { inner, .. } => {
                inner.lock().await.remove(key);
            }
            CacheBackend::Redis { client, .. } => {
                let op = async {
                    let mut conn = client.get_multiplexed_async_connection().await?;
                    redis::cmd("DEL")
                        .arg(key)
                        .query_async::<_, ()>(&mut conn)
                        .await
                };
                match tokio::time::timeout(CACHE_OP_TIMEOUT, op).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(error = %err, "cache invalidation failed"),
                    Err(_) => warn!("cache invalidation timed out"),
                }
            }
        }
    }
}

#[async_trait]
impl CacheInvalidator for InvariantCache {
    async fn invalidate(&self, tenant_id: Uuid, kind: EntityKind) {
        self.invalidate_kind(tenant_id, kind).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_round_trip() {
        let cache = InvariantCache::new(Duration::from_secs(60), None).unwrap();
        assert_eq!(cache.get("k").await, None);
        cache.put("k", "42".to_string()).await;
        assert_eq!(cache.get("k").await, Some("42".to_string()));
        cache.remove("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn memory_cache_expires() {
        let cache = InvariantCache::new(Duration::from_millis(10), None).unwrap();
        cache.put("k", "42".to_string()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn invalidation_clears_pending_and_dashboard() {
        let cache = InvariantCache::new(Duration::from_secs(60), None).unwrap();
        let tenant = Uuid::new_v4();
        let pending = InvariantCache::pending_key(tenant, EntityKind::Sale);
        let dashboard = InvariantCache::dashboard_key(tenant);
        cache.put(&pending, "3".to_string()).await;
        cache.put(&dashboard, "{}".to_string()).await;

        cache.invalidate(tenant, EntityKind::Sale).await;
        assert_eq!(cache.get(&pending).await, None);
        assert_eq!(cache.get(&dashboard).await, None);

        // Other tenants are untouched.
        let other = InvariantCache::pending_key(Uuid::new_v4(), EntityKind::Sale);
        cache.put(&other, "9".to_string()).await;
        cache.invalidate(tenant, EntityKind::Sale).await;
        assert_eq!(cache.get(&other).await, Some("9".to_string()));
    }
}
