use std::{collections::HashMap, sync::Arc, time::Instant};

use tokio::sync::Mutex;
use tracing::warn;

/// Per-key token bucket: `rate_per_min` tokens refill continuously, bursts up
/// to one minute's worth. The Redis backend degrades to a fixed one-minute
/// window, which is close enough for admission control and keeps the check a
/// single round trip.
#[derive(Clone)]
pub struct RateLimiter {
    backend: LimiterBackend,
}

#[derive(Clone)]
enum LimiterBackend {
    Memory {
        buckets: Arc<Mutex<HashMap<String, Bucket>>>,
    },
    Redis {
        client: redis::Client,
    },
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

impl RateLimiter {
    pub fn new(redis_url: Option<String>) -> anyhow::Result<Self> {
        let backend = if let Some(url) = redis_url {
            LimiterBackend::Redis {
                client: redis::Client::open(url)?,
            }
        } else {
            LimiterBackend::Memory {
                buckets: Arc::new(Mutex::new(HashMap::new())),
            }
        };
        Ok(Self { backend })
    }

    pub async fn check(&self, key: &str, rate_per_min: u32) -> RateDecision {
        match &self.backend {
            LimiterBackend::Memory { buckets } => {
                let mut guard = buckets.lock().await;
                let now = Instant::now();
                let burst = rate_per_min as f64;
                let bucket = guard.entry(key.to_string()).or_insert(Bucket {
                    tokens: burst,
                    last_refill: now,
                });

                let refill =
                    now.duration_since(bucket.last_refill).as_secs_f64() * (rate_per_min as f64)
                        / 60.0;
                bucket.tokens = (bucket.tokens + refill).min(burst);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    RateDecision::Allowed
                } else {
                    let deficit = 1.0 - bucket.tokens;
                    let wait = deficit * 60.0 / (rate_per_min as f64);
                    RateDecision::Limited {
                        retry_after_secs: wait.ceil() as u64,
                    }
                }
            }
            LimiterBackend::Redis { client } => {
                let mut conn = match client.get_multiplexed_async_connection().await {
                    Ok(conn) => conn,
                    Err(err) => {
                        // Fail open: a cache outage must not take the API down.
                        warn!(error = %err, "rate limiter backend unreachable, allowing");
                        return RateDecision::Allowed;
                    }
                };
                let window_key = format!("rate:{key}");
                let count: Result<u64, _> = redis::cmd("INCR")
                    .arg(&window_key)
                    .query_async(&mut conn)
                    .await;
                match count {
                    Ok(count) => {
                        if count == 1 {
                            let _: Result<(), _> = redis::cmd("EXPIRE")
                                .arg(&window_key)
                                .arg(60)
                                .query_async(&mut conn)
                                .await;
                        }
                        if count <= rate_per_min as u64 {
                            RateDecision::Allowed
                        } else {
                            let ttl: i64 = redis::cmd("TTL")
                                .arg(&window_key)
                                .query_async(&mut conn)
                                .await
                                .unwrap_or(60);
                            RateDecision::Limited {
                                retry_after_secs: ttl.max(1) as u64,
                            }
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "rate limiter backend error, allowing");
                        RateDecision::Allowed
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn allows_up_to_burst_then_limits() {
        let limiter = RateLimiter::new(None).unwrap();
        for _ in 0..5 {
            assert!(matches!(
                limiter.check("user:1", 5).await,
                RateDecision::Allowed
            ));
        }
        match limiter.check("user:1", 5).await {
            RateDecision::Limited { retry_after_secs } => assert!(retry_after_secs >= 1),
            RateDecision::Allowed => panic!("expected limit after burst"),
        }
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new(None).unwrap();
        for _ in 0..3 {
            limiter.check("ip:10.0.0.1", 3).await;
        }
        assert!(matches!(
            limiter.check("ip:10.0.0.2", 3).await,
            RateDecision::Allowed
        ));
    }

    #[tokio::test]
    async fn bucket_refills_over_time() {
        let limiter = RateLimiter::new(None).unwrap();
        // Exhaust a high-rate bucket, then wait for a refill tick.
        for _ in 0..60 {
            limiter.check("user:refill", 60).await;
        }
        assert!(matches!(
            limiter.check("user:refill", 60).await,
            RateDecision::Limited { .. }
        ));
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(matches!(
            limiter.check("user:refill", 60).await,
            RateDecision::Allowed
        ));
    }
}
