use std::sync::Arc;

use auth::AuthService;

use crate::{config::GatewayConfig, rate_limit::RateLimiter};

#[derive(Clone)]
pub struct GatewayState {
    pub config: GatewayConfig,
    /// Full validation (signature + live session); the gateway is the outer
    /// trust boundary.
    pub auth: Arc<dyn AuthService>,
    pub limiter: RateLimiter,
    pub client: reqwest::Client,
}

#[allow(dead_code)]
fn _assert_state_bounds() {
    fn assert_bounds<T: Clone + Send + Sync + 'static>() {}
    assert_bounds::<GatewayState>();
}
