//! Rate limiting for the control routes
//!
//! Per peer IP, using tower_governor's GCRA implementation. Requires the
//! service to be served with `into_make_service_with_connect_info::<SocketAddr>()`.

use governor::middleware::StateInformationMiddleware;
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::PeerIpKeyExtractor;

use crate::config::ApiConfig;

/// Governor config with X-RateLimit-* response headers
pub type ControlGovernorConfig =
    tower_governor::governor::GovernorConfig<PeerIpKeyExtractor, StateInformationMiddleware>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Seconds after which one request of the quota is replenished
    pub per_second: u64,
    /// Requests allowed at once
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 2,
            burst_size: 5,
        }
    }
}

impl From<&ApiConfig> for RateLimitConfig {
    fn from(api: &ApiConfig) -> Self {
        Self {
            per_second: api.control_per_second.max(1),
            burst_size: api.control_burst.max(1),
        }
    }
}

/// Build the governor config. `None` when the quota is rejected by governor.
pub fn create_governor_config(config: &RateLimitConfig) -> Option<Arc<ControlGovernorConfig>> {
    GovernorConfigBuilder::default()
        .per_second(config.per_second)
        .burst_size(config.burst_size)
        .use_headers()
        .finish()
        .map(Arc::new)
}
