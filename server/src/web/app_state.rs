use std::sync::Arc;

use crate::engine::rate_limiter::RateLimiter;
use crate::engine::snapshot::StatusCache;

/// Shared state handed to every HTTP handler.
pub struct AppState {
    pub cache: Arc<StatusCache>,
    pub limiter: RateLimiter,
}
