pub mod media;
pub mod members;
pub mod rate_limiter;
pub mod refresher;
pub mod snapshot;
