pub mod app_state;
pub mod rate_limit;
pub mod router;
pub mod status_api;
