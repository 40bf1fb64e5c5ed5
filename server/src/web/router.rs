use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};

use super::app_state::AppState;
use super::rate_limit::status_rate_limit;
use super::status_api;

/// Build the axum router with the status and liveness routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    // The widget is embedded on arbitrary sites; every origin is allowed.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let status_routes = Router::new()
        .route("/status", get(status_api::get_status))
        // Path the widget was first published with.
        .route("/tgk-status", get(status_api::get_status))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            status_rate_limit,
        ));

    Router::new()
        .route("/", get(status_api::liveness))
        .merge(status_routes)
        .layer(cors)
        .with_state(state)
}
