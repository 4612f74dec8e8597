use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{delete, get, options, patch, post};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

use crate::handlers;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let base = state.config.base_path.clone();
    let with_id = format!("{base}/{{id}}");

    let mut router = Router::new()
        .route(&base, post(handlers::create).options(handlers::options))
        .route(
            &with_id,
            get(handlers::get)
                .head(handlers::head)
                .patch(handlers::patch)
                .delete(handlers::delete),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(state.config.timeout_secs)))
        .with_state(state.clone());

    if state.config.cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }

    router
}
