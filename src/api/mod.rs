//! API module
//!
//! HTTP trigger for load campaigns.

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

pub mod middleware;
pub mod routes;

pub use routes::{create_router, AppState};

/// Build the application router with every route under `base_path`
pub fn build_router(state: AppState, base_path: &str) -> Router {
    let api_router = Router::new()
        .route("/health", get(health_check))
        .merge(create_router())
        .layer(axum::middleware::from_fn(middleware::logging_middleware));

    // axum does not nest at the root
    let app = if base_path.is_empty() || base_path == "/" {
        Router::new().merge(api_router)
    } else {
        Router::new().nest(base_path, api_router)
    };

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CatchPanicLayer::custom(middleware::handle_panic)),
    )
    .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
