//! Router configuration for the adjustment API.

use axum::{routing::{get, post}, Router};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Adjustment requests
        .route("/api/adjustments", post(handlers::submit_adjustment))
        .route("/api/adjustments/:request_id", get(handlers::get_adjustment))
        .route(
            "/api/adjustments/:request_id/result",
            get(handlers::get_adjustment_result),
        )
        .route(
            "/api/adjustments/:request_id/history",
            get(handlers::get_history),
        )
        .route(
            "/api/adjustments/:request_id/cancel",
            post(handlers::cancel_adjustment),
        )
        .route(
            "/api/adjustments/:request_id/retry",
            post(handlers::retry_adjustment),
        )
        // Variations of a saved recipe
        .route(
            "/api/saved-recipes/:saved_recipe_id/versions",
            get(handlers::list_versions),
        )
        .route(
            "/api/saved-recipes/:saved_recipe_id/active",
            get(handlers::get_active),
        )
        .route(
            "/api/saved-recipes/:saved_recipe_id/versions/:version_id/diff",
            get(handlers::version_diff),
        )
        .route(
            "/api/saved-recipes/:saved_recipe_id/versions/:version_id/activate",
            post(handlers::activate_version),
        )
        .route(
            "/api/saved-recipes/:saved_recipe_id/versions/:version_id/rollback",
            post(handlers::rollback_version),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
