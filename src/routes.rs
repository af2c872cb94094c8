use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::handlers;

/// Build the service router: the index at `/`, everything else handled by
/// the catch-all browse handler.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .fallback(get(handlers::browse))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
