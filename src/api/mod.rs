//! API layer -- axum routes, handlers, and middleware.

mod error;
mod routes;
pub mod state;

pub use error::ApiError;

use self::state::AppState;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the application router: REST API under `/api`, the HTML UI at
/// the root.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api", routes::api_routes())
        .merge(crate::ui::routes())
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}
