pub mod builds;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /builds                      submit (POST)
/// /builds/{id}                 status poll (GET), discard (DELETE)
/// /builds/{id}/download        artifact retrieval (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/builds", builds::router())
}
