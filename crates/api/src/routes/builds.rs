//! Route definitions for the `/builds` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::builds;
use crate::state::AppState;

/// Routes mounted at `/builds`.
///
/// ```text
/// POST   /                -> submit_build
/// GET    /{id}            -> get_build
/// DELETE /{id}            -> discard_build
/// GET    /{id}/download   -> download_build
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(builds::submit_build))
        .route(
            "/{id}",
            get(builds::get_build).delete(builds::discard_build),
        )
        .route("/{id}/download", get(builds::download_build))
}
