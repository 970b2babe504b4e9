pub mod health;
pub mod operations;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /style-transfer                 restyle an image from a prompt (POST)
/// /portrait-enhancement           retouch a portrait (POST)
/// /background-removal             cut out the subject (POST)
/// /background-swap                replace the background from a prompt (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().merge(operations::router())
}
