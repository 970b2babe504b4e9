//! Route definitions for the image operation endpoints.
//!
//! Mounted at the root of the `/api/v1` tree.

use axum::routing::post;
use axum::Router;

use crate::handlers::operations;
use crate::state::AppState;

/// Build the operations router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/style-transfer", post(operations::style_transfer))
        .route("/portrait-enhancement", post(operations::portrait_enhancement))
        .route("/background-removal", post(operations::background_removal))
        .route("/background-swap", post(operations::background_swap))
}
