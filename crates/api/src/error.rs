use atelier_comfyui::engine::EngineError;
use atelier_core::error::CoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and [`EngineError`] for engine
/// transport failures, and adds HTTP-specific variants. Implements
/// [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `atelier_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The engine could not run the job.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The engine finished the job without producing an output image.
    #[error("{operation} produced no image at node {node}")]
    EmptyResult {
        operation: &'static str,
        node: &'static str,
    },

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::InvalidImage(msg) => {
                    tracing::warn!(error = %msg, "Rejected undecodable upload");
                    (
                        StatusCode::BAD_REQUEST,
                        "INVALID_IMAGE",
                        "Uploaded file is not a supported image".to_string(),
                    )
                }
                CoreError::InvalidGraph(msg) | CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    internal()
                }
            },

            // --- Engine errors ---
            AppError::Engine(err) => classify_engine_error(err),

            AppError::EmptyResult { operation, node } => {
                tracing::error!(operation, node, "Engine completed without an output image");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PROCESSING_FAILED",
                    "Processing finished without producing an image".to_string(),
                )
            }

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

/// Classify an engine failure into an HTTP status, error code, and message.
///
/// - Unreachable, rejected or dropped connections map to 502.
/// - A job that outlives the engine timeout maps to 504.
/// - Failures reported by the engine while executing map to 502.
fn classify_engine_error(err: &EngineError) -> (StatusCode, &'static str, String) {
    match err {
        EngineError::Connection(_) | EngineError::Submit(_) | EngineError::ConnectionClosed { .. } => {
            tracing::error!(kind = err.kind(), error = %err, "Engine unavailable");
            (
                StatusCode::BAD_GATEWAY,
                "ENGINE_UNAVAILABLE",
                "Image engine is unavailable".to_string(),
            )
        }
        EngineError::Timeout { prompt_id, timeout } => {
            tracing::error!(?prompt_id, timeout_secs = timeout.as_secs(), "Engine timed out");
            (
                StatusCode::GATEWAY_TIMEOUT,
                "ENGINE_TIMEOUT",
                "Image engine did not finish in time".to_string(),
            )
        }
        EngineError::Execution {
            prompt_id,
            node_id,
            message,
        } => {
            tracing::error!(prompt_id = %prompt_id, ?node_id, error = %message, "Engine execution failed");
            (
                StatusCode::BAD_GATEWAY,
                "ENGINE_EXECUTION_FAILED",
                "Image engine failed while processing".to_string(),
            )
        }
        EngineError::Cancelled { prompt_id } => {
            tracing::warn!(?prompt_id, "Engine job cancelled");
            internal()
        }
    }
}
