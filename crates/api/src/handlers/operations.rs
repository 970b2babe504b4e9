//! Handlers for the image operation endpoints.
//!
//! Every endpoint accepts a multipart upload with an `image` part plus
//! operation-specific text fields, and answers with the raw bytes of the
//! processed image.

use atelier_core::operations::{
    parse_strength, validate_prompt, EnhancementLevel, Operation, DEFAULT_STYLE_STRENGTH,
};
use atelier_core::source_image::{content_type_for, SourceImage};
use axum::extract::{Multipart, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};

use crate::error::{AppError, AppResult};
use crate::form::UploadForm;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/style-transfer
///
/// Fields: `image`, `style_prompt` (required), `strength` (optional,
/// `0.0..=1.0`, default 0.6).
pub async fn style_transfer(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Response> {
    let form = UploadForm::from_multipart(multipart).await?;
    let style_prompt = validate_prompt("style_prompt", form.require_field("style_prompt")?)?;
    let strength = match form.field("strength") {
        Some(raw) => parse_strength(raw)?,
        None => DEFAULT_STYLE_STRENGTH,
    };

    run_operation(
        &state,
        &form,
        Operation::StyleTransfer {
            style_prompt,
            strength,
        },
    )
    .await
}

/// POST /api/v1/portrait-enhancement
///
/// Fields: `image`, `enhancement_level` (optional, one of `light`,
/// `medium`, `heavy`; default `medium`).
pub async fn portrait_enhancement(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Response> {
    let form = UploadForm::from_multipart(multipart).await?;
    let level = match form.field("enhancement_level") {
        Some(raw) => raw.parse::<EnhancementLevel>()?,
        None => EnhancementLevel::default(),
    };

    run_operation(&state, &form, Operation::PortraitEnhancement { level }).await
}

/// POST /api/v1/background-removal
pub async fn background_removal(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Response> {
    let form = UploadForm::from_multipart(multipart).await?;
    run_operation(&state, &form, Operation::BackgroundRemoval).await
}

/// POST /api/v1/background-swap
///
/// Fields: `image`, `background_prompt` (required).
pub async fn background_swap(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Response> {
    let form = UploadForm::from_multipart(multipart).await?;
    let background_prompt =
        validate_prompt("background_prompt", form.require_field("background_prompt")?)?;

    run_operation(
        &state,
        &form,
        Operation::BackgroundSwap { background_prompt },
    )
    .await
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Decode the upload, build the operation's graph, run it on the engine and
/// return the first image of the output node.
async fn run_operation(state: &AppState, form: &UploadForm, op: Operation) -> AppResult<Response> {
    let upload = form.require_image()?.to_vec();
    let name = op.name();
    let output_node = op.output_node();

    // Decoding and PNG re-encoding are CPU-bound.
    let (graph, width, height) = tokio::task::spawn_blocking(move || {
        let source = SourceImage::decode(&upload)?;
        let graph = op.build(&source)?;
        Ok::<_, AppError>((graph, source.width(), source.height()))
    })
    .await
    .map_err(|e| AppError::InternalError(format!("graph build task failed: {e}")))??;

    tracing::info!(
        operation = name,
        width,
        height,
        nodes = graph.len(),
        "Submitting image operation",
    );

    let results = state.engine.execute(&graph).await?;

    let image = results
        .first_image(output_node)
        .ok_or(AppError::EmptyResult {
            operation: name,
            node: output_node,
        })?
        .to_vec();

    tracing::info!(operation = name, bytes = image.len(), "Image operation completed");

    Ok(([(CONTENT_TYPE, content_type_for(&image))], image).into_response())
}
