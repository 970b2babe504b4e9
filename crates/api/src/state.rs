use std::sync::Arc;

use atelier_comfyui::engine::Engine;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration; `/health` reports its request limits.
    pub config: Arc<ServerConfig>,
    /// Engine the request handlers submit job graphs to. Constructed once
    /// at startup; its correlation id lives as long as the process.
    pub engine: Arc<dyn Engine>,
}
