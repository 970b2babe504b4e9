//! Request handlers.
//!
//! Handlers parse and validate their input, delegate graph construction to
//! `atelier_core` and execution to the shared [`Engine`](atelier_comfyui::engine::Engine),
//! and map errors via [`AppError`](crate::error::AppError).

pub mod operations;
