//! ComfyUI engine client.
//!
//! Submits job graphs over the engine's REST API, follows the job on a
//! per-submission WebSocket, and collects the images streamed back for the
//! graph's output nodes. [`engine::Engine`] is the trait request handlers
//! depend on; [`client::EngineClient`] is its production implementation.

pub mod api;
pub mod client;
pub mod engine;
pub mod messages;
pub mod reconnect;
pub mod session;
