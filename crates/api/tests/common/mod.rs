#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atelier_comfyui::engine::{Engine, EngineError};
use atelier_core::graph::{JobGraph, ResultSet};
use atelier_core::operations::OUTPUT_NODE_ID;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use atelier_api::config::ServerConfig;
use atelier_api::router::build_app_router;
use atelier_api::state::AppState;

pub const BOUNDARY: &str = "atelier-test-boundary";

// ---------------------------------------------------------------------------
// Fake engine
// ---------------------------------------------------------------------------

/// What the fake engine answers to every submission.
pub enum Outcome {
    /// Complete with these bytes at the output node.
    Image(Vec<u8>),
    /// Complete without any output image.
    Empty,
    /// Fail with the error built by this closure.
    Fail(fn() -> EngineError),
}

/// In-memory [`Engine`] that records submitted graphs.
pub struct FakeEngine {
    outcome: Outcome,
    healthy: bool,
    calls: AtomicUsize,
    graphs: Mutex<Vec<JobGraph>>,
}

impl FakeEngine {
    pub fn new(outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            healthy: true,
            calls: AtomicUsize::new(0),
            graphs: Mutex::new(Vec::new()),
        })
    }

    pub fn unhealthy() -> Arc<Self> {
        Arc::new(Self {
            outcome: Outcome::Empty,
            healthy: false,
            calls: AtomicUsize::new(0),
            graphs: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recently submitted graph.
    pub fn last_graph(&self) -> JobGraph {
        self.graphs
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no graph was submitted")
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn execute(&self, graph: &JobGraph) -> Result<ResultSet, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.graphs.lock().unwrap().push(graph.clone());
        match &self.outcome {
            Outcome::Image(bytes) => {
                let mut results = ResultSet::new();
                results.push(OUTPUT_NODE_ID, bytes.clone());
                Ok(results)
            }
            Outcome::Empty => Ok(ResultSet::new()),
            Outcome::Fail(make) => Err(make()),
        }
    }

    async fn is_healthy(&self) -> bool {
        self.healthy
    }
}

pub fn timeout_error() -> EngineError {
    EngineError::Timeout {
        prompt_id: Some("job-1".to_string()),
        timeout: Duration::from_secs(300),
    }
}

pub fn closed_error() -> EngineError {
    EngineError::ConnectionClosed {
        prompt_id: "job-1".to_string(),
        reason: "stream ended".to_string(),
    }
}

pub fn unreachable_error() -> EngineError {
    EngineError::Connection("connection refused".to_string())
}

pub fn execution_error() -> EngineError {
    EngineError::Execution {
        prompt_id: "job-1".to_string(),
        node_id: Some("6".to_string()),
        message: "torch.OutOfMemoryError: CUDA out of memory".to_string(),
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        max_upload_bytes: 20 * 1024 * 1024,
        comfyui_api_url: "http://127.0.0.1:8188".to_string(),
        comfyui_ws_url: "ws://127.0.0.1:8188".to_string(),
        engine_timeout_secs: 5,
        max_concurrent_jobs: 1,
        engine_connect_attempts: 1,
    }
}

/// Build the full application router around `engine`, through the same
/// builder the binary uses.
pub fn build_test_app(engine: Arc<FakeEngine>) -> Router {
    let config = test_config();
    let state = AppState {
        config: Arc::new(config.clone()),
        engine,
    };
    build_app_router(state, &config)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// A multipart part: text field or file.
pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a [u8]),
}

/// Encode `parts` as a `multipart/form-data` body using [`BOUNDARY`].
pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"upload.png\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn post_multipart(app: Router, uri: &str, parts: &[Part<'_>]) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

// ---------------------------------------------------------------------------
// Fixtures and bodies
// ---------------------------------------------------------------------------

/// A small valid PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// PNG signature followed by filler, recognisable as PNG output.
pub fn fake_png_output() -> Vec<u8> {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(b"engine-output");
    bytes
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
