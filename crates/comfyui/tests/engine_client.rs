//! End-to-end tests for `EngineClient` against an in-process simulated
//! ComfyUI: a `/prompt` route that assigns a fixed job id and a `/ws`
//! route that plays a scripted frame sequence once the job is submitted.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use atelier_comfyui::api::ComfyUIApiError;
use atelier_comfyui::client::{EngineClient, EngineConfig};
use atelier_comfyui::engine::{Engine, EngineError};
use atelier_comfyui::reconnect::ReconnectConfig;
use atelier_core::graph::{JobGraph, Node, NodeInput};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const PROMPT_ID: &str = "job-0001";
const OUTPUT: &str = "save_image_websocket_node";

// ---------------------------------------------------------------------------
// Simulated engine
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Clone, Copy, PartialEq)]
enum Ending {
    /// Send a close frame after the script.
    Close,
    /// Keep the socket open and silent until the client leaves.
    Hang,
}

#[derive(Default)]
struct Recorded {
    ws_client_ids: Vec<String>,
    submissions: Vec<Value>,
    deleted: Vec<Value>,
}

struct MockEngine {
    script: Vec<Frame>,
    ending: Ending,
    reject_submit: bool,
    /// Stall `/system_stats` well past any test's HTTP timeout.
    slow_stats: bool,
    submitted: Notify,
    recorded: Mutex<Recorded>,
}

impl MockEngine {
    fn new(script: Vec<Frame>, ending: Ending) -> Self {
        Self {
            script,
            ending,
            reject_submit: false,
            slow_stats: false,
            submitted: Notify::new(),
            recorded: Mutex::new(Recorded::default()),
        }
    }

    fn has_submission(&self) -> bool {
        !self.recorded.lock().unwrap().submissions.is_empty()
    }
}

async fn prompt(State(engine): State<Arc<MockEngine>>, Json(body): Json<Value>) -> Response {
    if engine.reject_submit {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"type": "prompt_outputs_failed_validation"}})),
        )
            .into_response();
    }
    engine.recorded.lock().unwrap().submissions.push(body);
    engine.submitted.notify_one();
    Json(json!({"prompt_id": PROMPT_ID, "number": 3, "node_errors": {}})).into_response()
}

async fn queue(State(engine): State<Arc<MockEngine>>, Json(body): Json<Value>) -> StatusCode {
    engine.recorded.lock().unwrap().deleted.push(body);
    StatusCode::OK
}

async fn system_stats(State(engine): State<Arc<MockEngine>>) -> Json<Value> {
    if engine.slow_stats {
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
    Json(json!({"system": {"os": "posix"}, "devices": []}))
}

async fn ws(
    State(engine): State<Arc<MockEngine>>,
    Query(params): Query<HashMap<String, String>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    if let Some(id) = params.get("clientId") {
        engine.recorded.lock().unwrap().ws_client_ids.push(id.clone());
    }
    upgrade.on_upgrade(move |socket| play_script(socket, engine))
}

async fn play_script(mut socket: WebSocket, engine: Arc<MockEngine>) {
    engine.submitted.notified().await;
    for frame in &engine.script {
        let msg = match frame {
            Frame::Text(text) => Message::Text(text.clone().into()),
            Frame::Binary(bytes) => Message::Binary(bytes.clone().into()),
        };
        if socket.send(msg).await.is_err() {
            return;
        }
    }
    match engine.ending {
        Ending::Close => {
            let _ = socket.send(Message::Close(None)).await;
        }
        Ending::Hang => while let Some(Ok(_)) = socket.recv().await {},
    }
}

async fn spawn_engine(engine: MockEngine) -> (SocketAddr, Arc<MockEngine>) {
    let engine = Arc::new(engine);
    let app = Router::new()
        .route("/prompt", post(prompt))
        .route("/queue", post(queue))
        .route("/system_stats", get(system_stats))
        .route("/ws", get(ws))
        .with_state(Arc::clone(&engine));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, engine)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn client_for(addr: SocketAddr, job_timeout: Duration) -> EngineClient {
    let mut config = EngineConfig::new(format!("http://{addr}"), format!("ws://{addr}"));
    config.job_timeout = job_timeout;
    config.reconnect = ReconnectConfig {
        max_attempts: 1,
        ..Default::default()
    };
    EngineClient::new(config)
}

fn graph() -> JobGraph {
    let mut graph = JobGraph::new();
    graph.insert(
        "1",
        Node::new("ETN_LoadImageBase64").with_input("image", NodeInput::literal("iVBORw0KGgo=")),
    );
    graph.insert(
        OUTPUT,
        Node::new("SaveImageWebsocket").with_input("images", NodeInput::link("1", 0)),
    );
    graph
}

fn executing(prompt_id: &str, node: Option<&str>) -> Frame {
    Frame::Text(json!({"type": "executing", "data": {"node": node, "prompt_id": prompt_id}}).to_string())
}

fn image_frame(payload: &[u8]) -> Frame {
    let mut raw = vec![0, 0, 0, 1, 0, 0, 0, 2];
    raw.extend_from_slice(payload);
    Frame::Binary(raw)
}

fn status(queue_remaining: i32) -> Frame {
    Frame::Text(
        json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": queue_remaining}}}})
            .to_string(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn collects_output_image_after_own_completion() {
    let (addr, engine) = spawn_engine(MockEngine::new(
        vec![
            status(1),
            executing("another-clients-job", None),
            executing(PROMPT_ID, Some("1")),
            executing(PROMPT_ID, Some(OUTPUT)),
            image_frame(b"\x89PNG-result"),
            executing(PROMPT_ID, None),
        ],
        Ending::Hang,
    ))
    .await;
    let client = client_for(addr, Duration::from_secs(5));

    let results = client.execute(&graph()).await.unwrap();

    assert_eq!(results.first_image(OUTPUT), Some(&b"\x89PNG-result"[..]));

    let recorded = engine.recorded.lock().unwrap();
    assert_eq!(recorded.ws_client_ids, vec![client.client_id().to_string()]);
    let submission = &recorded.submissions[0];
    assert_eq!(submission["client_id"], client.client_id());
    assert_eq!(submission["prompt"][OUTPUT]["inputs"]["images"], json!(["1", 0]));
}

#[tokio::test]
async fn connection_closed_before_completion_is_an_error() {
    let (addr, _engine) = spawn_engine(MockEngine::new(
        vec![
            executing(PROMPT_ID, Some(OUTPUT)),
            image_frame(b"partial"),
            executing("another-clients-job", None),
        ],
        Ending::Close,
    ))
    .await;
    let client = client_for(addr, Duration::from_secs(5));

    let err = client.execute(&graph()).await.unwrap_err();

    assert_matches!(err, EngineError::ConnectionClosed { prompt_id, .. } if prompt_id == PROMPT_ID);
}

#[tokio::test]
async fn silent_engine_times_out_and_job_is_discarded() {
    let (addr, engine) =
        spawn_engine(MockEngine::new(vec![executing(PROMPT_ID, Some("1"))], Ending::Hang)).await;
    let client = client_for(addr, Duration::from_millis(300));

    let err = client.execute(&graph()).await.unwrap_err();

    assert_matches!(err, EngineError::Timeout { prompt_id: Some(id), .. } if id == PROMPT_ID);
    let recorded = engine.recorded.lock().unwrap();
    assert_eq!(recorded.deleted, vec![json!({"delete": [PROMPT_ID]})]);
}

#[tokio::test]
async fn execution_error_is_reported() {
    let error = json!({
        "type": "execution_error",
        "data": {
            "prompt_id": PROMPT_ID,
            "node_id": "2",
            "exception_message": "Value not in list: ckpt_name",
            "exception_type": "ValueError",
        }
    });
    let (addr, _engine) =
        spawn_engine(MockEngine::new(vec![Frame::Text(error.to_string())], Ending::Hang)).await;
    let client = client_for(addr, Duration::from_secs(5));

    let err = client.execute(&graph()).await.unwrap_err();

    assert_matches!(err, EngineError::Execution { message, .. } if message.starts_with("ValueError"));
}

#[tokio::test]
async fn rejected_submission_surfaces_api_error() {
    let mut mock = MockEngine::new(Vec::new(), Ending::Hang);
    mock.reject_submit = true;
    let (addr, _engine) = spawn_engine(mock).await;
    let client = client_for(addr, Duration::from_secs(5));

    let err = client.execute(&graph()).await.unwrap_err();

    assert_matches!(
        err,
        EngineError::Submit(ComfyUIApiError::ApiError { status: 400, .. })
    );
}

#[tokio::test]
async fn health_check_reflects_reachability() {
    let (addr, _engine) = spawn_engine(MockEngine::new(Vec::new(), Ending::Hang)).await;
    let client = client_for(addr, Duration::from_secs(5));
    assert!(Engine::is_healthy(&client).await);

    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let unreachable = client_for(
        SocketAddr::from(([127, 0, 0, 1], port)),
        Duration::from_secs(5),
    );
    assert!(!Engine::is_healthy(&unreachable).await);
}

#[tokio::test]
async fn unreachable_engine_is_a_connection_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = client_for(SocketAddr::from(([127, 0, 0, 1], port)), Duration::from_secs(5));

    let err = client.execute(&graph()).await.unwrap_err();

    assert_matches!(err, EngineError::Connection(_));
    assert_eq!(err.kind(), "connection");
}

#[tokio::test]
async fn client_id_is_stable_across_submissions() {
    let script = vec![executing(PROMPT_ID, None)];
    let (addr, engine) = spawn_engine(MockEngine::new(script, Ending::Hang)).await;
    let client = client_for(addr, Duration::from_secs(5));

    client.execute(&graph()).await.unwrap();
    client.execute(&graph()).await.unwrap();

    let recorded = engine.recorded.lock().unwrap();
    assert_eq!(recorded.ws_client_ids.len(), 2);
    assert!(recorded.ws_client_ids.iter().all(|id| id == client.client_id()));
}

#[tokio::test]
async fn waiting_for_a_slot_counts_against_the_deadline() {
    let (addr, engine) =
        spawn_engine(MockEngine::new(vec![executing(PROMPT_ID, Some("1"))], Ending::Hang)).await;
    let mut config = EngineConfig::new(format!("http://{addr}"), format!("ws://{addr}"));
    config.job_timeout = Duration::from_millis(500);
    config.max_concurrent_jobs = 1;
    config.reconnect = ReconnectConfig {
        max_attempts: 1,
        ..Default::default()
    };
    let client = EngineClient::new(config);
    let (graph_a, graph_b) = (graph(), graph());

    let started = Instant::now();
    let (first, second) = tokio::join!(client.execute(&graph_a), client.execute(&graph_b));
    let elapsed = started.elapsed();

    // One call holds the only slot until its deadline; the other never gets
    // one and must give up on the same deadline rather than start afresh.
    let mut results = [first.unwrap_err(), second.unwrap_err()];
    results.sort_by_key(|e| matches!(e, EngineError::Timeout { prompt_id: None, .. }));
    assert_matches!(&results[0], EngineError::Timeout { prompt_id: Some(id), .. } if id == PROMPT_ID);
    assert_matches!(&results[1], EngineError::Timeout { prompt_id: None, .. });
    assert!(
        elapsed < Duration::from_millis(900),
        "both calls should end near the 500ms deadline, took {elapsed:?}"
    );

    let recorded = engine.recorded.lock().unwrap();
    assert_eq!(recorded.submissions.len(), 1);
    assert_eq!(recorded.deleted, vec![json!({"delete": [PROMPT_ID]})]);
}

#[tokio::test]
async fn cancelling_a_running_job_discards_it() {
    let (addr, engine) =
        spawn_engine(MockEngine::new(vec![executing(PROMPT_ID, Some("1"))], Ending::Hang)).await;
    let client = client_for(addr, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            // The script waits on `submitted` itself, so poll the record.
            while !engine.has_submission() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let started = Instant::now();
    let err = client.execute_with_cancel(&graph(), &cancel).await.unwrap_err();
    canceller.await.unwrap();

    assert_matches!(err, EngineError::Cancelled { prompt_id: Some(id) } if id == PROMPT_ID);
    assert!(started.elapsed() < Duration::from_secs(5));
    let recorded = engine.recorded.lock().unwrap();
    assert_eq!(recorded.deleted, vec![json!({"delete": [PROMPT_ID]})]);
}

#[tokio::test]
async fn rest_calls_are_bounded_by_http_timeout() {
    let mut mock = MockEngine::new(Vec::new(), Ending::Hang);
    mock.slow_stats = true;
    let (addr, _engine) = spawn_engine(mock).await;
    let mut config = EngineConfig::new(format!("http://{addr}"), format!("ws://{addr}"));
    config.http_timeout = Duration::from_millis(200);
    let client = EngineClient::new(config);

    let started = Instant::now();
    assert!(!Engine::is_healthy(&client).await);
    assert!(started.elapsed() < Duration::from_secs(5));
}
