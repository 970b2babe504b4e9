//! Engine client for a single ComfyUI instance.
//!
//! [`EngineClient`] owns one correlation id (`client_id`) for its whole
//! lifetime; it is built once at startup and shared by all requests. Each
//! call to [`EngineClient::execute`] opens its own WebSocket connection,
//! submits the graph over REST tagged with that id, and waits for the
//! job's completion event:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Submitted -> Running
//!              -> Completed | Failed | Disconnected
//! ```
//!
//! One deadline of [`EngineConfig::job_timeout`] covers the whole call:
//! waiting for an admission permit, connecting, submitting and receiving.

use std::fmt;
use std::time::Duration;

use atelier_core::graph::{JobGraph, ResultSet};
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::engine::EngineError;
use crate::reconnect::{connect_with_retry, ReconnectConfig};
use crate::session::collect_results;

/// WebSocket stream type used for engine connections.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Upper bound on a single WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection and execution settings for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// HTTP base URL, e.g. `http://host:8188`.
    pub api_url: String,
    /// WebSocket base URL, e.g. `ws://host:8188`.
    pub ws_url: String,
    /// Deadline for one call to [`EngineClient::execute`], measured from
    /// the moment it is invoked.
    pub job_timeout: Duration,
    /// Upper bound on any single REST call to the engine.
    pub http_timeout: Duration,
    /// Jobs allowed in flight at once; further callers wait for a permit.
    pub max_concurrent_jobs: usize,
    /// Backoff policy for opening the WebSocket.
    pub reconnect: ReconnectConfig,
}

impl EngineConfig {
    pub fn new(api_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ws_url: ws_url.into(),
            job_timeout: Duration::from_secs(300),
            http_timeout: Duration::from_secs(30),
            max_concurrent_jobs: 4,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Lifecycle of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Disconnected,
    Connecting,
    Connected,
    Submitted,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Correlation id sent during the WebSocket handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: WsStream,
}

impl fmt::Debug for ComfyUIConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComfyUIConnection")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Client for submitting job graphs to one ComfyUI instance.
pub struct EngineClient {
    client_id: String,
    config: EngineConfig,
    api: ComfyUIApi,
    permits: Semaphore,
}

impl EngineClient {
    /// Create a client with a freshly generated correlation id (UUID v4).
    pub fn new(config: EngineConfig) -> Self {
        let http = match reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
        {
            Ok(http) => http,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Failed to build ComfyUI HTTP client, REST calls will have no timeout",
                );
                reqwest::Client::new()
            }
        };
        let api = ComfyUIApi::with_client(http, config.api_url.clone());
        let permits = Semaphore::new(config.max_concurrent_jobs.max(1));

        Self {
            client_id: uuid::Uuid::new_v4().to_string(),
            config,
            api,
            permits,
        }
    }

    /// Correlation id tagging every submission from this client.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open a WebSocket connection registered under this client's id.
    pub async fn connect(&self) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = format!("{}/ws?clientId={}", self.config.ws_url, self.client_id);

        let (ws_stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&url))
            .await
            .map_err(|_| {
                ComfyUIClientError::Connection(format!(
                    "Timed out connecting to ComfyUI at {}",
                    self.config.ws_url
                ))
            })?
            .map_err(|e| {
                ComfyUIClientError::Connection(format!(
                    "Failed to connect to ComfyUI at {}: {e}",
                    self.config.ws_url
                ))
            })?;

        tracing::debug!(
            client_id = %self.client_id,
            "Connected to ComfyUI at {}",
            self.config.ws_url,
        );

        Ok(ComfyUIConnection {
            client_id: self.client_id.clone(),
            ws_stream,
        })
    }

    /// Submit `graph` and wait for its results.
    pub async fn execute(&self, graph: &JobGraph) -> Result<ResultSet, EngineError> {
        self.execute_with_cancel(graph, &CancellationToken::new())
            .await
    }

    /// Submit `graph` and wait for its results, stopping early if `cancel`
    /// fires.
    ///
    /// Everything from waiting for a permit to the completion event shares
    /// one [`EngineConfig::job_timeout`] deadline. On timeout or
    /// cancellation after submission the connection is closed and the
    /// queued job is deleted on a best-effort basis.
    pub async fn execute_with_cancel(
        &self,
        graph: &JobGraph,
        cancel: &CancellationToken,
    ) -> Result<ResultSet, EngineError> {
        let timeout = self.config.job_timeout;
        let deadline = Instant::now() + timeout;
        let expired = |prompt_id: Option<&str>| EngineError::Timeout {
            prompt_id: prompt_id.map(str::to_string),
            timeout,
        };

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled { prompt_id: None }),
            permit = timeout_at(deadline, self.permits.acquire()) => match permit {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => {
                    return Err(EngineError::Connection("engine client is shut down".to_string()))
                }
                Err(_) => {
                    tracing::warn!(
                        client_id = %self.client_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "No engine slot freed up before the deadline",
                    );
                    return Err(expired(None));
                }
            },
        };

        let mut state = JobState::Disconnected;
        advance(&mut state, JobState::Connecting, None);

        let connected = timeout_at(
            deadline,
            connect_with_retry(self, &self.config.reconnect, cancel),
        )
        .await
        .unwrap_or_else(|_| Err(expired(None)));
        let conn = match connected {
            Ok(conn) => conn,
            Err(e) => {
                advance(&mut state, JobState::Failed, None);
                return Err(e);
            }
        };
        advance(&mut state, JobState::Connected, None);
        let mut ws = conn.ws_stream;

        let submitted = match timeout_at(deadline, self.api.submit_workflow(graph, &self.client_id))
            .await
        {
            Ok(Ok(submitted)) => submitted,
            Ok(Err(e)) => {
                advance(&mut state, JobState::Failed, None);
                let _ = ws.close(None).await;
                return Err(EngineError::Submit(e));
            }
            Err(_) => {
                advance(&mut state, JobState::Failed, None);
                let _ = ws.close(None).await;
                return Err(expired(None));
            }
        };
        let prompt_id = submitted.prompt_id;
        advance(&mut state, JobState::Submitted, Some(&prompt_id));
        tracing::info!(
            client_id = %self.client_id,
            prompt_id = %prompt_id,
            queue_position = submitted.number,
            nodes = graph.len(),
            "Job submitted to ComfyUI",
        );

        let outputs = graph.output_node_ids();
        let outcome = tokio::select! {
            res = timeout_at(deadline, collect_results(&mut ws, &prompt_id, &outputs, &mut state)) => {
                res.unwrap_or_else(|_| Err(expired(Some(&prompt_id))))
            }
            _ = cancel.cancelled() => Err(EngineError::Cancelled {
                prompt_id: Some(prompt_id.clone()),
            }),
        };

        let _ = ws.close(None).await;

        match &outcome {
            Ok(results) => {
                advance(&mut state, JobState::Completed, Some(&prompt_id));
                tracing::info!(
                    prompt_id = %prompt_id,
                    images = results.image_count(),
                    "Job completed",
                );
            }
            Err(EngineError::ConnectionClosed { .. }) => {
                advance(&mut state, JobState::Disconnected, Some(&prompt_id));
            }
            Err(e) => {
                advance(&mut state, JobState::Failed, Some(&prompt_id));
                if matches!(e, EngineError::Timeout { .. } | EngineError::Cancelled { .. }) {
                    self.discard_job(&prompt_id).await;
                }
            }
        }

        outcome
    }

    /// Whether the engine answers its stats endpoint.
    pub async fn is_healthy(&self) -> bool {
        match self.api.system_stats().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "ComfyUI health check failed");
                false
            }
        }
    }

    /// Best-effort removal of an abandoned job from the engine queue.
    async fn discard_job(&self, prompt_id: &str) {
        if let Err(e) = self.api.cancel_execution(prompt_id).await {
            tracing::warn!(prompt_id, error = %e, "Failed to remove abandoned job from queue");
        }
    }
}

pub(crate) fn advance(state: &mut JobState, next: JobState, prompt_id: Option<&str>) {
    tracing::debug!(from = %state, to = %next, prompt_id, "Job state transition");
    *state = next;
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}
